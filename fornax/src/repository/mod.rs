/*
 *  Copyright 2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Repository REST client.
//!
//! Pushes shaped analysis results back to the threat-intelligence
//! repository: sample uploads, relationship creation, batched result
//! records, and analysis completion. A call counts as failed when the HTTP
//! status is not 200, the body's `return_code` is nonzero, or its
//! `error_message` is non-empty.
//!
//! Two server quirks shape this client: PATCH authentication must travel
//! in an `Authorization: ApiKey` header because the server misparses form
//! credentials on PATCH bodies, and attribute maps must not contain native
//! booleans — they are rendered as `"true"`/`"false"` strings.

use std::time::Instant;

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::RepositoryError;
use crate::messages::RepositoryContext;

/// Message the repository returns for an already-existing relationship;
/// treated as success since the link is in place either way.
const RELATIONSHIP_EXISTS: &str = "Relationship already exists";

/// Subtype tag of one result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Info,
    Signature,
    Process,
    ApiCall,
    File,
    RegistryKey,
    Mutex,
    FileAdded,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Info => "info",
            ResultKind::Signature => "signature",
            ResultKind::Process => "process",
            ResultKind::ApiCall => "api_call",
            ResultKind::File => "file",
            ResultKind::RegistryKey => "registry_key",
            ResultKind::Mutex => "mutex",
            ResultKind::FileAdded => "file_added",
        }
    }
}

/// One shaped result bound for the repository.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub kind: ResultKind,
    pub value: String,
    pub attributes: Option<Map<String, Value>>,
}

impl ResultRecord {
    pub fn new(
        kind: ResultKind,
        value: impl Into<String>,
        attributes: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            attributes,
        }
    }
}

/// The response shape shared by all repository endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DefaultResponse {
    return_code: i64,
    error_message: String,
    message: String,
    id: String,
}

/// The three parallel arrays of one result batch, each JSON-encoded.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BatchArrays {
    pub result: String,
    pub result_subtype: String,
    pub result_type: String,
}

/// Renders a batch into the repository's parallel-array form. Attribute
/// maps are serialized per record (`{}` when absent) with booleans
/// stringified first.
pub(crate) fn build_batch(records: &[ResultRecord]) -> Result<BatchArrays, serde_json::Error> {
    let mut values = Vec::with_capacity(records.len());
    let mut subtypes = Vec::with_capacity(records.len());
    let mut attribute_maps = Vec::with_capacity(records.len());

    for record in records {
        let rendered = match &record.attributes {
            None => "{}".to_string(),
            Some(map) => serde_json::to_string(&stringify_booleans(map.clone()))?,
        };

        values.push(record.value.clone());
        subtypes.push(record.kind.as_str().to_string());
        attribute_maps.push(rendered);
    }

    Ok(BatchArrays {
        result: serde_json::to_string(&values)?,
        result_subtype: serde_json::to_string(&subtypes)?,
        result_type: serde_json::to_string(&attribute_maps)?,
    })
}

/// Replaces top-level boolean values with their lowercase string form.
pub(crate) fn stringify_booleans(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| match value {
            Value::Bool(flag) => (key, Value::String(flag.to_string())),
            other => (key, other),
        })
        .collect()
}

/// Client bound to one analysis context. Cheap to construct; shares the
/// worker's HTTP client and never outlives a single message.
#[derive(Clone)]
pub struct RepositoryClient {
    http: reqwest::Client,
    base_url: String,
    context: RepositoryContext,
}

impl RepositoryClient {
    pub fn new(http: reqwest::Client, context: RepositoryContext) -> Self {
        Self {
            http,
            base_url: context.crits_url.clone(),
            context,
        }
    }

    pub fn context(&self) -> &RepositoryContext {
        &self.context
    }

    /// Writes a service-log line on the analysis record.
    pub async fn log(&self, level: &str, message: &str) -> Result<(), RepositoryError> {
        let mut form = self.context_form();
        form.push(("log_level", level.to_string()));
        form.push(("log_message", message.to_string()));

        // service-log lines go to the repository root, not the samples API
        let url = self.base_url.clone();
        self.post_form(&url, &form).await?;
        Ok(())
    }

    /// Uploads a file as a new sample, returning the created object id.
    ///
    /// Zero-length files are rejected locally with
    /// [`RepositoryError::EmptyFile`] — the repository will not accept
    /// them — after leaving an info-level log line on the analysis.
    pub async fn new_sample(&self, file_name: &str, data: &[u8]) -> Result<String, RepositoryError> {
        debug!(
            "uploading {file_name} to the repository [{}]",
            self.context.analysis_id
        );

        if data.is_empty() {
            if let Err(err) = self.log("info", &format!("Empty dropped file: {file_name}")).await {
                warn!("could not log the empty dropped file: {err}");
            }
            return Err(RepositoryError::EmptyFile);
        }

        let url = format!("{}/api/v1/samples/", self.base_url);
        let form = Form::new()
            .part(
                "filedata",
                Part::bytes(data.to_vec()).file_name(file_name.to_string()),
            )
            .text("username", self.context.username.clone())
            .text("api_key", self.context.api_key.clone())
            .text("source", self.context.source.clone())
            .text("upload_type", "file")
            .text("file_format", "raw");

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.clone(),
                source,
            })?;
        let parsed: DefaultResponse = serde_json::from_str(&body)
            .map_err(|source| RepositoryError::Parse {
                url: url.clone(),
                source,
            })?;

        if status != 200 || parsed.return_code != 0 || !parsed.error_message.is_empty() {
            return Err(RepositoryError::Rejected { url, status, body });
        }

        Ok(parsed.id)
    }

    /// Links the uploaded sample `right_id` to this context's object.
    pub async fn forge_relationship(&self, right_id: &str) -> Result<(), RepositoryError> {
        debug!(
            "forging relationship with {right_id} [{}]",
            self.context.analysis_id
        );

        let url = format!(
            "{}/api/v1/samples/{}/",
            self.base_url, self.context.object_id
        );
        let form = [
            ("action", "forge_relationship"),
            ("right_type", "Sample"),
            ("right_id", right_id),
            ("rel_type", "Related To"),
        ];

        // credentials go into the header: the server misparses form auth
        // on PATCH bodies
        let auth = format!(
            "ApiKey {}:{}",
            self.context.username, self.context.api_key
        );

        let response = self
            .http
            .patch(&url)
            .header(AUTHORIZATION, auth)
            .form(&form)
            .send()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.clone(),
                source,
            })?;
        let parsed: DefaultResponse = serde_json::from_str(&body)
            .map_err(|source| RepositoryError::Parse {
                url: url.clone(),
                source,
            })?;

        let duplicate = parsed.message == RELATIONSHIP_EXISTS;
        if status != 200
            || (parsed.return_code != 0 && !duplicate)
            || !parsed.error_message.is_empty()
        {
            return Err(RepositoryError::Rejected { url, status, body });
        }

        Ok(())
    }

    /// Pushes a result batch. An empty batch is a local no-op.
    pub async fn add_results(&self, records: &[ResultRecord]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let batch = build_batch(records).map_err(RepositoryError::Encode)?;

        let mut form = self.context_form();
        form.push(("result_is_batch", "true".to_string()));
        form.push(("result", batch.result));
        form.push(("result_subtype", batch.result_subtype));
        form.push(("result_type", batch.result_type));

        let url = format!("{}/api/v1/services/", self.base_url);
        self.post_form(&url, &form).await?;

        debug!(
            "added {} results in {:?} to [{}]",
            records.len(),
            started.elapsed(),
            self.context.analysis_id
        );
        Ok(())
    }

    /// Marks the analysis as finished on the repository side.
    pub async fn mark_as_finished(&self) -> Result<(), RepositoryError> {
        let mut form = self.context_form();
        form.push(("finish", "1".to_string()));

        let url = format!("{}/api/v1/services/", self.base_url);
        self.post_form(&url, &form).await?;
        Ok(())
    }

    fn context_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("analysis_id", self.context.analysis_id.clone()),
            ("object_type", self.context.object_type.clone()),
            ("object_id", self.context.object_id.clone()),
            ("username", self.context.username.clone()),
            ("api_key", self.context.api_key.clone()),
        ]
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&'static str, String)],
    ) -> Result<DefaultResponse, RepositoryError> {
        debug!("posting form to {url}");

        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| RepositoryError::Transport {
                url: url.to_string(),
                source,
            })?;
        let parsed: DefaultResponse =
            serde_json::from_str(&body).map_err(|source| RepositoryError::Parse {
                url: url.to_string(),
                source,
            })?;

        if status != 200 || parsed.return_code != 0 || !parsed.error_message.is_empty() {
            return Err(RepositoryError::Rejected {
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(parsed)
    }
}
