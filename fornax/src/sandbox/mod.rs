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

//! Sandbox REST client.
//!
//! Thin client over the sandbox's HTTP API: capacity status, task
//! submission (multipart), status polling, report and dropped-archive
//! retrieval, and job deletion. Any non-200 response is an error carrying
//! the status and body for the failed envelope.

pub mod report;

use std::collections::HashMap;
use std::time::Instant;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::SandboxError;
use report::Report;

/// Task status value marking a finished, fully written report.
pub const STATUS_REPORTED: &str = "reported";

/// Capacity snapshot from `/cuckoo/status`.
#[derive(Debug, Clone, Copy)]
pub struct SandboxStatus {
    /// Jobs queued but not yet running.
    pub pending: i64,
    /// Free bytes in the analyses partition, when the sandbox reports it.
    pub free_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    tasks: StatusTasks,
    #[serde(default)]
    diskspace: Option<StatusDiskspace>,
}

#[derive(Debug, Deserialize)]
struct StatusTasks {
    #[serde(default)]
    pending: i64,
}

#[derive(Debug, Deserialize)]
struct StatusDiskspace {
    // the analyses partition is keyed "samples" in the status payload
    #[serde(rename = "samples")]
    analyses: Option<StatusSpace>,
}

#[derive(Debug, Deserialize)]
struct StatusSpace {
    #[serde(default)]
    free: u64,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    task_id: i64,
}

#[derive(Debug, Deserialize)]
struct TaskViewResponse {
    task: TaskView,
}

#[derive(Debug, Deserialize)]
struct TaskView {
    status: String,
}

/// Client for one sandbox instance. Cheap to construct; shares the
/// worker's HTTP client.
#[derive(Clone)]
pub struct SandboxClient {
    http: reqwest::Client,
    base_url: String,
}

impl SandboxClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the capacity snapshot the feeder's admission control runs on.
    pub async fn status(&self) -> Result<SandboxStatus, SandboxError> {
        let response: StatusResponse = self.get_json(format!("{}/cuckoo/status", self.base_url)).await?;

        Ok(SandboxStatus {
            pending: response.tasks.pending,
            free_bytes: response
                .diskspace
                .and_then(|d| d.analyses)
                .map(|space| space.free),
        })
    }

    /// Uploads a sample, returning the task id the sandbox assigned.
    ///
    /// The file goes into the `file` multipart field; every entry of
    /// `params` becomes a separate form field (timeout, machine, ...).
    pub async fn new_task(
        &self,
        file_name: &str,
        file_bytes: Vec<u8>,
        params: &HashMap<String, String>,
    ) -> Result<i64, SandboxError> {
        let started = Instant::now();
        let url = format!("{}/tasks/create/file", self.base_url);

        let mut form = Form::new().part(
            "file",
            Part::bytes(file_bytes).file_name(file_name.to_string()),
        );
        for (key, value) in params {
            form = form.text(key.clone(), value.clone());
        }

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;
        if status != 200 {
            return Err(SandboxError::Status { url, status, body });
        }

        let created: CreateTaskResponse =
            serde_json::from_str(&body).map_err(|source| SandboxError::Parse { url, source })?;

        debug!(
            "uploaded {file_name} to the sandbox in {:?}",
            started.elapsed()
        );
        Ok(created.task_id)
    }

    /// Fetches the status string of one task; `reported` is terminal.
    pub async fn task_status(&self, id: i64) -> Result<String, SandboxError> {
        let response: TaskViewResponse = self
            .get_json(format!("{}/tasks/view/{id}", self.base_url))
            .await?;
        Ok(response.task.status)
    }

    /// Downloads the full report of a finished task.
    pub async fn task_report(&self, id: i64) -> Result<Report, SandboxError> {
        let started = Instant::now();
        let report = self
            .get_json(format!("{}/tasks/report/{id}", self.base_url))
            .await?;
        debug!("downloaded report {id} from the sandbox in {:?}", started.elapsed());
        Ok(report)
    }

    /// Downloads the dropped-files archive (a bzip2-compressed tar).
    pub async fn dropped(&self, id: i64) -> Result<Vec<u8>, SandboxError> {
        let started = Instant::now();
        let url = format!("{}/tasks/report/{id}/dropped", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;
        if status != 200 {
            return Err(SandboxError::Status {
                url,
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        debug!(
            "downloaded dropped files of {id} from the sandbox in {:?}",
            started.elapsed()
        );
        Ok(bytes.to_vec())
    }

    /// Removes a finished job from the sandbox to free retention space.
    pub async fn delete_task(&self, id: i64) -> Result<(), SandboxError> {
        let url = format!("{}/tasks/delete/{id}", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Status { url, status, body });
        }

        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, SandboxError> {
        debug!("getting {url}");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| SandboxError::Transport {
                url: url.clone(),
                source,
            })?;
        if status != 200 {
            return Err(SandboxError::Status { url, status, body });
        }

        serde_json::from_str(&body).map_err(|source| SandboxError::Parse { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_resolves_free_space() {
        let raw = r#"{
            "tasks": {"running": 2, "pending": 7},
            "diskspace": {"samples": {"total": 100, "free": 42, "used": 58}}
        }"#;
        let parsed: StatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.tasks.pending, 7);
        assert_eq!(parsed.diskspace.unwrap().analyses.unwrap().free, 42);
    }

    #[test]
    fn status_response_without_diskspace() {
        let parsed: StatusResponse = serde_json::from_str(r#"{"tasks": {"pending": 0}}"#).unwrap();
        assert!(parsed.diskspace.is_none());
    }

    #[test]
    fn create_and_view_responses() {
        let created: CreateTaskResponse = serde_json::from_str(r#"{"task_id": 31}"#).unwrap();
        assert_eq!(created.task_id, 31);

        let view: TaskViewResponse =
            serde_json::from_str(r#"{"task": {"status": "reported"}}"#).unwrap();
        assert_eq!(view.task.status, STATUS_REPORTED);
    }
}
