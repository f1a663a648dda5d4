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

//! Bus message envelopes.
//!
//! Every message crossing a queue is JSON with the exact field names given
//! here; the casing is part of the wire contract with the upstream
//! repository dispatcher and must not change. All envelopes embed a
//! [`RepositoryContext`] — a message without one is malformed and ends up
//! in the overseer's dump directory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifying tuple attached to every pipeline message.
///
/// Carries everything needed to reach back to the repository for the
/// analysis this message belongs to: routing (URL, object type/id),
/// credentials (username, API key), and provenance (md5, source tag).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryContext {
    pub crits_url: String,
    pub analysis_id: String,
    pub object_type: String,
    pub object_id: String,
    pub username: String,
    pub api_key: String,
    pub md5: String,
    pub source: String,
}

/// The sample payload of a [`SubmissionRequest`]: a file name plus the raw
/// bytes as base64 text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplePayload {
    pub name: String,
    pub data: String,
}

/// Request from the repository dispatcher to analyze one sample.
///
/// `payload` is an opaque parameter map forwarded verbatim to the sandbox
/// as extra job options (timeout, machine selection, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionRequest {
    pub payload: HashMap<String, String>,
    pub file: Option<SamplePayload>,
    pub crits_data: Option<RepositoryContext>,
}

impl SubmissionRequest {
    /// Checks that the sample payload is complete and a repository context
    /// is present. The context contents cannot be verified here; presence
    /// is all the pipeline can check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.file {
            Some(ref file) if !file.name.is_empty() && !file.data.is_empty() => {}
            _ => return Err(ValidationError::IncompleteFile),
        }

        if self.crits_data.is_none() {
            return Err(ValidationError::MissingContext);
        }

        Ok(())
    }
}

/// Handle for a job accepted by the sandbox, sent from the feeder to the
/// watcher. The task id is issued by the sandbox on upload and stays valid
/// for as long as the sandbox retains the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskHandle {
    #[serde(rename = "TaskId")]
    pub task_id: i64,
    #[serde(rename = "CuckooURL")]
    pub cuckoo_url: String,
    #[serde(rename = "CritsData")]
    pub crits_data: Option<RepositoryContext>,
}

impl TaskHandle {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cuckoo_url.is_empty() || self.task_id == 0 {
            return Err(ValidationError::MissingTaskHandle);
        }

        if self.crits_data.is_none() {
            return Err(ValidationError::MissingContext);
        }

        Ok(())
    }
}

/// Same shape as [`TaskHandle`], sent from the watcher to the reporter once
/// the sandbox reports the analysis as finished.
pub type ReadyTask = TaskHandle;

/// Wrapper around a message that failed processing, routed to the overseer.
///
/// `msg` carries the original body verbatim so the overseer can republish
/// it to `queue` once the failure cause has (hopefully) passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedEnvelope {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Queue")]
    pub queue: String,
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Desc")]
    pub desc: String,
    #[serde(rename = "Msg")]
    pub msg: String,
}

/// Shape-agnostic view of a failed message body, used by the overseer to
/// pull out the repository context regardless of which queue the body was
/// originally routed on. Both capitalizations occur on the wire: the
/// feeder's input uses `crits_data`, everything downstream `CritsData`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenericEnvelope {
    #[serde(rename = "CritsData", alias = "crits_data")]
    pub crits_data: Option<RepositoryContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RepositoryContext {
        RepositoryContext {
            crits_url: "https://repo.example.com".to_string(),
            analysis_id: "5a0e0f".to_string(),
            object_type: "Sample".to_string(),
            object_id: "42".to_string(),
            username: "analyst".to_string(),
            api_key: "key".to_string(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            source: "lab".to_string(),
        }
    }

    #[test]
    fn submission_round_trip_is_identity() {
        let request = SubmissionRequest {
            payload: HashMap::from([("timeout".to_string(), "60".to_string())]),
            file: Some(SamplePayload {
                name: "a.exe".to_string(),
                data: "aGVsbG8=".to_string(),
            }),
            crits_data: Some(context()),
        };

        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: SubmissionRequest = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.payload, request.payload);
        assert_eq!(decoded.file, request.file);
        assert_eq!(decoded.crits_data, request.crits_data);
    }

    #[test]
    fn submission_wire_field_names() {
        let encoded = serde_json::to_value(SubmissionRequest {
            payload: HashMap::new(),
            file: Some(SamplePayload::default()),
            crits_data: Some(context()),
        })
        .unwrap();

        assert!(encoded.get("payload").is_some());
        assert!(encoded.get("file").is_some());
        assert!(encoded["crits_data"].get("analysis_id").is_some());
    }

    #[test]
    fn task_handle_round_trip_uses_wire_names() {
        let handle = TaskHandle {
            task_id: 7,
            cuckoo_url: "http://sandbox:8090".to_string(),
            crits_data: Some(context()),
        };

        let encoded = serde_json::to_value(&handle).unwrap();
        assert_eq!(encoded["TaskId"], 7);
        assert_eq!(encoded["CuckooURL"], "http://sandbox:8090");
        assert!(encoded["CritsData"].is_object());

        let decoded: TaskHandle = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.task_id, handle.task_id);
        assert_eq!(decoded.cuckoo_url, handle.cuckoo_url);
        assert_eq!(decoded.crits_data, handle.crits_data);
    }

    #[test]
    fn submission_validation_rejects_missing_pieces() {
        let mut request = SubmissionRequest {
            payload: HashMap::new(),
            file: Some(SamplePayload {
                name: "a.exe".to_string(),
                data: "aGVsbG8=".to_string(),
            }),
            crits_data: Some(context()),
        };
        assert!(request.validate().is_ok());

        request.crits_data = None;
        assert_eq!(request.validate(), Err(ValidationError::MissingContext));

        request.crits_data = Some(context());
        request.file = Some(SamplePayload {
            name: String::new(),
            data: "aGVsbG8=".to_string(),
        });
        assert_eq!(request.validate(), Err(ValidationError::IncompleteFile));

        request.file = None;
        assert_eq!(request.validate(), Err(ValidationError::IncompleteFile));
    }

    #[test]
    fn task_handle_validation() {
        let mut handle = TaskHandle {
            task_id: 3,
            cuckoo_url: "http://sandbox:8090".to_string(),
            crits_data: Some(context()),
        };
        assert!(handle.validate().is_ok());

        handle.task_id = 0;
        assert_eq!(handle.validate(), Err(ValidationError::MissingTaskHandle));

        handle.task_id = 3;
        handle.crits_data = None;
        assert_eq!(handle.validate(), Err(ValidationError::MissingContext));
    }

    #[test]
    fn generic_envelope_accepts_both_capitalizations() {
        let pascal = r#"{"TaskId":1,"CritsData":{"analysis_id":"abc"}}"#;
        let decoded: GenericEnvelope = serde_json::from_str(pascal).unwrap();
        assert_eq!(decoded.crits_data.unwrap().analysis_id, "abc");

        let snake = r#"{"file":{"name":"a"},"crits_data":{"analysis_id":"def"}}"#;
        let decoded: GenericEnvelope = serde_json::from_str(snake).unwrap();
        assert_eq!(decoded.crits_data.unwrap().analysis_id, "def");

        let neither = r#"{"TaskId":1}"#;
        let decoded: GenericEnvelope = serde_json::from_str(neither).unwrap();
        assert!(decoded.crits_data.is_none());
    }

    #[test]
    fn failed_envelope_round_trip_is_identity() {
        let failed = FailedEnvelope {
            service: "feeder".to_string(),
            queue: "submit".to_string(),
            error: "boom".to_string(),
            desc: "Could not decode json!".to_string(),
            msg: r#"{"payload":{}}"#.to_string(),
        };

        let encoded = serde_json::to_string(&failed).unwrap();
        let decoded: FailedEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, failed);
    }
}
