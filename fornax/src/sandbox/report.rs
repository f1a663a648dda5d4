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

//! Analysis report model.
//!
//! Mirrors the subset of the sandbox's report JSON the pipeline consumes.
//! Fields the sandbox omits (older versions differ considerably) default
//! to empty rather than failing the whole report.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine name surfaced when the `info.machine` field is unusable.
pub const MACHINE_FAILED: &str = "FAILED";

/// A task report as returned by `/tasks/report/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Report {
    pub info: Option<ReportInfo>,
    pub signatures: Vec<Signature>,
    pub behavior: Option<Behavior>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportInfo {
    pub started: String,
    pub ended: String,
    pub id: i64,
    /// Either a bare string or an object carrying a `name` attribute,
    /// depending on the sandbox version. Kept raw and resolved via
    /// [`ReportInfo::machine_name`].
    pub machine: Option<Value>,
}

impl ReportInfo {
    /// Resolves the polymorphic machine field to a single string.
    ///
    /// A non-empty bare string is taken as-is; an object yields its `name`
    /// attribute (possibly empty). Anything else — missing field, empty
    /// string, unexpected type — yields [`MACHINE_FAILED`].
    pub fn machine_name(&self) -> String {
        match self.machine.as_ref() {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(Value::Object(fields)) => fields
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => MACHINE_FAILED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub severity: i64,
    pub description: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Behavior {
    pub processes: Vec<Process>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Process {
    #[serde(rename = "process_name")]
    pub name: String,
    #[serde(rename = "process_id")]
    pub id: i64,
    pub parent_id: i64,
    pub first_seen: String,
    pub calls: Vec<ApiCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiCall {
    pub category: String,
    pub status: bool,
    #[serde(rename = "return")]
    pub return_value: String,
    pub timestamp: String,
    pub thread_id: String,
    pub repeated: i64,
    pub api: String,
    pub arguments: Vec<CallArgument>,
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallArgument {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub files: Vec<String>,
    pub keys: Vec<String>,
    pub mutexes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_machine(machine: &str) -> ReportInfo {
        serde_json::from_str(&format!(r#"{{"id": 1, "machine": {machine}}}"#)).unwrap()
    }

    #[test]
    fn machine_as_bare_string() {
        assert_eq!(info_with_machine(r#""win7""#).machine_name(), "win7");
    }

    #[test]
    fn machine_as_object_with_name() {
        assert_eq!(
            info_with_machine(r#"{"name": "win10", "label": "x64"}"#).machine_name(),
            "win10"
        );
    }

    #[test]
    fn machine_missing_or_unparseable_is_failed() {
        let absent: ReportInfo = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(absent.machine_name(), MACHINE_FAILED);

        assert_eq!(info_with_machine("3").machine_name(), MACHINE_FAILED);
        assert_eq!(info_with_machine(r#""""#).machine_name(), MACHINE_FAILED);
    }

    #[test]
    fn machine_object_without_name_is_empty() {
        assert_eq!(info_with_machine("{}").machine_name(), "");
    }

    #[test]
    fn report_tolerates_missing_sections() {
        let report: Report = serde_json::from_str("{}").unwrap();
        assert!(report.info.is_none());
        assert!(report.signatures.is_empty());
        assert!(report.behavior.is_none());
    }

    #[test]
    fn behavior_parses_calls() {
        let raw = r#"{
            "processes": [{
                "process_name": "a.exe",
                "process_id": 11,
                "parent_id": 1,
                "first_seen": "2026-01-01 10:00:00",
                "calls": [{
                    "category": "filesystem",
                    "status": true,
                    "return": "0x0",
                    "timestamp": "2026-01-01 10:00:01",
                    "thread_id": "1404",
                    "repeated": 2,
                    "api": "NtCreateFile",
                    "arguments": [{"name": "FileName", "value": "C:\\x"}],
                    "id": 9
                }]
            }],
            "summary": {"files": ["C:\\x"], "keys": [], "mutexes": ["m"]}
        }"#;

        let behavior: Behavior = serde_json::from_str(raw).unwrap();
        assert_eq!(behavior.processes.len(), 1);
        assert_eq!(behavior.processes[0].calls[0].api, "NtCreateFile");
        assert!(behavior.processes[0].calls[0].status);
        let summary = behavior.summary.unwrap();
        assert_eq!(summary.files, vec!["C:\\x"]);
        assert_eq!(summary.mutexes, vec!["m"]);
    }
}
