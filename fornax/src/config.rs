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

//! Worker configuration.
//!
//! Each worker reads one JSON file. The key casing (`Amqp`,
//! `ConsumerQueue`, `VerifySSL`, ...) is part of the operational contract
//! and matches the files deployments already carry. Unknown keys are
//! ignored; missing keys fall back to the defaults below.
//!
//! The file path comes from the `--config` flag and defaults to
//! `<worker>.conf.json` next to the binary.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ConfigError;

/// Configuration for the feeder worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FeederConfig {
    /// AMQP connection URI.
    pub amqp: String,
    pub consumer_queue: String,
    pub producer_queue: String,
    pub failed_queue: String,
    #[serde(rename = "VerifySSL")]
    pub verify_ssl: bool,
    /// Outstanding unacknowledged deliveries; the effective concurrency cap.
    pub prefetch_count: u16,
    #[serde(rename = "CuckooURL")]
    pub cuckoo_url: String,
    /// Admission-control threshold on the sandbox's pending task count.
    pub max_pending: i64,
    /// Also hold submissions while the analyses partition is low on space.
    pub check_free_space: bool,
    pub log_file: String,
    pub log_level: String,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            amqp: "amqp://localhost:5672".to_string(),
            consumer_queue: "submit".to_string(),
            producer_queue: "pending".to_string(),
            failed_queue: "failed".to_string(),
            verify_ssl: true,
            prefetch_count: 4,
            cuckoo_url: String::new(),
            max_pending: 50,
            check_free_space: false,
            log_file: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration for the watcher worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WatcherConfig {
    pub amqp: String,
    pub consumer_queue: String,
    pub producer_queue: String,
    pub failed_queue: String,
    #[serde(rename = "VerifySSL")]
    pub verify_ssl: bool,
    pub prefetch_count: u16,
    /// Seconds between polling passes and between probes within one pass.
    pub wait_between_requests: u64,
    pub log_file: String,
    pub log_level: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            amqp: "amqp://localhost:5672".to_string(),
            consumer_queue: "pending".to_string(),
            producer_queue: "ready".to_string(),
            failed_queue: "failed".to_string(),
            verify_ssl: true,
            prefetch_count: 50,
            wait_between_requests: 30,
            log_file: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration for the reporter worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ReporterConfig {
    pub amqp: String,
    pub consumer_queue: String,
    /// Optional chain queue: when set, the original `ready` body is
    /// republished here after a successful push, so a second reporter
    /// instance with a disjoint parser set can pick it up.
    pub producer_queue: String,
    pub failed_queue: String,
    #[serde(rename = "VerifySSL")]
    pub verify_ssl: bool,
    pub prefetch_count: u16,
    /// Global cap on api_call records pushed per report.
    pub push_api_calls_max: usize,
    /// Delete the sandbox job after a successful push.
    pub cuckoo_cleanup: bool,
    /// Report sections to shape: info, signatures, behavior, dropped.
    pub enabled_parsers: Vec<String>,
    pub log_file: String,
    pub log_level: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            amqp: "amqp://localhost:5672".to_string(),
            consumer_queue: "ready".to_string(),
            producer_queue: String::new(),
            failed_queue: "failed".to_string(),
            verify_ssl: true,
            prefetch_count: 4,
            push_api_calls_max: 0,
            cuckoo_cleanup: false,
            enabled_parsers: vec![
                "info".to_string(),
                "signatures".to_string(),
                "behavior".to_string(),
                "dropped".to_string(),
            ],
            log_file: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration for the overseer worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OverseerConfig {
    pub amqp: String,
    pub consumer_queue: String,
    pub prefetch_count: u16,
    /// Directory receiving messages that exhausted their retry budget.
    pub dump_dir: String,
    pub log_file: String,
    pub log_level: String,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            amqp: "amqp://localhost:5672".to_string(),
            consumer_queue: "failed".to_string(),
            prefetch_count: 4,
            dump_dir: "dumps".to_string(),
            log_file: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Loads a worker configuration, falling back to `<service>.conf.json`
/// beside the running binary when no explicit path is given.
pub fn load_config<T: DeserializeOwned>(
    service: &str,
    path: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(service)?,
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}

fn default_config_path(service: &str) -> Result<PathBuf, ConfigError> {
    let exe = std::env::current_exe().map_err(ConfigError::ExeDir)?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("{service}.conf.json")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeder_config_reads_wire_casing() {
        let raw = r#"{
            "Amqp": "amqp://bus:5672",
            "ConsumerQueue": "submit",
            "ProducerQueue": "pending",
            "FailedQueue": "failed",
            "VerifySSL": false,
            "PrefetchCount": 8,
            "CuckooURL": "http://sandbox:8090",
            "MaxPending": 12,
            "CheckFreeSpace": true,
            "LogLevel": "debug"
        }"#;

        let config: FeederConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.amqp, "amqp://bus:5672");
        assert!(!config.verify_ssl);
        assert_eq!(config.prefetch_count, 8);
        assert_eq!(config.cuckoo_url, "http://sandbox:8090");
        assert_eq!(config.max_pending, 12);
        assert!(config.check_free_space);
        assert_eq!(config.log_level, "debug");
        // unset key falls back to the default
        assert!(config.log_file.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let raw = r#"{"ConsumerQueue": "failed", "SomeFutureKnob": 3}"#;
        let config: OverseerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.consumer_queue, "failed");
    }

    #[test]
    fn reporter_defaults_enable_all_parsers() {
        let config = ReporterConfig::default();
        assert_eq!(config.enabled_parsers.len(), 4);
        assert_eq!(config.push_api_calls_max, 0);
        assert!(!config.cuckoo_cleanup);
    }
}
