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

use std::fs;

use fornax::{load_config, ConfigError, ReporterConfig, WatcherConfig};
use tempfile::tempdir;

#[test]
fn loads_a_worker_config_from_an_explicit_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("watcher.conf.json");
    fs::write(
        &path,
        r#"{
            "Amqp": "amqp://bus.lab:5672",
            "ConsumerQueue": "pending",
            "ProducerQueue": "ready",
            "FailedQueue": "failed",
            "PrefetchCount": 100,
            "WaitBetweenRequests": 10
        }"#,
    )
    .unwrap();

    let config: WatcherConfig = load_config("watcher", Some(&path)).unwrap();
    assert_eq!(config.amqp, "amqp://bus.lab:5672");
    assert_eq!(config.prefetch_count, 100);
    assert_eq!(config.wait_between_requests, 10);
    // untouched keys keep their defaults
    assert!(config.verify_ssl);
    assert_eq!(config.log_level, "info");
}

#[test]
fn missing_config_file_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.conf.json");

    let result: Result<WatcherConfig, _> = load_config("watcher", Some(&path));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.conf.json");
    fs::write(&path, "{ not json").unwrap();

    let result: Result<ReporterConfig, _> = load_config("reporter", Some(&path));
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn reporter_parser_list_and_unknown_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reporter.conf.json");
    fs::write(
        &path,
        r#"{
            "EnabledParsers": ["info", "dropped"],
            "PushApiCallsMax": 500,
            "CuckooCleanup": true,
            "AnOptionFromTheFuture": {"nested": true}
        }"#,
    )
    .unwrap();

    let config: ReporterConfig = load_config("reporter", Some(&path)).unwrap();
    assert_eq!(config.enabled_parsers, vec!["info", "dropped"]);
    assert_eq!(config.push_api_calls_max, 500);
    assert!(config.cuckoo_cleanup);
}
