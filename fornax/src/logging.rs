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

//! Logging setup for the worker binaries.
//!
//! Workers log to stdout, and additionally to an append-mode log file when
//! one is configured. The configured level gates output: `warning` and
//! `info` restrict to those levels, anything else (including an empty
//! string) enables debug output.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Maps the configured level string onto a tracing filter.
pub fn level_filter(level: &str) -> LevelFilter {
    match level {
        "warning" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Installs the global subscriber. Called once per process, before any
/// other work; panics if a subscriber is already set.
pub fn init(log_file: &str, log_level: &str) -> std::io::Result<()> {
    let filter = level_filter(log_level);
    let stdout = fmt::layer().with_filter(filter);

    if log_file.is_empty() {
        tracing_subscriber::registry().with(stdout).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let sink = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter);
        tracing_subscriber::registry().with(stdout).with(sink).init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_strings_map_to_filters() {
        assert_eq!(level_filter("warning"), LevelFilter::WARN);
        assert_eq!(level_filter("info"), LevelFilter::INFO);
        assert_eq!(level_filter("debug"), LevelFilter::DEBUG);
        assert_eq!(level_filter(""), LevelFilter::DEBUG);
    }
}
