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

//! Error types for the fornax pipeline.
//!
//! Errors are grouped per concern. Fatal setup errors (`BusError`,
//! `ConfigError`, `DumpError`) abort a worker process; everything else is
//! message-scoped and is routed through the nack-on-error contract to the
//! overseer instead of crashing the worker.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the message bus layer.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("failed to connect to the bus at {uri}: {source}")]
    Connect { uri: String, source: lapin::Error },

    #[error("failed to open a bus channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare queue {queue}: {source}")]
    Declare { queue: String, source: lapin::Error },

    #[error("failed to publish to {queue}: {source}")]
    Publish { queue: String, source: lapin::Error },

    #[error("failed to set the consumer prefetch count: {0}")]
    Qos(#[source] lapin::Error),

    #[error("failed to register a consumer on {queue}: {source}")]
    Consume { queue: String, source: lapin::Error },

    #[error("the delivery stream for {queue} failed: {source}")]
    Delivery { queue: String, source: lapin::Error },

    #[error("the consumer stream for {queue} closed unexpectedly")]
    ConsumerClosed { queue: String },
}

/// Errors raised by the sandbox HTTP client.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("{url} returned [{status}] {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to parse the response from {url}: {source}")]
    Parse {
        url: String,
        source: serde_json::Error,
    },
}

/// Errors raised by the repository HTTP client.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The repository refuses zero-length uploads; callers skip these files.
    #[error("empty file")]
    EmptyFile,

    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("{url} rejected the call: [{status}] {body}")]
    Rejected { url: String, status: u16, body: String },

    #[error("failed to parse the response from {url}: {source}")]
    Parse {
        url: String,
        source: serde_json::Error,
    },

    #[error("failed to encode the result batch: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Validation failures for bus message envelopes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file name or data is missing")]
    IncompleteFile,

    #[error("sandbox URL or task id is missing")]
    MissingTaskHandle,

    #[error("repository context is missing")]
    MissingContext,
}

/// Errors raised while loading a worker configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine the executable directory: {0}")]
    ExeDir(#[source] std::io::Error),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Errors raised by the overseer's dump directory.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("dump directory {path} failed validation: {source}")]
    Validation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write dump file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read the dump directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read dump file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that terminate the dropped-file upload loop early.
///
/// The loop is best-effort: the reporter logs the error and keeps the
/// records collected before it occurred.
#[derive(Error, Debug)]
pub enum DroppedError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to read the dropped archive: {0}")]
    Archive(#[from] std::io::Error),
}

/// Top-level worker failure, surfaced by the binaries.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("failed to build the shared HTTP client: {0}")]
    Http(#[source] reqwest::Error),
}
