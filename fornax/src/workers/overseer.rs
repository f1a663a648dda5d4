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

//! Overseer: out-of-process retry and dead-lettering.
//!
//! Failed envelopes from every service land here. Each analysis gets a
//! retry budget of three delayed republishes onto its origin queue; after
//! that — or when an envelope is too broken to route — the raw body goes
//! to the dump directory for an operator to look at. Resubmit mode replays
//! the dump directory back onto the failed queue after the root cause has
//! been fixed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::ack;
use crate::config::OverseerConfig;
use crate::core::{Core, QueueHandle};
use crate::error::{BusError, DumpError, WorkerError};
use crate::messages::{FailedEnvelope, GenericEnvelope};

pub const SERVICE: &str = "overseer";

/// Republish attempts granted per analysis id before dumping.
const RETRY_BUDGET: u32 = 3;

/// Delay before a republish, giving the failed downstream a chance to
/// come back.
const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Outcome of recording one more failure for an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish to the origin queue; carries the attempt number.
    Retry(u32),
    /// Budget exhausted; write the body to the dump directory.
    Dump,
}

/// Failure counter per analysis id.
///
/// Grows for the lifetime of the process; entries are never evicted, which
/// also means a dumped analysis that reappears keeps dumping immediately.
#[derive(Debug, Default)]
pub struct RetryLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, analysis_id: &str) -> RetryDecision {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(analysis_id.to_string()).or_insert(0);
        *count += 1;

        if *count > RETRY_BUDGET {
            RetryDecision::Dump
        } else {
            RetryDecision::Retry(*count)
        }
    }
}

/// On-disk store for messages that exhausted their retry budget.
///
/// File names are `<unix-seconds>_<counter>`; selection and write happen
/// under one lock so concurrent dumps cannot race to the same path.
pub struct DumpStore {
    dir: PathBuf,
    lock: AsyncMutex<()>,
}

impl DumpStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Startup check: a create/write/read/delete round-trip of a sentinel
    /// file. A worker with an unusable dump directory must not consume.
    pub fn validate(&self) -> Result<(), DumpError> {
        let sentinel = self.dir.join("__test");
        let content: &[u8] = b"dump directory self-test";

        let round_trip = || -> std::io::Result<()> {
            fs::write(&sentinel, content)?;
            let read_back = fs::read(&sentinel)?;
            if read_back != content {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "sentinel content mismatch",
                ));
            }
            fs::remove_file(&sentinel)?;
            Ok(())
        };

        round_trip().map_err(|source| DumpError::Validation {
            path: self.dir.clone(),
            source,
        })
    }

    /// Writes one message body under a fresh dump file name.
    pub async fn write(&self, body: &[u8]) -> Result<PathBuf, DumpError> {
        let _guard = self.lock.lock().await;

        let path = next_free_path(&self.dir, Utc::now().timestamp());
        fs::write(&path, body).map_err(|source| DumpError::Write {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }

    /// Lists the regular files currently dumped, oldest name first.
    pub fn collect(&self) -> Result<Vec<PathBuf>, DumpError> {
        let scan_error = |source| DumpError::Scan {
            path: self.dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(scan_error)? {
            let path = entry.map_err(scan_error)?.path();
            if path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

fn next_free_path(dir: &Path, unix_seconds: i64) -> PathBuf {
    let mut counter = 0;
    loop {
        let candidate = dir.join(format!("{unix_seconds}_{counter}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Failed-envelope bodies are sometimes JSON-encoded a second time on
/// their way through a producer; unwrap the quoting before republishing.
fn unquote(msg: &str) -> Cow<'_, str> {
    serde_json::from_str::<String>(msg)
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed(msg))
}

pub struct Overseer {
    core: Arc<Core>,
    dump: DumpStore,
    retries: RetryLedger,
    producers: AsyncMutex<HashMap<String, QueueHandle>>,
}

impl Overseer {
    /// Builds the overseer, validating the dump directory up front.
    pub fn new(core: Arc<Core>, config: &OverseerConfig) -> Result<Self, WorkerError> {
        let dump = DumpStore::new(&config.dump_dir);
        dump.validate()?;

        Ok(Self {
            core,
            dump,
            retries: RetryLedger::new(),
            producers: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Consumes the failed queue until the process is terminated.
    pub async fn run(self, queue: &str, prefetch: u16) -> Result<(), WorkerError> {
        let worker = Arc::new(self);
        let mut consumer = worker.core.consume(queue, prefetch).await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(|source| BusError::Delivery {
                queue: queue.to_string(),
                source,
            })?;
            info!("received a message");

            let failed = match serde_json::from_slice::<FailedEnvelope>(&delivery.data) {
                Ok(failed) => failed,
                Err(err) => {
                    info!("could not decode the failed envelope: {err}");
                    worker.dump_delivery(delivery).await;
                    continue;
                }
            };

            let handler = Arc::clone(&worker);
            tokio::spawn(async move { handler.handle_failed(failed, delivery).await });
        }

        Err(BusError::ConsumerClosed {
            queue: queue.to_string(),
        }
        .into())
    }

    async fn handle_failed(&self, failed: FailedEnvelope, delivery: Delivery) {
        // the embedded body's shape depends on its origin queue; all that
        // matters here is the repository context
        let context = match serde_json::from_str::<GenericEnvelope>(&failed.msg) {
            Ok(envelope) => envelope.crits_data,
            Err(err) => {
                info!("could not decode the embedded message body: {err}");
                self.dump_delivery(delivery).await;
                return;
            }
        };
        let Some(context) = context else {
            info!("no repository context in the failed message");
            self.dump_delivery(delivery).await;
            return;
        };

        match self.retries.register(&context.analysis_id) {
            RetryDecision::Dump => {
                info!(
                    "message for [{}] failed {RETRY_BUDGET} times, dumping",
                    context.analysis_id
                );
                self.dump_delivery(delivery).await;
            }
            RetryDecision::Retry(attempt) => {
                info!(
                    "republishing [{}] to {} (attempt {attempt}/{RETRY_BUDGET})",
                    context.analysis_id, failed.queue
                );
                sleep(RETRY_DELAY).await;
                self.resubmit(&failed).await;
                ack(&delivery).await;
            }
        }
    }

    /// Republishes the embedded original body onto its origin queue,
    /// reusing producer handles across messages.
    async fn resubmit(&self, failed: &FailedEnvelope) {
        let body = unquote(&failed.msg);

        let mut producers = self.producers.lock().await;
        if !producers.contains_key(&failed.queue) {
            match self.core.declare_queue(&failed.queue).await {
                Ok(handle) => {
                    producers.insert(failed.queue.clone(), handle);
                }
                Err(err) => {
                    error!("{err}");
                    std::process::exit(1);
                }
            }
        }

        if let Some(producer) = producers.get(&failed.queue) {
            producer.send(body.as_bytes()).await;
        }
    }

    async fn dump_delivery(&self, delivery: Delivery) {
        match self.dump.write(&delivery.data).await {
            Ok(path) => {
                info!("dumped the message to {}", path.display());
                ack(&delivery).await;
            }
            Err(err) => {
                // an overseer that cannot dump would silently eat messages
                error!("{err}");
                std::process::exit(1);
            }
        }
    }
}

/// Operator recovery: replays every dumped file onto the failed queue and
/// removes it, so the overseer can route the messages afresh.
pub async fn resubmit_dumped(
    core: &Core,
    dump: &DumpStore,
    failed_queue: &str,
) -> Result<(), WorkerError> {
    let handle = core.declare_queue(failed_queue).await?;
    let files = dump.collect()?;
    info!(
        "resubmitting {} dumped messages to {failed_queue}",
        files.len()
    );

    for path in files {
        let body = fs::read(&path).map_err(|source| DumpError::Read {
            path: path.clone(),
            source,
        })?;
        handle.send(&body).await;

        if let Err(err) = fs::remove_file(&path) {
            warn!("could not remove {}: {err}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fourth_failure_dumps() {
        let ledger = RetryLedger::new();
        assert_eq!(ledger.register("a"), RetryDecision::Retry(1));
        assert_eq!(ledger.register("a"), RetryDecision::Retry(2));
        assert_eq!(ledger.register("a"), RetryDecision::Retry(3));
        assert_eq!(ledger.register("a"), RetryDecision::Dump);
        assert_eq!(ledger.register("a"), RetryDecision::Dump);
    }

    #[test]
    fn ledger_counts_analyses_independently() {
        let ledger = RetryLedger::new();
        ledger.register("a");
        ledger.register("a");
        assert_eq!(ledger.register("b"), RetryDecision::Retry(1));
    }

    #[test]
    fn unquote_unwraps_quoted_bodies_only() {
        assert_eq!(unquote(r#"{"TaskId":1}"#), r#"{"TaskId":1}"#);
        assert_eq!(unquote(r#""{\"TaskId\":1}""#), r#"{"TaskId":1}"#);
        assert_eq!(unquote("not json"), "not json");
    }

    #[test]
    fn next_free_path_increments_past_existing_files() {
        let dir = tempdir().unwrap();
        assert_eq!(
            next_free_path(dir.path(), 1700000000),
            dir.path().join("1700000000_0")
        );

        fs::write(dir.path().join("1700000000_0"), b"x").unwrap();
        fs::write(dir.path().join("1700000000_1"), b"y").unwrap();
        assert_eq!(
            next_free_path(dir.path(), 1700000000),
            dir.path().join("1700000000_2")
        );
    }

    #[test]
    fn validation_fails_on_a_missing_directory() {
        let dir = tempdir().unwrap();
        let store = DumpStore::new(dir.path().join("does-not-exist"));
        assert!(store.validate().is_err());

        let usable = DumpStore::new(dir.path());
        assert!(usable.validate().is_ok());
        // the sentinel is cleaned up again
        assert!(usable.collect().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_collect_round_trips_the_body() {
        let dir = tempdir().unwrap();
        let store = DumpStore::new(dir.path());

        let first = store.write(b"body one").await.unwrap();
        let second = store.write(b"body two").await.unwrap();
        assert_ne!(first, second);

        let files = store.collect().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(&first).unwrap(), b"body one");
        assert_eq!(fs::read(&second).unwrap(), b"body two");
    }
}
