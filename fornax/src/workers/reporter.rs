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

//! Reporter: shapes finished analyses into repository result batches.
//!
//! For every ready task the reporter downloads the report, turns the
//! enabled sections into result records, optionally walks the
//! dropped-files archive (uploading each regular file and linking it to
//! the analyzed sample), and pushes the whole batch in one call.
//!
//! The dropped-files walk is best-effort: a mid-stream failure keeps the
//! records collected so far instead of aborting the message. Everything
//! the repository requires — the report fetch and the batch push — goes
//! through nack-on-error.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bzip2::read::BzDecoder;
use futures::StreamExt;
use lapin::message::Delivery;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use tar::Archive;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::ack;
use crate::config::ReporterConfig;
use crate::core::{Core, QueueHandle};
use crate::error::{BusError, DroppedError, RepositoryError, WorkerError};
use crate::messages::ReadyTask;
use crate::repository::{RepositoryClient, ResultKind, ResultRecord};
use crate::sandbox::report::{Behavior, ReportInfo, Signature};
use crate::sandbox::SandboxClient;

pub const SERVICE: &str = "reporter";

/// The sandbox flips a task to `reported` while the report file may still
/// be flushing; wait this long before fetching it.
const REPORT_WARM_UP: Duration = Duration::from_secs(5);

/// Pause around repository sample uploads; its API front end falls over
/// under back-to-back traffic.
const UPLOAD_PAUSE: Duration = Duration::from_secs(1);

/// Which report sections get shaped into records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserSet {
    pub info: bool,
    pub signatures: bool,
    pub behavior: bool,
    pub dropped: bool,
}

impl ParserSet {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = Self::default();
        for name in names {
            match name.as_ref() {
                "info" => set.info = true,
                "signatures" => set.signatures = true,
                "behavior" => set.behavior = true,
                "dropped" => set.dropped = true,
                unknown => warn!("ignoring unknown parser {unknown:?} in the configuration"),
            }
        }
        set
    }
}

pub struct Reporter {
    core: Arc<Core>,
    producer: Option<QueueHandle>,
    parsers: ParserSet,
    push_api_calls_max: usize,
    cleanup: bool,
}

impl Reporter {
    pub async fn new(core: Arc<Core>, config: &ReporterConfig) -> Result<Self, WorkerError> {
        let producer = if config.producer_queue.is_empty() {
            None
        } else {
            Some(core.declare_queue(&config.producer_queue).await?)
        };

        Ok(Self {
            core,
            producer,
            parsers: ParserSet::from_names(&config.enabled_parsers),
            push_api_calls_max: config.push_api_calls_max,
            cleanup: config.cuckoo_cleanup,
        })
    }

    /// Consumes the ready queue until the process is terminated.
    pub async fn run(self, queue: &str, prefetch: u16) -> Result<(), WorkerError> {
        let worker = Arc::new(self);
        let mut consumer = worker.core.consume(queue, prefetch).await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(|source| BusError::Delivery {
                queue: queue.to_string(),
                source,
            })?;
            info!("received a message");
            Arc::clone(&worker).accept(delivery).await;
        }

        Err(BusError::ConsumerClosed {
            queue: queue.to_string(),
        }
        .into())
    }

    async fn accept(self: Arc<Self>, delivery: Delivery) {
        let decoded = serde_json::from_slice::<ReadyTask>(&delivery.data);
        let task = match self
            .core
            .nack_on_error(decoded, "Could not decode json!", &delivery)
            .await
        {
            Some(task) => task,
            None => return,
        };

        if self
            .core
            .nack_on_error(
                task.validate(),
                "Error in msg from the watcher service!",
                &delivery,
            )
            .await
            .is_none()
        {
            return;
        }

        // concurrent repository connections are bounded by the prefetch
        let worker = Arc::clone(&self);
        tokio::spawn(async move { worker.process(task, delivery).await });
    }

    async fn process(&self, task: ReadyTask, delivery: Delivery) {
        let started = Instant::now();

        sleep(REPORT_WARM_UP).await;

        let Some(context) = task.crits_data.clone() else {
            return;
        };
        let sandbox = self.core.sandbox(&task.cuckoo_url);
        let repository = self.core.repository(context);

        let report = match self
            .core
            .nack_on_error(
                sandbox.task_report(task.task_id).await,
                "Couldn't load the report from the sandbox!",
                &delivery,
            )
            .await
        {
            Some(report) => report,
            None => return,
        };

        let mut records = Vec::new();
        if self.parsers.info {
            records.extend(shape_info(report.info.as_ref()));
        }
        if self.parsers.signatures {
            records.extend(shape_signatures(&report.signatures));
        }
        if self.parsers.behavior {
            records.extend(shape_behavior(
                report.behavior.as_ref(),
                self.push_api_calls_max,
            ));
        }
        if self.parsers.dropped {
            let (dropped, err) = self
                .push_dropped(&sandbox, &repository, task.task_id)
                .await;
            if let Some(err) = err {
                warn!(
                    "dropped-file upload stopped early after {} files: {err}",
                    dropped.len()
                );
            }
            records.extend(dropped);
        }

        if self
            .core
            .nack_on_error(
                repository.add_results(&records).await,
                "Adding results to the repository failed!",
                &delivery,
            )
            .await
            .is_none()
        {
            return;
        }

        if self.cleanup {
            if let Err(err) = sandbox.delete_task(task.task_id).await {
                warn!("cleaning up the sandbox job failed: {err}");
            }
        }

        if let Some(producer) = &self.producer {
            // chain the untouched ready message to the next reporter
            producer.send(&delivery.data).await;
        }

        info!(
            "finished object {} [sandbox task {}] in {:?}",
            repository.context().object_id,
            task.task_id,
            started.elapsed()
        );
        ack(&delivery).await;
    }

    /// Uploads every regular file of the dropped archive and emits a
    /// `file_added` record per upload. Returns the records collected plus
    /// the error that ended the walk early, if any.
    async fn push_dropped(
        &self,
        sandbox: &SandboxClient,
        repository: &RepositoryClient,
        task_id: i64,
    ) -> (Vec<ResultRecord>, Option<DroppedError>) {
        let started = Instant::now();
        let mut records = Vec::new();

        let archive = match sandbox.dropped(task_id).await {
            Ok(bytes) => bytes,
            Err(err) => return (records, Some(err.into())),
        };

        let (files, archive_err) = extract_regular_files(&archive);

        for file in files {
            let uploaded = repository.new_sample(&file.name, &file.data).await;
            sleep(UPLOAD_PAUSE).await;

            let object_id = match uploaded {
                Ok(id) => id,
                Err(RepositoryError::EmptyFile) => continue,
                Err(err) => return (records, Some(err.into())),
            };

            if let Err(err) = repository.forge_relationship(&object_id).await {
                return (records, Some(err.into()));
            }
            sleep(UPLOAD_PAUSE).await;

            let mut attributes = Map::new();
            attributes.insert(
                "md5".to_string(),
                Value::String(format!("{:x}", Md5::digest(&file.data))),
            );
            records.push(ResultRecord::new(
                ResultKind::FileAdded,
                file.name,
                Some(attributes),
            ));
        }

        debug!(
            "uploaded {} dropped files in {:?} [{}]",
            records.len(),
            started.elapsed(),
            repository.context().analysis_id
        );
        (records, archive_err)
    }
}

/// A regular file pulled out of the dropped archive.
struct DroppedFile {
    name: String,
    data: Vec<u8>,
}

/// Decodes the bzip2 tar archive, keeping regular files only. Directory,
/// symlink, and other special entries carry no payload worth uploading.
/// Returns whatever was extracted before a corrupt archive cut the walk
/// short, plus the error itself.
fn extract_regular_files(bytes: &[u8]) -> (Vec<DroppedFile>, Option<DroppedError>) {
    let decoder = BzDecoder::new(Cursor::new(bytes));
    let mut archive = Archive::new(decoder);
    let mut files = Vec::new();

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(err) => return (files, Some(err.into())),
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err) => return (files, Some(err.into())),
        };

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(name) = Path::new(&raw_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            continue;
        };

        let mut data = Vec::new();
        if let Err(err) = entry.read_to_end(&mut data) {
            return (files, Some(err.into()));
        }

        files.push(DroppedFile { name, data });
    }

    (files, None)
}

/// Shapes the report's info section: one record carrying the analysis
/// machine plus the run's timing.
fn shape_info(info: Option<&ReportInfo>) -> Vec<ResultRecord> {
    let Some(info) = info else {
        return Vec::new();
    };

    let mut attributes = Map::new();
    attributes.insert("started".to_string(), Value::String(info.started.clone()));
    attributes.insert("ended".to_string(), Value::String(info.ended.clone()));
    attributes.insert(
        "analysis_id".to_string(),
        Value::String(info.id.to_string()),
    );

    vec![ResultRecord::new(
        ResultKind::Info,
        info.machine_name(),
        Some(attributes),
    )]
}

/// Shapes matched signatures: one record per signature, keyed by its
/// description.
fn shape_signatures(signatures: &[Signature]) -> Vec<ResultRecord> {
    signatures
        .iter()
        .map(|signature| {
            let mut attributes = Map::new();
            attributes.insert(
                "severity".to_string(),
                Value::String(signature.severity.to_string()),
            );
            attributes.insert("name".to_string(), Value::String(signature.name.clone()));

            ResultRecord::new(
                ResultKind::Signature,
                signature.description.clone(),
                Some(attributes),
            )
        })
        .collect()
}

/// Shapes the behavior section: processes first, then api calls up to the
/// global cap, then the summary lists.
fn shape_behavior(behavior: Option<&Behavior>, api_call_cap: usize) -> Vec<ResultRecord> {
    let Some(behavior) = behavior else {
        return Vec::new();
    };
    let mut records = Vec::new();

    for process in &behavior.processes {
        let mut attributes = Map::new();
        attributes.insert(
            "process_id".to_string(),
            Value::String(process.id.to_string()),
        );
        attributes.insert(
            "parent_id".to_string(),
            Value::String(process.parent_id.to_string()),
        );
        attributes.insert(
            "first_seen".to_string(),
            Value::String(process.first_seen.clone()),
        );

        records.push(ResultRecord::new(
            ResultKind::Process,
            process.name.clone(),
            Some(attributes),
        ));
    }

    // separate pass so processes stay grouped ahead of their calls
    let mut pushed = 0;
    'processes: for process in &behavior.processes {
        let description = format!("{} ({})", process.name, process.id);

        for call in &process.calls {
            if pushed >= api_call_cap {
                break 'processes;
            }

            let mut attributes = Map::new();
            attributes.insert("category".to_string(), Value::String(call.category.clone()));
            attributes.insert("status".to_string(), Value::Bool(call.status));
            attributes.insert(
                "return".to_string(),
                Value::String(call.return_value.clone()),
            );
            attributes.insert(
                "timestamp".to_string(),
                Value::String(call.timestamp.clone()),
            );
            attributes.insert(
                "thread_id".to_string(),
                Value::String(call.thread_id.clone()),
            );
            attributes.insert("repeated".to_string(), Value::from(call.repeated));
            attributes.insert("api".to_string(), Value::String(call.api.clone()));
            attributes.insert("id".to_string(), Value::from(call.id));
            attributes.insert("process".to_string(), Value::String(description.clone()));
            attributes.insert(
                "arguments".to_string(),
                serde_json::to_value(&call.arguments).unwrap_or_default(),
            );

            records.push(ResultRecord::new(
                ResultKind::ApiCall,
                call.api.clone(),
                Some(attributes),
            ));
            pushed += 1;
        }
    }

    if let Some(summary) = behavior.summary.as_ref() {
        for file in &summary.files {
            records.push(ResultRecord::new(ResultKind::File, file.clone(), None));
        }
        for key in &summary.keys {
            records.push(ResultRecord::new(ResultKind::RegistryKey, key.clone(), None));
        }
        for mutex in &summary.mutexes {
            records.push(ResultRecord::new(ResultKind::Mutex, mutex.clone(), None));
        }
    }

    records
}
