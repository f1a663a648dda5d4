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

//! Watcher: polls the sandbox until analyses finish.
//!
//! Accepted task handles go into the watch table keyed by analysis id; the
//! delivery stays unacknowledged until the polling task reaches a terminal
//! disposition for the entry. One background task sweeps the table,
//! pacing its probes so a large table does not hammer the sandbox.
//!
//! The table is mutex-guarded and the lock is never held across a probe:
//! each pass snapshots the entries to probe, then re-locks only to remove
//! an entry once its fate is known.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use tokio::time::sleep;
use tracing::{info, warn};

use super::ack;
use crate::config::WatcherConfig;
use crate::core::{Core, QueueHandle};
use crate::error::{BusError, WorkerError};
use crate::messages::TaskHandle;
use crate::sandbox::STATUS_REPORTED;

pub const SERVICE: &str = "watcher";

/// A watched analysis: the task handle plus the delivery held open for it.
struct WatchEntry {
    handle: TaskHandle,
    delivery: Delivery,
}

/// Snapshot of one entry, taken so probes run without the table lock.
struct ProbeTarget {
    analysis_id: String,
    cuckoo_url: String,
    task_id: i64,
}

pub struct Watcher {
    core: Arc<Core>,
    producer: QueueHandle,
    wait: Duration,
    table: Mutex<HashMap<String, WatchEntry>>,
}

impl Watcher {
    pub async fn new(core: Arc<Core>, config: &WatcherConfig) -> Result<Self, WorkerError> {
        let producer = core.declare_queue(&config.producer_queue).await?;

        Ok(Self {
            core,
            producer,
            wait: Duration::from_secs(config.wait_between_requests),
            table: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the polling task and consumes the pending queue until the
    /// process is terminated.
    pub async fn run(self, queue: &str, prefetch: u16) -> Result<(), WorkerError> {
        let worker = Arc::new(self);

        let poller = Arc::clone(&worker);
        tokio::spawn(async move { poller.poll_loop().await });

        let mut consumer = worker.core.consume(queue, prefetch).await?;
        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(|source| BusError::Delivery {
                queue: queue.to_string(),
                source,
            })?;
            info!("received a message");
            worker.accept(delivery).await;
        }

        Err(BusError::ConsumerClosed {
            queue: queue.to_string(),
        }
        .into())
    }

    /// Decodes and validates a task handle, then parks it in the watch
    /// table. The delivery is deliberately not acknowledged here.
    async fn accept(&self, delivery: Delivery) {
        let decoded = serde_json::from_slice::<TaskHandle>(&delivery.data);
        let handle = match self
            .core
            .nack_on_error(decoded, "Could not decode json!", &delivery)
            .await
        {
            Some(handle) => handle,
            None => return,
        };

        if self
            .core
            .nack_on_error(
                handle.validate(),
                "Error in msg from the feeder service!",
                &delivery,
            )
            .await
            .is_none()
        {
            return;
        }

        let Some(context) = handle.crits_data.as_ref() else {
            return;
        };
        let analysis_id = context.analysis_id.clone();

        let mut table = self.table.lock().unwrap();
        if let Some(previous) = table.insert(analysis_id.clone(), WatchEntry { handle, delivery }) {
            // upstream promises unique analysis ids; the displaced delivery
            // stays unacknowledged until restart
            warn!(
                "analysis id {analysis_id} is already being watched (sandbox task {}); replacing it",
                previous.handle.task_id
            );
        }
    }

    /// Sweeps the watch table forever, probing one entry per pacing
    /// interval. Entries reach a terminal disposition here: handed to the
    /// reporter once `reported`, or nacked on a probe failure.
    async fn poll_loop(&self) {
        loop {
            sleep(self.wait).await;

            let targets: Vec<ProbeTarget> = {
                let table = self.table.lock().unwrap();
                table
                    .iter()
                    .map(|(analysis_id, entry)| ProbeTarget {
                        analysis_id: analysis_id.clone(),
                        cuckoo_url: entry.handle.cuckoo_url.clone(),
                        task_id: entry.handle.task_id,
                    })
                    .collect()
            };

            for target in targets {
                sleep(self.wait).await;

                let sandbox = self.core.sandbox(&target.cuckoo_url);
                match sandbox.task_status(target.task_id).await {
                    Err(err) => self.fail_entry(&target.analysis_id, err).await,
                    Ok(status) if status != STATUS_REPORTED => continue,
                    Ok(_) => self.finish_entry(&target.analysis_id).await,
                }
            }
        }
    }

    fn take_entry(&self, analysis_id: &str) -> Option<WatchEntry> {
        self.table.lock().unwrap().remove(analysis_id)
    }

    async fn fail_entry(&self, analysis_id: &str, err: crate::error::SandboxError) {
        let Some(entry) = self.take_entry(analysis_id) else {
            return;
        };

        let _ = self
            .core
            .nack_on_error(
                Err::<(), _>(err),
                "Couldn't get the sandbox status of the task!",
                &entry.delivery,
            )
            .await;
    }

    async fn finish_entry(&self, analysis_id: &str) {
        let Some(entry) = self.take_entry(analysis_id) else {
            return;
        };

        // the handle doubles as the ready-task message
        let body = match serde_json::to_vec(&entry.handle) {
            Ok(body) => body,
            Err(err) => {
                let _ = self
                    .core
                    .nack_on_error(
                        Err::<(), _>(err),
                        "Could not encode the ready task!",
                        &entry.delivery,
                    )
                    .await;
                return;
            }
        };

        self.producer.send(&body).await;
        ack(&entry.delivery).await;
    }
}
