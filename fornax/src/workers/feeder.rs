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

//! Feeder: admission control and sample upload.
//!
//! Consumes submission requests, holds each one until the sandbox has
//! capacity, uploads the sample, and hands the resulting task id to the
//! watcher. The admission loop is the pipeline's only backpressure against
//! sandbox saturation: because every in-flight submission keeps its
//! delivery unacknowledged, the prefetch count bounds how much work a
//! feeder can hold while the sandbox is busy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use lapin::message::Delivery;
use tokio::time::sleep;
use tracing::info;

use super::ack;
use crate::config::FeederConfig;
use crate::core::{Core, QueueHandle};
use crate::error::{BusError, WorkerError};
use crate::messages::{RepositoryContext, SubmissionRequest, TaskHandle};
use crate::sandbox::{SandboxClient, SandboxStatus};

pub const SERVICE: &str = "feeder";

/// Pause between admission-control polls while the sandbox is saturated.
const SLOWDOWN_PAUSE: Duration = Duration::from_secs(30);

/// Minimum free space in the analyses partition before submissions are
/// held back (when `CheckFreeSpace` is on).
const FREE_SPACE_FLOOR: u64 = 256 * 1024 * 1024;

pub struct Feeder {
    core: Arc<Core>,
    sandbox: SandboxClient,
    producer: QueueHandle,
    max_pending: i64,
    check_free_space: bool,
}

impl Feeder {
    pub async fn new(core: Arc<Core>, config: &FeederConfig) -> Result<Self, WorkerError> {
        let sandbox = core.sandbox(&config.cuckoo_url);
        let producer = core.declare_queue(&config.producer_queue).await?;

        Ok(Self {
            core,
            sandbox,
            producer,
            max_pending: config.max_pending,
            check_free_space: config.check_free_space,
        })
    }

    /// Consumes the submit queue until the process is terminated.
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

    /// Decodes and validates a submission, then moves the slow part onto
    /// its own task so the consume loop keeps draining.
    async fn accept(self: Arc<Self>, delivery: Delivery) {
        let decoded = serde_json::from_slice::<SubmissionRequest>(&delivery.data);
        let request = match self
            .core
            .nack_on_error(decoded, "Could not decode json!", &delivery)
            .await
        {
            Some(request) => request,
            None => return,
        };

        if self
            .core
            .nack_on_error(
                request.validate(),
                "Error in msg from the repository dispatcher!",
                &delivery,
            )
            .await
            .is_none()
        {
            return;
        }

        let SubmissionRequest {
            payload,
            file,
            crits_data,
        } = request;
        let (Some(file), Some(context)) = (file, crits_data) else {
            return;
        };

        let decoded = BASE64.decode(file.data.as_bytes());
        let file_bytes = match self
            .core
            .nack_on_error(decoded, "Couldn't decode the sample payload!", &delivery)
            .await
        {
            Some(bytes) => bytes,
            None => return,
        };

        let worker = Arc::clone(&self);
        tokio::spawn(async move {
            worker
                .submit(file.name, payload, context, file_bytes, delivery)
                .await;
        });
    }

    /// Waits for sandbox capacity, uploads the sample, and publishes the
    /// task handle to the pending queue.
    async fn submit(
        &self,
        file_name: String,
        params: HashMap<String, String>,
        context: RepositoryContext,
        file_bytes: Vec<u8>,
        delivery: Delivery,
    ) {
        loop {
            let status = match self
                .core
                .nack_on_error(
                    self.sandbox.status().await,
                    "Could not query the sandbox status!",
                    &delivery,
                )
                .await
            {
                Some(status) => status,
                None => return,
            };

            if !at_capacity(&status, self.max_pending, self.check_free_space) {
                break;
            }

            info!(
                "Slowdown: {} pending jobs, {} MB free space",
                status.pending,
                status.free_bytes.unwrap_or(0) / 1024 / 1024
            );
            sleep(SLOWDOWN_PAUSE).await;
        }

        let uploaded = self
            .sandbox
            .new_task(&file_name, file_bytes, &params)
            .await;
        let task_id = match self
            .core
            .nack_on_error(uploaded, "Uploading the sample to the sandbox failed!", &delivery)
            .await
        {
            Some(task_id) => task_id,
            None => return,
        };

        let handle = TaskHandle {
            task_id,
            cuckoo_url: self.sandbox.base_url().to_string(),
            crits_data: Some(context),
        };
        let body = match self
            .core
            .nack_on_error(
                serde_json::to_vec(&handle),
                "Could not encode the task handle!",
                &delivery,
            )
            .await
        {
            Some(body) => body,
            None => return,
        };

        self.producer.send(&body).await;
        ack(&delivery).await;
    }
}

/// Admission-control predicate: the sandbox is saturated while its pending
/// count has reached the limit, or (when enabled) the analyses partition
/// is down to the free-space floor.
fn at_capacity(status: &SandboxStatus, max_pending: i64, check_free_space: bool) -> bool {
    let space_low =
        check_free_space && status.free_bytes.is_some_and(|free| free <= FREE_SPACE_FLOOR);
    status.pending >= max_pending || space_low
}
