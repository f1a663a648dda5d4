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

//! Shared worker core.
//!
//! [`Core`] bundles what every worker needs: its service identity, the bus
//! connection, the shared HTTP client, and a handle to its `failed` queue.
//! Workers and service clients receive the core (or pieces of it) as an
//! explicit dependency; there is no global state.
//!
//! The central failure primitive lives here too: [`Core::nack_on_error`]
//! implements the nack-on-error contract that hands broken messages to the
//! overseer instead of dropping them.

pub mod bus;
pub mod http;

use std::fmt::Display;

use lapin::message::Delivery;
use lapin::options::BasicNackOptions;
use lapin::Consumer;
use tracing::{info, warn};

use crate::error::{BusError, WorkerError};
use crate::messages::{FailedEnvelope, RepositoryContext};
use crate::repository::RepositoryClient;
use crate::sandbox::SandboxClient;

pub use bus::{Bus, QueueHandle};

/// Per-process context shared by a worker's tasks.
pub struct Core {
    service: String,
    bus: Bus,
    http: reqwest::Client,
    failed: QueueHandle,
}

impl Core {
    /// Connects to the bus, declares the service's `failed` queue, and
    /// builds the shared HTTP client.
    pub async fn init(
        service: impl Into<String>,
        amqp_uri: &str,
        failed_queue: &str,
        verify_ssl: bool,
    ) -> Result<Self, WorkerError> {
        let service = service.into();

        info!("connecting to the bus...");
        let bus = Bus::connect(amqp_uri).await?;
        let failed = bus.declare_queue(failed_queue).await?;
        let http = http::build_client(verify_ssl).map_err(WorkerError::Http)?;

        Ok(Self {
            service,
            bus,
            http,
            failed,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn declare_queue(&self, queue: &str) -> Result<QueueHandle, BusError> {
        self.bus.declare_queue(queue).await
    }

    pub async fn consume(&self, queue: &str, prefetch: u16) -> Result<Consumer, BusError> {
        self.bus.open_consumer(queue, prefetch).await
    }

    /// Builds a sandbox client sharing this worker's HTTP client.
    pub fn sandbox(&self, base_url: &str) -> SandboxClient {
        SandboxClient::new(self.http.clone(), base_url)
    }

    /// Builds a repository client for the given analysis context.
    pub fn repository(&self, context: RepositoryContext) -> RepositoryClient {
        RepositoryClient::new(self.http.clone(), context)
    }

    /// The nack-on-error contract.
    ///
    /// On `Ok` the value is passed through untouched. On `Err` a
    /// [`FailedEnvelope`] capturing the service, the queue the delivery was
    /// routed on, the error, `desc`, and the raw body is published to the
    /// `failed` queue; the delivery is negatively acknowledged without
    /// requeue; and `None` tells the caller to stop processing the message.
    pub async fn nack_on_error<T, E: Display>(
        &self,
        result: Result<T, E>,
        desc: &str,
        delivery: &Delivery,
    ) -> Option<T> {
        let err = match result {
            Ok(value) => return Some(value),
            Err(err) => err,
        };

        warn!("[nack] {desc} {err}");

        let envelope = FailedEnvelope {
            service: self.service.clone(),
            queue: delivery.routing_key.as_str().to_string(),
            error: err.to_string(),
            desc: desc.to_string(),
            msg: String::from_utf8_lossy(&delivery.data).into_owned(),
        };

        match serde_json::to_vec(&envelope) {
            Ok(body) => self.failed.send(&body).await,
            Err(err) => warn!("could not encode the failed envelope: {err}"),
        }

        let options = BasicNackOptions {
            multiple: false,
            requeue: false,
        };
        if let Err(err) = delivery.acker.nack(options).await {
            warn!("sending the nack failed: {err}");
        }

        None
    }
}
