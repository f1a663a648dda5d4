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

//! AMQP bus plumbing.
//!
//! One long-lived connection per worker; one channel per declared queue.
//! Queues are durable, not exclusive, and not auto-deleted, so they and
//! their messages survive broker restarts. Publishes are persistent with
//! content-type `text/plain`; consumers use manual acknowledgement with a
//! caller-chosen prefetch count.

use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, error, info, warn};

use crate::error::BusError;

/// Persistent delivery mode per AMQP 0.9.1.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Bodies longer than this are truncated in dispatch log lines.
const LOG_BODY_LIMIT: usize = 700;

/// A long-lived connection to the message broker.
pub struct Bus {
    connection: Connection,
}

impl Bus {
    pub async fn connect(uri: &str) -> Result<Self, BusError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|source| BusError::Connect {
                uri: uri.to_string(),
                source,
            })?;

        Ok(Self { connection })
    }

    /// Opens a channel and declares a durable queue on it, returning a
    /// handle for publishing.
    pub async fn declare_queue(&self, queue: &str) -> Result<QueueHandle, BusError> {
        if queue.is_empty() {
            warn!("queue name is empty; the broker will pick one");
        }
        debug!("creating a new queue handle for {queue}");

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(BusError::Channel)?;

        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|source| BusError::Declare {
                queue: queue.to_string(),
                source,
            })?;

        Ok(QueueHandle {
            queue: queue.to_string(),
            channel,
        })
    }

    /// Declares `queue` and registers a manually-acknowledging consumer on
    /// it with the given prefetch count.
    pub async fn open_consumer(&self, queue: &str, prefetch: u16) -> Result<Consumer, BusError> {
        debug!("starting to consume on {queue}");

        let handle = self.declare_queue(queue).await?;
        handle
            .channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(BusError::Qos)?;

        let consumer = handle
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BusError::Consume {
                queue: queue.to_string(),
                source,
            })?;

        info!("consuming on {queue}; waiting for deliveries...");
        Ok(consumer)
    }
}

/// Publishing handle for one declared queue.
pub struct QueueHandle {
    queue: String,
    channel: Channel,
}

impl QueueHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publishes a persistent message, terminating the process on failure.
    ///
    /// Bus-channel liveness is presumed throughout the pipeline: a worker
    /// that cannot publish cannot make progress without losing work, so it
    /// exits and lets the broker redeliver everything unacknowledged.
    pub async fn send(&self, body: &[u8]) {
        if let Err(err) = self.try_publish(body).await {
            error!("{err}");
            std::process::exit(1);
        }
    }

    async fn try_publish(&self, body: &[u8]) -> Result<(), BusError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type("text/plain".into());

        let to_publish_error = |source| BusError::Publish {
            queue: self.queue.clone(),
            source,
        };

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(to_publish_error)?
            .await
            .map_err(to_publish_error)?;

        info!("dispatched {}", preview(body));
        Ok(())
    }
}

/// Renders a message body for log output, truncating long bodies.
fn preview(body: &[u8]) -> String {
    if body.len() > LOG_BODY_LIMIT {
        format!("{} [...]", String::from_utf8_lossy(&body[..LOG_BODY_LIMIT]))
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_bodies_whole() {
        assert_eq!(preview(b"{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let body = vec![b'x'; LOG_BODY_LIMIT + 50];
        let rendered = preview(&body);
        assert!(rendered.ends_with(" [...]"));
        assert_eq!(rendered.len(), LOG_BODY_LIMIT + " [...]".len());
    }
}
