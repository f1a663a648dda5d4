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

//! The four worker roles of the pipeline.
//!
//! Each worker consumes one queue, holds ownership of every delivery until
//! it is acknowledged or routed to the overseer, and hands slow per-message
//! work to a freshly spawned task so the consume loop keeps draining.
//! Concurrency is bounded by the consumer prefetch count alone.

pub mod feeder;
pub mod overseer;
pub mod reporter;
pub mod watcher;

use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use tracing::warn;

/// Acknowledges a delivery, downgrading failures to a warning: at this
/// point the message's work has already been published, so the worst case
/// of a lost ack is a redelivery into idempotent repository operations.
pub(crate) async fn ack(delivery: &Delivery) {
    if let Err(err) = delivery.acker.ack(BasicAckOptions::default()).await {
        warn!("sending the ack failed: {err}");
    }
}
