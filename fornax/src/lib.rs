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

//! # Fornax
//!
//! A distributed malware-analysis orchestration pipeline. Fornax sits
//! between a threat-intelligence repository that dispatches analysis work
//! and a slow, capacity-limited analysis sandbox, decoupling the two with
//! a durable message bus.
//!
//! Four worker roles cooperate through named queues; no worker calls
//! another directly and there is no shared database:
//!
//! - **feeder** — admission-controls and uploads samples to the sandbox
//! - **watcher** — polls the sandbox until an analysis is `reported`
//! - **reporter** — shapes the report into a repository result batch
//! - **overseer** — retries failed messages, dead-lettering them to disk
//!   once the retry budget is spent
//!
//! Every role is horizontally scalable; running more instances of a role
//! raises throughput until the sandbox or the repository saturates. A
//! message belongs to exactly one worker from delivery until it is
//! acknowledged or handed to the overseer via the nack-on-error contract,
//! so a crashed worker loses nothing: the broker redelivers.
//!
//! The crate is organized leaves-first: [`core`] (bus, HTTP, logging
//! context), the [`sandbox`] and [`repository`] clients, then the
//! [`workers`]. The binaries in `fornax-workers` are thin mains over
//! these types.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod messages;
pub mod repository;
pub mod sandbox;
pub mod workers;

pub use crate::config::{load_config, FeederConfig, OverseerConfig, ReporterConfig, WatcherConfig};
pub use crate::core::{Bus, Core, QueueHandle};
pub use crate::error::{
    BusError, ConfigError, DumpError, RepositoryError, SandboxError, ValidationError, WorkerError,
};
pub use crate::messages::{
    FailedEnvelope, GenericEnvelope, ReadyTask, RepositoryContext, SamplePayload,
    SubmissionRequest, TaskHandle,
};
pub use crate::repository::{RepositoryClient, ResultKind, ResultRecord};
pub use crate::sandbox::{SandboxClient, SandboxStatus};
