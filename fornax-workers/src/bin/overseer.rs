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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use fornax::workers::overseer::{resubmit_dumped, DumpStore, Overseer, SERVICE};
use fornax::{load_config, logging, Core, OverseerConfig};

/// Retries failed messages and dead-letters them to disk.
#[derive(Parser)]
#[command(name = SERVICE)]
struct Cli {
    /// Path to the config file (defaults to overseer.conf.json beside the
    /// binary).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay every file in the dump dir onto the failed queue, then exit.
    #[arg(long)]
    resubmit_dumped: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: OverseerConfig = load_config(SERVICE, cli.config.as_deref())?;
    logging::init(&config.log_file, &config.log_level).context("failed to set up logging")?;

    // the overseer's own failures route back onto the queue it consumes
    let core = Arc::new(Core::init(SERVICE, &config.amqp, &config.consumer_queue, true).await?);

    if cli.resubmit_dumped {
        let dump = DumpStore::new(&config.dump_dir);
        dump.validate()?;
        resubmit_dumped(&core, &dump, &config.consumer_queue).await?;
        return Ok(());
    }

    let overseer = Overseer::new(Arc::clone(&core), &config)?;
    overseer
        .run(&config.consumer_queue, config.prefetch_count)
        .await?;

    Ok(())
}
