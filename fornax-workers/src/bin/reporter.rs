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

use fornax::workers::reporter::{Reporter, SERVICE};
use fornax::{load_config, logging, Core, ReporterConfig};

/// Shapes finished analyses into repository result batches.
#[derive(Parser)]
#[command(name = SERVICE)]
struct Cli {
    /// Path to the config file (defaults to reporter.conf.json beside the
    /// binary).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: ReporterConfig = load_config(SERVICE, cli.config.as_deref())?;
    logging::init(&config.log_file, &config.log_level).context("failed to set up logging")?;

    let core = Arc::new(
        Core::init(
            SERVICE,
            &config.amqp,
            &config.failed_queue,
            config.verify_ssl,
        )
        .await?,
    );

    let reporter = Reporter::new(core, &config).await?;
    reporter
        .run(&config.consumer_queue, config.prefetch_count)
        .await?;

    Ok(())
}
