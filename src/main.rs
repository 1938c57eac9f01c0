//! # Shard Manager CLI
//!
//! ## Usage
//!
//! ```bash
//! # Supervise four demo workers, logging their stats every 30 seconds
//! shard-manager run --shards 4 --stats-interval-secs 30
//!
//! # Use a config file
//! shard-manager run --config ./shard-manager.yaml
//! ```
//!
//! The `worker` subcommand is what the manager starts for each shard when the
//! config names no other worker program.

use std::{
    io::{self, IsTerminal},
    sync::Arc,
    time::Duration
};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Map;
use shard_manager::{
    Cli, Commands, RunArgs, ShardFleet, SnowflakePartitioner, WorkerCommand, WorkerRuntime,
    adapter::ProcessLauncher,
    config::load_config,
    domain::constant::manager,
    worker::{EchoHandler, StaticValues}
};
use tracing::{Level, event};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_manager(args).await,
        Commands::Worker => run_worker().await
    }
}

/// Install the stderr subscriber; `RUST_LOG` overrides the configured level
fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

async fn run_manager(args: RunArgs) -> Result<()> {
    let config = args.apply(load_config(args.config.as_deref())?);
    config.validate()?;
    init_tracing(&config.log_level)?;

    let command = match config.worker.clone() {
        Some(command) => command,
        None => WorkerCommand::current_exe_worker()?
    };

    let fleet = ShardFleet::start(config, Arc::new(ProcessLauncher::new(command)), Arc::new(SnowflakePartitioner))
        .await
        .context("Failed to start the shard manager")?;

    match args.stats_interval_secs.filter(|secs| *secs > 0) {
        Some(secs) => {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => log_stats(&fleet).await
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
        }
    }

    event!(Level::INFO, event = manager::MANAGER_STOPPED, message = "interrupted");
    fleet.shutdown().await;
    Ok(())
}

async fn log_stats(fleet: &ShardFleet) {
    match fleet.get_stats(None).await {
        Ok(replies) => {
            for reply in replies {
                event!(Level::INFO, event = manager::VALUES_REQUESTED, shard = %reply.shard,
                       stats = ?reply.values());
            }
        }
        Err(e) => {
            event!(Level::WARN, event = manager::VALUES_REQUESTED, error = %e,
                   partial = %e.partial_replies().len());
        }
    }
}

/// Demo worker: reports its built-in values and echoes interactions
async fn run_worker() -> Result<()> {
    init_tracing("warn")?;

    let runtime = WorkerRuntime::from_env(Arc::new(StaticValues(Map::new())), Arc::new(EchoHandler))?;
    runtime.run(tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}
