//! CLI argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ManagerConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    /// Supervise a fleet of shard workers until interrupted
    Run(RunArgs),
    /// Serve one shard over stdin/stdout (started by the manager)
    Worker
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to the YAML config file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of shard workers
    #[arg(short, long)]
    pub shards: Option<u32>,

    /// Deadline for every correlated request, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Leave crashed workers down
    #[arg(long)]
    pub no_respawn: bool,

    /// Log fleet stats at this period
    #[arg(long, value_name = "SECS")]
    pub stats_interval_secs: Option<u64>
}

impl RunArgs {
    /// Command-line flags take precedence over the config file
    pub fn apply(&self, mut config: ManagerConfig) -> ManagerConfig {
        if let Some(shards) = self.shards {
            config.shard_count = shards;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
        if self.no_respawn {
            config.respawn = false;
        }
        config
    }
}
