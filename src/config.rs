use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration
};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{constant::EXIT_CODE_NO_RESTART, supervision::BackoffPolicy};

/// Command used to start one shard worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args:    Vec<String>
}

impl WorkerCommand {
    /// Re-run this executable in demo worker mode
    pub fn current_exe_worker() -> Result<Self> {
        let program = std::env::current_exe().context("Failed to resolve the current executable")?;
        Ok(Self { program, args: vec!["worker".to_string()] })
    }
}

/// Configuration for the shard manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of shard workers, indices `[0, shard_count)`
    pub shard_count:           u32,
    /// Deadline for every correlated request
    pub request_timeout_ms:    u64,
    /// Respawn workers that exit without the no-restart code
    pub respawn:               bool,
    /// Exit code meaning "retired, do not restart"
    pub no_restart_exit_code:  i32,
    /// Delay between respawns; `None` respawns immediately
    pub backoff:               Option<BackoffPolicy>,
    /// Period of manager pings to every live shard; `None` disables them
    pub heartbeat_interval_ms: Option<u64>,
    /// Worker command; `None` runs this executable's `worker` subcommand
    pub worker:                Option<WorkerCommand>,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level:             String
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shard_count:           1,
            request_timeout_ms:    5_000,
            respawn:               true,
            no_restart_exit_code:  EXIT_CODE_NO_RESTART,
            backoff:               None,
            heartbeat_interval_ms: None,
            worker:                None,
            log_level:             "info".to_string()
        }
    }
}

impl ManagerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            bail!("shard_count must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if self.heartbeat_interval_ms == Some(0) {
            bail!("heartbeat_interval_ms must be greater than zero");
        }
        if let Some(backoff) = &self.backoff {
            if backoff.initial_ms > backoff.max_ms {
                bail!("backoff.initial_ms must not exceed backoff.max_ms");
            }
        }
        Ok(())
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "shard-manager").context("Failed to determine project directories")
}

/// Get the config file path
pub fn get_config_file_path() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    Ok(project_dirs.config_dir().join("config.yaml"))
}

/// Load configuration from `path`, or from the default location
///
/// A missing file yields the defaults; an unreadable or invalid one is an error.
pub fn load_config(path: Option<&Path>) -> Result<ManagerConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_file_path()?
    };

    if !config_path.exists() {
        if path.is_some() {
            bail!("Config file not found: {}", config_path.display());
        }
        return Ok(ManagerConfig::default());
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let config: ManagerConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    config.validate()?;
    Ok(config)
}
