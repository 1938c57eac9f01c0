//! Restart policy for shard workers
//!
//! Per shard index: `ABSENT -> SPAWNING -> RUNNING -> (TERMINATED -> SPAWNING | ABSENT)`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::envelope::ShardIndex,
    port::launcher::{Termination, WorkerHandle}
};

/// Exponential delay between consecutive respawns of a crash-looping shard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms:     u64,
    #[serde(default = "default_factor")]
    pub factor:     f64
}

fn default_factor() -> f64 {
    2.0
}

impl BackoffPolicy {
    /// Delay before respawn number `attempt` (0-based) since the shard was last healthy
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_ms as f64 * self.factor.max(1.0).powi(attempt.min(32) as i32);
        Duration::from_millis(scaled.min(self.max_ms as f64) as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial_ms: 500, max_ms: 30_000, factor: default_factor() }
    }
}

/// What to do after a live worker's transport reports its end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationDecision {
    /// Force-terminate the handle with "restart requested"
    pub kill:    bool,
    /// Permanently remove the shard from the fleet
    pub retire:  bool,
    pub respawn: bool
}

pub fn decide(termination: Termination, no_restart_code: i32, respawn_enabled: bool) -> TerminationDecision {
    match termination {
        Termination::Exited(Some(code)) if code == no_restart_code => {
            TerminationDecision { kill: false, retire: true, respawn: false }
        }
        Termination::Exited(Some(_)) => TerminationDecision { kill: false, retire: false, respawn: respawn_enabled },
        Termination::Exited(None) | Termination::Disconnected => {
            TerminationDecision { kill: true, retire: false, respawn: respawn_enabled }
        }
    }
}

/// Lifecycle state reported for one shard index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    Absent,
    Spawning,
    Running,
    Retired
}

/// Supervisor's bookkeeping for one live worker
pub struct ProcessRecord {
    pub handle:           Box<dyn WorkerHandle>,
    pub generation:       u64,
    pub spawned_at:       DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>
}

impl ProcessRecord {
    pub fn new(handle: Box<dyn WorkerHandle>, generation: u64) -> Self {
        let now = Utc::now();
        Self { handle, generation, spawned_at: now, last_activity_at: now }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// Read-only liveness view of one shard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardHealth {
    pub index:            ShardIndex,
    pub state:            ShardState,
    pub pid:              Option<u32>,
    pub spawned_at:       Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub restarts:         u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constant::EXIT_CODE_NO_RESTART;

    #[test]
    fn test_sentinel_exit_retires_the_shard() {
        let decision = decide(Termination::Exited(Some(EXIT_CODE_NO_RESTART)), EXIT_CODE_NO_RESTART, true);
        assert_eq!(decision, TerminationDecision { kill: false, retire: true, respawn: false });
    }

    #[test]
    fn test_crash_exit_respawns_when_enabled() {
        assert!(decide(Termination::Exited(Some(1)), EXIT_CODE_NO_RESTART, true).respawn);
        assert!(!decide(Termination::Exited(Some(1)), EXIT_CODE_NO_RESTART, false).respawn);
        assert!(decide(Termination::Exited(Some(0)), EXIT_CODE_NO_RESTART, true).respawn);
    }

    #[test]
    fn test_missing_exit_code_forces_termination() {
        let decision = decide(Termination::Disconnected, EXIT_CODE_NO_RESTART, true);
        assert_eq!(decision, TerminationDecision { kill: true, retire: false, respawn: true });

        let decision = decide(Termination::Exited(None), EXIT_CODE_NO_RESTART, false);
        assert_eq!(decision, TerminationDecision { kill: true, retire: false, respawn: false });
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy { initial_ms: 100, max_ms: 1_000, factor: 2.0 };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(1_000));
    }
}
