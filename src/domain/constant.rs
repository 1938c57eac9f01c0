//! Domain Events - Structured events for internal monitoring and debugging

/// Exit code a worker uses to say "retired, do not restart me"
pub const EXIT_CODE_NO_RESTART: i32 = 78;

/// Environment variable carrying the shard index to a worker
pub const ENV_SHARD_INDEX: &str = "SHARD_INDEX";

/// Environment variable carrying the total shard count to a worker
pub const ENV_SHARD_COUNT: &str = "SHARD_COUNT";

/// Keys answered by `get_stats`
pub const STATS_KEYS: &[&str] = &["uptime", "ping", "last_activity", "guilds", "members", "channels"];

/// ShardManager Actor Events
pub mod manager {
    pub const MANAGER_STARTED: &str = "manager.started";
    pub const MANAGER_STOPPED: &str = "manager.stopped";
    pub const HEARTBEAT_SENT: &str = "heartbeat.sent";
    pub const HEALTH_CHECK_COMPLETED: &str = "health.check_completed";
    pub const VALUES_REQUESTED: &str = "values.requested";
    pub const INTERACTION_DISPATCHED: &str = "interaction.dispatched";
    pub const INTERACTION_UNROUTABLE: &str = "interaction.unroutable";
}

/// Process supervision events
pub mod supervisor {
    pub const SHARD_SPAWNING: &str = "shard.spawning";
    pub const SHARD_SPAWNED: &str = "shard.spawned";
    pub const SHARD_SPAWN_FAILED: &str = "shard.spawn_failed";
    pub const SHARD_TERMINATED: &str = "shard.terminated";
    pub const SHARD_KILLED: &str = "shard.killed";
    pub const SHARD_RETIRED: &str = "shard.retired";
    pub const SHARD_RESPAWN_SCHEDULED: &str = "shard.respawn_scheduled";
    pub const STALE_EVENT_IGNORED: &str = "shard.stale_event_ignored";
}

/// Router events
pub mod router {
    pub const ENVELOPE_DROPPED: &str = "envelope.dropped";
    pub const ENVELOPE_FORWARDED: &str = "envelope.forwarded";
    pub const ROUTING_FAILED: &str = "envelope.routing_failed";
    pub const PING_ANSWERED: &str = "ping.answered";
    pub const PONG_RECEIVED: &str = "pong.received";
    pub const VALUES_ANSWERED: &str = "values.answered";
    pub const VALUES_REFUSED: &str = "values.refused";
}

/// Correlation registry events
pub mod correlation {
    pub const REQUEST_REGISTERED: &str = "request.registered";
    pub const REQUEST_RESOLVED: &str = "request.resolved";
    pub const REQUEST_PROGRESS: &str = "request.progress";
    pub const REQUEST_TIMED_OUT: &str = "request.timed_out";
    pub const REPLY_UNMATCHED: &str = "reply.unmatched";
    pub const REPLY_DUPLICATE: &str = "reply.duplicate";
    pub const CALLER_GONE: &str = "caller.gone";
}

/// Process transport events
pub mod transport {
    pub const FRAME_READ_FAILED: &str = "frame.read_failed";
    pub const FRAME_WRITE_FAILED: &str = "frame.write_failed";
    pub const PROCESS_EXITED: &str = "process.exited";
    pub const PROCESS_DISCONNECTED: &str = "process.disconnected";
}

/// Worker runtime events
pub mod worker {
    pub const WORKER_STARTED: &str = "worker.started";
    pub const WORKER_STOPPED: &str = "worker.stopped";
    pub const ENVELOPE_IGNORED: &str = "worker.envelope_ignored";
}
