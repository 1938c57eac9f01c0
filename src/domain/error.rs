use std::time::Duration;

use thiserror::Error;

use crate::domain::envelope::ShardReply;

/// Error types for the shard manager
#[derive(Error, Debug, Clone)]
pub enum ShardError {
    /// Malformed or unrecognized envelope
    #[error("malformed envelope: {0}")]
    Parse(String),

    /// Destination shard has no live process
    #[error("shard {0} has no live process")]
    Routing(u32),

    /// No owning shard could be determined for a request
    #[error("{0}")]
    Unroutable(String),

    /// No reply, or not enough replies, before the deadline
    #[error("request timed out after {waited:?}: received {received} of {expected} replies")]
    Timeout { waited: Duration, expected: usize, received: usize, partial: Vec<ShardReply> },

    /// Worker exited or disconnected unexpectedly
    #[error("shard {index} terminated: {reason}")]
    ProcessCrash { index: u32, reason: String },

    /// Worker could not be launched
    #[error("{0}")]
    Spawn(String),

    /// Bytes could not be written to a worker
    #[error("{0}")]
    Transport(String),

    /// Configuration related errors
    #[error("{0}")]
    Configuration(String),

    /// A correlation id was registered twice while still pending
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelation(String),

    /// The manager actor could not be reached
    #[error("{0}")]
    Actor(String)
}

impl ShardError {
    /// Replies that arrived before a timeout, empty for every other error
    pub fn partial_replies(&self) -> &[ShardReply] {
        match self {
            ShardError::Timeout { partial, .. } => partial,
            _ => &[]
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShardError::Timeout { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        ShardError::Transport(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        ShardError::Parse(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for ShardError {
    fn from(err: serde_yaml::Error) -> Self {
        ShardError::Configuration(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for ShardError {
    fn from(err: ractor::SpawnErr) -> Self {
        ShardError::Actor(err.to_string())
    }
}
