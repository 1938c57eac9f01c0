//! # Shard Manager
//!
//! Supervises a fixed set of shard worker processes and brokers their traffic.
//!
//! This crate provides functionality to:
//! - Spawn one worker per shard index and respawn the ones that crash
//! - Route structured envelopes between workers and answer those addressed to the manager
//! - Broadcast value requests and aggregate one reply per shard under a deadline
//! - Dispatch external interactions to the shard that owns them

pub mod actor;
pub mod adapter;
pub mod cli;
pub mod config;
pub mod domain;
pub mod port;
pub mod services;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cli::{Cli, Commands, RunArgs};
pub use config::{ManagerConfig, WorkerCommand, load_config};
pub use domain::{
    envelope::{CorrelationId, Envelope, Operation, Payload, Recipients, Sender, ShardIndex, ShardReply},
    error::ShardError,
    interaction::{InteractionRequest, InteractionResponse, Partitioner, SnowflakePartitioner}
};
pub use services::ShardFleet;
pub use worker::WorkerRuntime;
