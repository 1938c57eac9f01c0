//! Service layer - entry points callers outside the actor system use
//!
//! HTTP endpoints, schedulers and the CLI all go through [`ShardFleet`].

pub mod fleet_service;

pub use fleet_service::ShardFleet;
