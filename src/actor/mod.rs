//! Actor-based shard supervision
//!
//! A single Ractor actor owns every mutable table of the manager (process
//! records, pending requests, the live roster), so each table has exactly
//! one writer. Transport tasks and timers only talk to it through messages.

pub mod manager;
pub mod message;

pub use manager::*;
pub use message::*;
