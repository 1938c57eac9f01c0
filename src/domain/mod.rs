//! Domain - protocol types and the pure rules of the shard manager

pub mod constant;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod interaction;
pub mod router;
pub mod supervision;
