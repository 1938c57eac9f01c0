//! Externally delivered interactions and their shard ownership

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::envelope::ShardIndex;

/// Inbound event from outside the process tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRequest {
    /// Attribute the partition function runs over, e.g. a guild snowflake
    pub routing_key: Option<u64>,
    pub body:        Value
}

/// Reply to an interaction; `shard` is `None` for the fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub shard: Option<ShardIndex>,
    pub body:  Value
}

impl InteractionResponse {
    /// Best-effort no-op answer when no shard could take the request
    pub fn fallback() -> Self {
        Self { shard: None, body: json!({ "type": "noop" }) }
    }

    pub fn is_fallback(&self) -> bool {
        self.shard.is_none()
    }
}

/// Deterministic owner of a request
pub trait Partitioner: Send + Sync + 'static {
    fn shard_for(&self, request: &InteractionRequest, shard_count: u32) -> Option<ShardIndex>;
}

/// `(snowflake >> 22) % shard_count`
#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakePartitioner;

impl Partitioner for SnowflakePartitioner {
    fn shard_for(&self, request: &InteractionRequest, shard_count: u32) -> Option<ShardIndex> {
        if shard_count == 0 {
            return None;
        }
        request.routing_key.map(|key| ((key >> 22) % shard_count as u64) as ShardIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(routing_key: Option<u64>) -> InteractionRequest {
        InteractionRequest { routing_key, body: json!({}) }
    }

    #[test]
    fn test_snowflake_partitioning() {
        let partitioner = SnowflakePartitioner;
        let key = 5u64 << 22;

        assert_eq!(partitioner.shard_for(&request(Some(key)), 3), Some(2));
        assert_eq!(partitioner.shard_for(&request(Some(key | 0x3f_ffff)), 3), Some(2));
        assert_eq!(partitioner.shard_for(&request(Some(0)), 3), Some(0));
    }

    #[test]
    fn test_unroutable_requests() {
        let partitioner = SnowflakePartitioner;
        assert_eq!(partitioner.shard_for(&request(None), 3), None);
        assert_eq!(partitioner.shard_for(&request(Some(1 << 22)), 0), None);
    }
}
