//! Typed messages for the shard manager actor

use ractor::{Message, RpcReplyPort};

use crate::{
    domain::{
        correlation::{AggregateReplyPort, SingleReplyPort},
        envelope::{CorrelationId, Recipients, ShardIndex},
        interaction::InteractionRequest,
        supervision::ShardHealth
    },
    port::launcher::Termination
};

/// Messages for the ShardManager actor
#[derive(Debug)]
pub enum ShardManagerMessage {
    /// Launch a worker for one index (scheduled respawns)
    Spawn { index: ShardIndex },
    /// A frame read from a worker's transport
    Inbound { index: ShardIndex, generation: u64, frame: Vec<u8> },
    /// A worker's transport reported exit or disconnect
    ProcessTerminated { index: ShardIndex, generation: u64, termination: Termination },
    /// The timer of a pending request fired
    RequestExpired { id: CorrelationId },
    /// Ping every live shard
    Heartbeat,
    /// Query values from a set of shards and aggregate their replies
    GetValues { targets: Recipients, keys: Vec<String>, reply: AggregateReplyPort },
    /// Forward an external interaction to its owning shard
    DispatchInteraction { request: InteractionRequest, reply: SingleReplyPort },
    /// Liveness snapshot of every shard index
    Health { reply: RpcReplyPort<Vec<ShardHealth>> }
}

// Implement Message trait for Ractor
impl Message for ShardManagerMessage {}
