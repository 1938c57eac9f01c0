//! Fleet service - the public entry points of the shard manager
//!
//! This service wraps the ShardManager actor and exposes:
//! - Aggregated value queries across shards (`get_values`, `get_stats`)
//! - Routing of external interactions to their owning shard
//! - Liveness snapshots and shutdown

use std::sync::Arc;

use ractor::{
    ActorRef, RpcReplyPort,
    concurrency::JoinHandle,
    rpc::{CallResult, call}
};
use serde_json::Value;
use tracing::{Level, event};

use crate::{
    actor::{
        manager::{ShardManager, ShardManagerArgs},
        message::ShardManagerMessage
    },
    config::ManagerConfig,
    domain::{
        constant::{STATS_KEYS, manager},
        envelope::{Payload, Recipients, ShardReply},
        error::ShardError,
        interaction::{InteractionRequest, InteractionResponse, Partitioner},
        supervision::ShardHealth
    },
    port::launcher::WorkerLauncher
};

/// Handle to a running shard fleet
pub struct ShardFleet {
    manager: ActorRef<ShardManagerMessage>,
    handle:  JoinHandle<()>
}

impl ShardFleet {
    /// Start the manager; one worker per shard index is launched before any request is served
    pub async fn start(
        config: ManagerConfig,
        launcher: Arc<dyn WorkerLauncher>,
        partitioner: Arc<dyn Partitioner>
    ) -> Result<Self, ShardError> {
        let (manager, handle) =
            ShardManager::spawn_system(None, ShardManagerArgs { config, launcher, partitioner }).await?;
        Ok(Self { manager, handle })
    }

    /// Ask every shard in `targets` for `keys`; one reply per shard, in arrival order
    ///
    /// Targets are resolved against the shards live at dispatch time. If some
    /// shard does not answer within the request timeout the call fails with
    /// [`ShardError::Timeout`], which carries the replies that did arrive.
    pub async fn get_values(&self, targets: Recipients, keys: &[&str]) -> Result<Vec<ShardReply>, ShardError> {
        let keys = keys.iter().map(|key| key.to_string()).collect();
        self.request(|reply| ShardManagerMessage::GetValues { targets, keys, reply }).await?
    }

    /// `get_values` over the canonical health key set, all shards by default
    pub async fn get_stats(&self, targets: Option<Recipients>) -> Result<Vec<ShardReply>, ShardError> {
        self.get_values(targets.unwrap_or(Recipients::All), STATS_KEYS).await
    }

    /// Route an interaction to exactly one shard and return its reply
    ///
    /// Never fails: an unroutable, undelivered or unanswered interaction yields
    /// [`InteractionResponse::fallback`].
    pub async fn dispatch_interaction(&self, request: InteractionRequest) -> InteractionResponse {
        let result = self
            .request(|reply| ShardManagerMessage::DispatchInteraction { request, reply })
            .await
            .and_then(|result| result);

        match result {
            Ok(ShardReply { shard, payload }) => InteractionResponse {
                shard: Some(shard),
                body:  match payload {
                    Payload::Interaction(body) => body,
                    Payload::Values(values) => Value::Object(values),
                    Payload::Keys(_) | Payload::Empty => Value::Null
                }
            },
            Err(e) => {
                event!(Level::WARN, event = manager::INTERACTION_UNROUTABLE, error = %e, message = "fallback_response");
                InteractionResponse::fallback()
            }
        }
    }

    /// Liveness of every shard index
    pub async fn health(&self) -> Result<Vec<ShardHealth>, ShardError> {
        self.request(|reply| ShardManagerMessage::Health { reply }).await
    }

    /// Stop the manager and kill every worker
    pub async fn shutdown(self) {
        self.manager.stop(None);
        if let Err(e) = self.handle.await {
            event!(Level::ERROR, event = manager::MANAGER_STOPPED, error = %e);
        }
    }

    async fn request<T, F>(&self, build: F) -> Result<T, ShardError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> ShardManagerMessage
    {
        match call(&self.manager, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(ShardError::Actor("shard manager call timed out".to_string())),
            Ok(CallResult::SenderError) => Err(ShardError::Actor("shard manager dropped the request".to_string())),
            Err(e) => Err(ShardError::Actor(format!("failed to reach shard manager: {:?}", e)))
        }
    }
}
