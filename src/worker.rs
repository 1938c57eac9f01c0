//! Shard-side half of the protocol
//!
//! A worker recovers its index and the shard count from the environment,
//! then answers the manager over length-delimited frames on stdin/stdout.

use std::{sync::Arc, time::Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec}
};
use tracing::{Level, event};

use crate::domain::{
    constant::{ENV_SHARD_COUNT, ENV_SHARD_INDEX, worker},
    envelope::{Envelope, Operation, Payload, Recipients, Sender, ShardIndex},
    error::ShardError
};

/// Source of the values a shard reports for `request_values`
pub trait ValueProvider: Send + Sync {
    fn value(&self, key: &str) -> Option<Value>;
}

/// Application logic for interactions routed to this shard
pub trait InteractionHandler: Send + Sync {
    fn handle(&self, shard: ShardIndex, body: Value) -> Value;
}

/// Fixed values, for demos and tests
#[derive(Debug, Clone, Default)]
pub struct StaticValues(pub Map<String, Value>);

impl ValueProvider for StaticValues {
    fn value(&self, key: &str) -> Option<Value> {
        self.0.get(key).cloned()
    }
}

/// Replies with the shard index and the request body
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl InteractionHandler for EchoHandler {
    fn handle(&self, shard: ShardIndex, body: Value) -> Value {
        json!({ "handled_by": shard, "echo": body })
    }
}

pub struct WorkerRuntime {
    index:       ShardIndex,
    shard_count: u32,
    started_at:  Instant,
    values:      Arc<dyn ValueProvider>,
    handler:     Arc<dyn InteractionHandler>
}

impl WorkerRuntime {
    pub fn new(
        index: ShardIndex,
        shard_count: u32,
        values: Arc<dyn ValueProvider>,
        handler: Arc<dyn InteractionHandler>
    ) -> Self {
        Self { index, shard_count, started_at: Instant::now(), values, handler }
    }

    /// Build from the launch parameters in the environment
    pub fn from_env(values: Arc<dyn ValueProvider>, handler: Arc<dyn InteractionHandler>) -> Result<Self, ShardError> {
        let index = read_env(ENV_SHARD_INDEX)?;
        let shard_count = read_env(ENV_SHARD_COUNT)?;
        if index >= shard_count {
            return Err(ShardError::Configuration(format!(
                "{} {} is outside [0, {})",
                ENV_SHARD_INDEX, index, shard_count
            )));
        }
        Ok(Self::new(index, shard_count, values, handler))
    }

    pub fn index(&self) -> ShardIndex {
        self.index
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Answer for one envelope addressed to this shard, if it expects one
    pub fn respond(&self, envelope: Envelope) -> Option<Envelope> {
        let me = Sender::Shard(self.index);
        let back = match envelope.from {
            Sender::Manager => Recipients::Manager,
            Sender::Shard(index) => Recipients::Shards(vec![index])
        };

        match (envelope.operation, envelope.nonce, envelope.payload) {
            (Operation::Ping, nonce, _) => Some(Envelope::pong(me, back, nonce)),
            (Operation::RequestValues, Some(nonce), Payload::Keys(keys)) => {
                let values = keys.into_iter().map(|key| {
                    let value = self.value(&key);
                    (key, value)
                });
                Some(Envelope::reply_with_values(me, back, nonce, values.collect()))
            }
            (Operation::Interaction, Some(nonce), Payload::Interaction(body)) => {
                Some(Envelope::interaction_reply(me, back, nonce, self.handler.handle(self.index, body)))
            }
            (operation, ..) => {
                event!(Level::DEBUG, event = worker::ENVELOPE_IGNORED, shard = %self.index, operation = %operation);
                None
            }
        }
    }

    fn value(&self, key: &str) -> Value {
        match key {
            "uptime" => json!(self.started_at.elapsed().as_millis() as u64),
            "pid" => json!(std::process::id()),
            "shard" => json!(self.index),
            "shard_count" => json!(self.shard_count),
            other => self.values.value(other).unwrap_or(Value::Null)
        }
    }

    /// Serve frames until the manager closes the transport
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), ShardError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin
    {
        let mut frames = FramedRead::new(reader, LengthDelimitedCodec::new());
        let mut sink = FramedWrite::new(writer, LengthDelimitedCodec::new());

        event!(Level::INFO, event = worker::WORKER_STARTED, shard = %self.index, shard_count = %self.shard_count);

        while let Some(frame) = frames.next().await {
            let envelope = match Envelope::parse(&frame?) {
                Ok(envelope) => envelope,
                Err(e) => {
                    event!(Level::WARN, event = worker::ENVELOPE_IGNORED, shard = %self.index, error = %e);
                    continue;
                }
            };

            if let Some(reply) = self.respond(envelope) {
                sink.send(Bytes::from(reply.to_bytes()?)).await?;
            }
        }

        event!(Level::INFO, event = worker::WORKER_STOPPED, shard = %self.index);
        Ok(())
    }
}

fn read_env(name: &str) -> Result<u32, ShardError> {
    let raw = std::env::var(name).map_err(|_| ShardError::Configuration(format!("{} is not set", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| ShardError::Configuration(format!("{} is not a shard number: {}", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::CorrelationId;

    fn runtime() -> WorkerRuntime {
        let mut values = Map::new();
        values.insert("guilds".to_string(), json!(12));
        WorkerRuntime::new(2, 4, Arc::new(StaticValues(values)), Arc::new(EchoHandler))
    }

    #[test]
    fn test_ping_gets_pong_with_same_nonce() {
        let nonce = Some(CorrelationId::from("p"));
        let reply = runtime().respond(Envelope::ping(Sender::Manager, Recipients::Shards(vec![2]), nonce.clone()));

        assert_eq!(reply, Some(Envelope::pong(Sender::Shard(2), Recipients::Manager, nonce)));
    }

    #[test]
    fn test_values_reply_to_the_requester() {
        let reply = runtime()
            .respond(Envelope::request_values(
                Sender::Shard(0),
                Recipients::Shards(vec![2]),
                CorrelationId::from("v"),
                vec!["guilds".into(), "shard".into(), "unknown".into()]
            ))
            .unwrap();

        assert_eq!(reply.to, Recipients::Shards(vec![0]));
        assert_eq!(reply.nonce, Some(CorrelationId::from("v")));
        let Payload::Values(values) = reply.payload else { panic!("expected values") };
        assert_eq!(values["guilds"], json!(12));
        assert_eq!(values["shard"], json!(2));
        assert_eq!(values["unknown"], Value::Null);
    }

    #[test]
    fn test_replies_are_not_answered() {
        let reply = Envelope::reply_with_values(Sender::Manager, Recipients::Shards(vec![2]), "r".into(), Map::new());
        assert_eq!(runtime().respond(reply), None);
    }

    #[tokio::test]
    async fn test_run_serves_frames_until_eof() {
        let (manager_side, worker_side) = tokio::io::duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let (manager_read, manager_write) = tokio::io::split(manager_side);

        let runtime = runtime();
        let serve = tokio::spawn(async move { runtime.run(worker_read, worker_write).await });

        let mut sink = FramedWrite::new(manager_write, LengthDelimitedCodec::new());
        let mut frames = FramedRead::new(manager_read, LengthDelimitedCodec::new());

        sink.send(Bytes::from_static(b"garbage")).await.unwrap();
        let ping = Envelope::ping(Sender::Manager, Recipients::Shards(vec![2]), Some("hb".into()));
        sink.send(Bytes::from(ping.to_bytes().unwrap())).await.unwrap();

        let pong = Envelope::parse(&frames.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(pong.operation, Operation::Pong);
        assert_eq!(pong.nonce, Some(CorrelationId::from("hb")));

        SinkExt::<Bytes>::close(&mut sink).await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
