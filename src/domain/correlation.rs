//! Correlation registry - exactly-once settlement of in-flight requests
//!
//! Each pending request is keyed by its correlation id and owns one timer.
//! Resolution and expiry both take the entry out of the map before settling
//! the caller, so whichever path arrives first wins and the other becomes a
//! no-op.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant}
};

use ractor::RpcReplyPort;
use tokio::task::AbortHandle;
use tracing::{Level, event};

use crate::{
    domain::{
        constant::correlation,
        envelope::{CorrelationId, ShardReply},
        error::ShardError
    },
    port::timer::ExpiryScheduler
};

/// Continuation of a request answered by a single shard
pub type SingleReplyPort = RpcReplyPort<Result<ShardReply, ShardError>>;

/// Continuation of a request answered by every targeted shard
pub type AggregateReplyPort = RpcReplyPort<Result<Vec<ShardReply>, ShardError>>;

enum Pending {
    Simple { reply: SingleReplyPort },
    Aggregate { expected: usize, collected: Vec<ShardReply>, reply: AggregateReplyPort }
}

struct Entry {
    pending:       Pending,
    timer:         AbortHandle,
    registered_at: Instant
}

/// Outcome of feeding one reply into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The request settled with this reply
    Completed,
    /// Aggregate still waiting for more shards
    Waiting { received: usize, expected: usize },
    /// The same shard already answered this aggregate
    Duplicate,
    /// No pending request with that id (already settled, expired, or never sent)
    Unknown
}

pub struct CorrelationRegistry {
    pending:   HashMap<CorrelationId, Entry>,
    scheduler: Arc<dyn ExpiryScheduler>
}

impl CorrelationRegistry {
    pub fn new(scheduler: Arc<dyn ExpiryScheduler>) -> Self {
        Self { pending: HashMap::new(), scheduler }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Wait for the first reply carrying `id`
    pub fn register_simple(&mut self, id: CorrelationId, reply: SingleReplyPort, timeout: Duration) {
        if self.pending.contains_key(&id) {
            settle(reply, Err(ShardError::DuplicateCorrelation(id.to_string())));
            return;
        }

        self.insert(id, Pending::Simple { reply }, timeout);
    }

    /// Wait for `expected` replies from distinct shards carrying `id`
    pub fn register_aggregate(
        &mut self,
        id: CorrelationId,
        expected: usize,
        reply: AggregateReplyPort,
        timeout: Duration
    ) {
        if self.pending.contains_key(&id) {
            settle(reply, Err(ShardError::DuplicateCorrelation(id.to_string())));
            return;
        }

        if expected == 0 {
            settle(reply, Ok(Vec::new()));
            return;
        }

        self.insert(id, Pending::Aggregate { expected, collected: Vec::with_capacity(expected), reply }, timeout);
    }

    fn insert(&mut self, id: CorrelationId, pending: Pending, timeout: Duration) {
        event!(Level::DEBUG, event = correlation::REQUEST_REGISTERED,
               nonce = %id, timeout_ms = %timeout.as_millis());

        let timer = self.scheduler.schedule(id.clone(), timeout);
        self.pending.insert(id, Entry { pending, timer, registered_at: Instant::now() });
    }

    /// Feed one reply; settles the request when it is complete
    pub fn resolve_one(&mut self, id: &CorrelationId, reply: ShardReply) -> Resolution {
        let reply = match self.pending.get_mut(id) {
            None => {
                event!(Level::DEBUG, event = correlation::REPLY_UNMATCHED, nonce = %id, shard = %reply.shard);
                return Resolution::Unknown;
            }
            Some(Entry { pending: Pending::Aggregate { expected, collected, .. }, .. }) => {
                if collected.iter().any(|existing| existing.shard == reply.shard) {
                    event!(Level::WARN, event = correlation::REPLY_DUPLICATE, nonce = %id, shard = %reply.shard);
                    return Resolution::Duplicate;
                }

                collected.push(reply);
                if collected.len() < *expected {
                    event!(Level::DEBUG, event = correlation::REQUEST_PROGRESS,
                           nonce = %id, received = %collected.len(), expected = %expected);
                    return Resolution::Waiting { received: collected.len(), expected: *expected };
                }
                None
            }
            Some(Entry { pending: Pending::Simple { .. }, .. }) => Some(reply)
        };

        let Some(entry) = self.pending.remove(id) else {
            return Resolution::Unknown;
        };
        entry.timer.abort();

        event!(Level::DEBUG, event = correlation::REQUEST_RESOLVED,
               nonce = %id, elapsed_ms = %entry.registered_at.elapsed().as_millis());

        match entry.pending {
            Pending::Simple { reply: port } => {
                if let Some(reply) = reply {
                    settle(port, Ok(reply));
                }
            }
            Pending::Aggregate { collected, reply: port, .. } => settle(port, Ok(collected))
        }

        Resolution::Completed
    }

    /// Timer path: reject the request if it is still pending
    ///
    /// Returns `false` when the request already settled.
    pub fn expire(&mut self, id: &CorrelationId) -> bool {
        let Some(entry) = self.pending.remove(id) else {
            return false;
        };

        let waited = entry.registered_at.elapsed();
        match entry.pending {
            Pending::Simple { reply } => {
                event!(Level::WARN, event = correlation::REQUEST_TIMED_OUT, nonce = %id, expected = 1, received = 0);
                settle(reply, Err(ShardError::Timeout { waited, expected: 1, received: 0, partial: Vec::new() }));
            }
            Pending::Aggregate { expected, collected, reply } => {
                event!(Level::WARN, event = correlation::REQUEST_TIMED_OUT,
                       nonce = %id, expected = %expected, received = %collected.len());
                settle(reply, Err(ShardError::Timeout { waited, expected, received: collected.len(), partial: collected }));
            }
        }

        true
    }

    /// Abort every timer and drop every continuation
    pub fn clear(&mut self) {
        for (_, entry) in self.pending.drain() {
            entry.timer.abort();
        }
    }
}

/// Answer a waiting caller, logging when it has already gone away
pub fn settle<T: Send + 'static>(port: RpcReplyPort<Result<T, ShardError>>, result: Result<T, ShardError>) {
    if port.send(result).is_err() {
        event!(Level::DEBUG, event = correlation::CALLER_GONE);
    }
}
