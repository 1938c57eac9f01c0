//! Router - classifies every inbound envelope
//!
//! Routing is a pure decision over the envelope and the live roster; the
//! manager actor carries out the resulting [`Route`].

use std::str::FromStr;

use crate::domain::envelope::{CorrelationId, Envelope, Operation, Payload, Recipients, Sender, ShardIndex, ShardReply};

/// Values a worker may query from the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKey {
    Pid,
    Uptime,
    ShardCount,
    LastActivity
}

impl ManagerKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerKey::Pid => "pid",
            ManagerKey::Uptime => "uptime",
            ManagerKey::ShardCount => "shard_count",
            ManagerKey::LastActivity => "last_activity"
        }
    }
}

impl FromStr for ManagerKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pid" => Ok(ManagerKey::Pid),
            "uptime" => Ok(ManagerKey::Uptime),
            "shard_count" => Ok(ManagerKey::ShardCount),
            "last_activity" => Ok(ManagerKey::LastActivity),
            other => Err(other.to_string())
        }
    }
}

/// What the manager should do with one inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Relay unchanged to these shards
    Forward { targets: Vec<ShardIndex>, envelope: Envelope },
    /// Reply `pong` to the pinging shard with the same nonce
    AnswerPing { shard: ShardIndex, nonce: Option<CorrelationId> },
    /// Health-check completion
    RecordPong { shard: ShardIndex },
    /// Answer a worker's query from the allow-list
    AnswerValues { shard: ShardIndex, nonce: CorrelationId, keys: Vec<ManagerKey> },
    /// Query named keys outside the allow-list; stay silent
    RefuseValues { shard: ShardIndex, rejected: Vec<String> },
    /// Hand a reply to the correlation registry
    Resolve { nonce: CorrelationId, reply: ShardReply },
    Drop { reason: &'static str }
}

/// Classify an envelope received from a worker
pub fn route(envelope: Envelope, roster: &[ShardIndex]) -> Route {
    let shard = match envelope.from {
        Sender::Shard(shard) => shard,
        // only workers write to the manager's transports
        Sender::Manager => return Route::Drop { reason: "envelope claims to come from the manager" }
    };

    if !envelope.to.includes_manager() {
        let targets = envelope.to.resolve(roster);
        if targets.is_empty() {
            return Route::Drop { reason: "no destination shards" };
        }
        return Route::Forward { targets, envelope };
    }

    match envelope.operation {
        Operation::Ping => Route::AnswerPing { shard, nonce: envelope.nonce },
        Operation::Pong => Route::RecordPong { shard },
        Operation::RequestValues => {
            let (Some(nonce), Payload::Keys(requested)) = (envelope.nonce, envelope.payload) else {
                return Route::Drop { reason: "request_values without nonce or keys" };
            };

            let mut keys = Vec::with_capacity(requested.len());
            let mut rejected = Vec::new();
            for name in requested {
                match name.parse::<ManagerKey>() {
                    Ok(key) => keys.push(key),
                    Err(name) => rejected.push(name)
                }
            }

            if rejected.is_empty() {
                Route::AnswerValues { shard, nonce, keys }
            } else {
                Route::RefuseValues { shard, rejected }
            }
        }
        Operation::ReplyWithValues | Operation::InteractionReply => match envelope.nonce {
            Some(nonce) => Route::Resolve { nonce, reply: ShardReply { shard, payload: envelope.payload } },
            None => Route::Drop { reason: "reply without nonce" }
        },
        Operation::Interaction => Route::Drop { reason: "interactions flow from the manager to shards only" }
    }
}

/// Destination of a manager reply to `shard`
pub fn reply_to(shard: ShardIndex) -> Recipients {
    Recipients::Shards(vec![shard])
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;

    const ROSTER: &[ShardIndex] = &[0, 1, 2];

    fn nonce() -> CorrelationId {
        CorrelationId::from("n-1")
    }

    #[test]
    fn test_ping_is_answered_locally() {
        let route = route(Envelope::ping(Sender::Shard(2), Recipients::Manager, Some(nonce())), ROSTER);
        assert_eq!(route, Route::AnswerPing { shard: 2, nonce: Some(nonce()) });
    }

    #[test]
    fn test_pong_records_activity() {
        let route = route(Envelope::pong(Sender::Shard(1), Recipients::Manager, None), ROSTER);
        assert_eq!(route, Route::RecordPong { shard: 1 });
    }

    #[test]
    fn test_shard_to_shard_traffic_is_forwarded() {
        let envelope = Envelope::request_values(Sender::Shard(0), Recipients::All, nonce(), vec!["uptime".into()]);
        match route(envelope.clone(), ROSTER) {
            Route::Forward { targets, envelope: forwarded } => {
                assert_eq!(targets, vec![0, 1, 2]);
                assert_eq!(forwarded, envelope);
            }
            other => panic!("expected forward, got {:?}", other)
        }

        let envelope = Envelope::request_values(Sender::Shard(0), Recipients::Shards(vec![2]), nonce(), vec![]);
        assert!(matches!(route(envelope, ROSTER), Route::Forward { targets, .. } if targets == vec![2]));
    }

    #[test]
    fn test_envelopes_claiming_manager_origin_are_dropped() {
        let looped = Envelope::ping(Sender::Manager, Recipients::Manager, None);
        assert!(matches!(route(looped, ROSTER), Route::Drop { .. }));

        let spoofed = Envelope::request_values(Sender::Manager, Recipients::All, nonce(), vec![]);
        assert!(matches!(route(spoofed, ROSTER), Route::Drop { .. }));
    }

    #[test]
    fn test_value_requests_respect_the_allow_list() {
        let allowed = Envelope::request_values(
            Sender::Shard(1),
            Recipients::Manager,
            nonce(),
            vec!["pid".into(), "uptime".into(), "last_activity".into()]
        );
        assert_eq!(
            route(allowed, ROSTER),
            Route::AnswerValues {
                shard: 1,
                nonce: nonce(),
                keys:  vec![ManagerKey::Pid, ManagerKey::Uptime, ManagerKey::LastActivity]
            }
        );

        let refused = Envelope::request_values(
            Sender::Shard(1),
            Recipients::Manager,
            nonce(),
            vec!["pid".into(), "token".into()]
        );
        assert_eq!(route(refused, ROSTER), Route::RefuseValues { shard: 1, rejected: vec!["token".to_string()] });
    }

    #[test]
    fn test_replies_go_to_the_registry() {
        let mut values = Map::new();
        values.insert("guilds".to_string(), json!(12));
        let envelope = Envelope::reply_with_values(Sender::Shard(2), Recipients::Manager, nonce(), values.clone());

        assert_eq!(
            route(envelope, ROSTER),
            Route::Resolve { nonce: nonce(), reply: ShardReply { shard: 2, payload: Payload::Values(values) } }
        );

        let envelope = Envelope::interaction_reply(Sender::Shard(0), Recipients::Manager, nonce(), json!({"ok": true}));
        assert!(matches!(route(envelope, ROSTER), Route::Resolve { .. }));
    }
}
