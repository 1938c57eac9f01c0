//! Wire protocol between the manager and its shard workers
//!
//! Every frame on a worker's transport carries one JSON envelope:
//!
//! ```json
//! {"operation": "request_values", "fromShard": "MANAGER", "toShards": [0, 2],
//!  "nonce": "6f1c…", "data": "uptime,ping"}
//! ```
//!
//! `data` is a secondary encoding that depends on the operation. It is decoded
//! exactly once, in [`Envelope::parse`], into a typed [`Payload`].

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::error::ShardError;

/// Stable identity of a worker, in `[0, shard_count)`
pub type ShardIndex = u32;

const MANAGER_KEYWORD: &str = "MANAGER";
const ALL_KEYWORD: &str = "ALL";

/// Opaque token linking a request to its reply or replies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh collision-resistant id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Closed set of operations exchanged between manager and workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Ping,
    Pong,
    RequestValues,
    ReplyWithValues,
    Interaction,
    InteractionReply
}

impl Operation {
    /// Fire-and-forget operations may omit the nonce
    pub fn requires_nonce(&self) -> bool {
        !matches!(self, Operation::Ping | Operation::Pong)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::Pong => "pong",
            Operation::RequestValues => "request_values",
            Operation::ReplyWithValues => "reply_with_values",
            Operation::Interaction => "interaction",
            Operation::InteractionReply => "interaction_reply"
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw JSON shape shared by `fromShard` and `toShards`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Address {
    Index(ShardIndex),
    List(Vec<ShardIndex>),
    Keyword(String)
}

/// Originator of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Address", into = "Address")]
pub enum Sender {
    Manager,
    Shard(ShardIndex)
}

impl TryFrom<Address> for Sender {
    type Error = String;

    fn try_from(address: Address) -> Result<Self, Self::Error> {
        match address {
            Address::Index(index) => Ok(Sender::Shard(index)),
            Address::Keyword(keyword) if keyword == MANAGER_KEYWORD => Ok(Sender::Manager),
            other => Err(format!("invalid fromShard: {:?}", other))
        }
    }
}

impl From<Sender> for Address {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Manager => Address::Keyword(MANAGER_KEYWORD.to_string()),
            Sender::Shard(index) => Address::Index(index)
        }
    }
}

impl Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Manager => f.write_str(MANAGER_KEYWORD),
            Sender::Shard(index) => write!(f, "shard-{}", index)
        }
    }
}

/// Destination of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Address", into = "Address")]
pub enum Recipients {
    Manager,
    /// Every shard live at the time the envelope is routed
    All,
    Shards(Vec<ShardIndex>)
}

impl Recipients {
    pub fn includes_manager(&self) -> bool {
        matches!(self, Recipients::Manager)
    }

    /// Concrete shard set, deduplicated, with `All` expanded against `roster`
    pub fn resolve(&self, roster: &[ShardIndex]) -> Vec<ShardIndex> {
        match self {
            Recipients::Manager => Vec::new(),
            Recipients::All => roster.to_vec(),
            Recipients::Shards(indices) => {
                let mut resolved = Vec::with_capacity(indices.len());
                for index in indices {
                    if !resolved.contains(index) {
                        resolved.push(*index);
                    }
                }
                resolved
            }
        }
    }
}

impl TryFrom<Address> for Recipients {
    type Error = String;

    fn try_from(address: Address) -> Result<Self, Self::Error> {
        match address {
            Address::List(indices) => Ok(Recipients::Shards(indices)),
            Address::Keyword(keyword) if keyword == MANAGER_KEYWORD => Ok(Recipients::Manager),
            Address::Keyword(keyword) if keyword == ALL_KEYWORD => Ok(Recipients::All),
            other => Err(format!("invalid toShards: {:?}", other))
        }
    }
}

impl From<Recipients> for Address {
    fn from(recipients: Recipients) -> Self {
        match recipients {
            Recipients::Manager => Address::Keyword(MANAGER_KEYWORD.to_string()),
            Recipients::All => Address::Keyword(ALL_KEYWORD.to_string()),
            Recipients::Shards(indices) => Address::List(indices)
        }
    }
}

/// Operation-specific body, decoded from the wire `data` field
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    /// Requested keys, comma-joined on the wire; keys must not contain commas
    Keys(Vec<String>),
    /// Key → value map, a JSON object string on the wire
    Values(Map<String, Value>),
    /// Opaque interaction body or reply, a JSON string on the wire
    Interaction(Value)
}

impl Payload {
    fn decode(operation: Operation, data: Option<&str>) -> Result<Self, ShardError> {
        match operation {
            Operation::Ping | Operation::Pong => Ok(Payload::Empty),
            Operation::RequestValues => Ok(Payload::Keys(
                data.unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            )),
            Operation::ReplyWithValues => {
                let data = data.ok_or_else(|| ShardError::Parse("reply_with_values without data".to_string()))?;
                match serde_json::from_str(data)? {
                    Value::Object(values) => Ok(Payload::Values(values)),
                    other => Err(ShardError::Parse(format!("reply_with_values data is not an object: {}", other)))
                }
            }
            Operation::Interaction | Operation::InteractionReply => match data {
                Some(data) => Ok(Payload::Interaction(serde_json::from_str(data)?)),
                None => Ok(Payload::Interaction(Value::Null))
            }
        }
    }

    fn encode(&self) -> Result<Option<String>, ShardError> {
        match self {
            Payload::Empty => Ok(None),
            Payload::Keys(keys) => Ok(Some(keys.join(","))),
            Payload::Values(values) => Ok(Some(serde_json::to_string(values)?)),
            Payload::Interaction(value) => Ok(Some(serde_json::to_string(value)?))
        }
    }
}

/// Wire form of an envelope, before payload decoding
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    operation:  Operation,
    from_shard: Sender,
    to_shards:  Recipients,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data:       Option<String>
}

/// Structured message unit exchanged between manager and workers
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub operation: Operation,
    pub from:      Sender,
    pub to:        Recipients,
    pub nonce:     Option<CorrelationId>,
    pub payload:   Payload
}

impl Envelope {
    pub fn ping(from: Sender, to: Recipients, nonce: Option<CorrelationId>) -> Self {
        Self { operation: Operation::Ping, from, to, nonce, payload: Payload::Empty }
    }

    pub fn pong(from: Sender, to: Recipients, nonce: Option<CorrelationId>) -> Self {
        Self { operation: Operation::Pong, from, to, nonce, payload: Payload::Empty }
    }

    pub fn request_values(from: Sender, to: Recipients, nonce: CorrelationId, keys: Vec<String>) -> Self {
        Self { operation: Operation::RequestValues, from, to, nonce: Some(nonce), payload: Payload::Keys(keys) }
    }

    pub fn reply_with_values(
        from: Sender,
        to: Recipients,
        nonce: CorrelationId,
        values: Map<String, Value>
    ) -> Self {
        Self { operation: Operation::ReplyWithValues, from, to, nonce: Some(nonce), payload: Payload::Values(values) }
    }

    pub fn interaction(from: Sender, to: Recipients, nonce: CorrelationId, body: Value) -> Self {
        Self { operation: Operation::Interaction, from, to, nonce: Some(nonce), payload: Payload::Interaction(body) }
    }

    pub fn interaction_reply(from: Sender, to: Recipients, nonce: CorrelationId, body: Value) -> Self {
        Self {
            operation: Operation::InteractionReply,
            from,
            to,
            nonce: Some(nonce),
            payload: Payload::Interaction(body)
        }
    }

    /// Strictly decode one frame
    ///
    /// Unknown operations, ill-typed addresses, a missing nonce on an operation
    /// that expects a reply, and undecodable `data` are all rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, ShardError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;

        let nonce = wire.nonce.filter(|nonce| !nonce.is_empty()).map(CorrelationId::from);
        if nonce.is_none() && wire.operation.requires_nonce() {
            return Err(ShardError::Parse(format!("{} without nonce", wire.operation)));
        }

        let payload = Payload::decode(wire.operation, wire.data.as_deref())?;

        Ok(Self { operation: wire.operation, from: wire.from_shard, to: wire.to_shards, nonce, payload })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ShardError> {
        let wire = WireEnvelope {
            operation:  self.operation,
            from_shard: self.from,
            to_shards:  self.to.clone(),
            nonce:      self.nonce.as_ref().map(|nonce| nonce.as_str().to_string()),
            data:       self.payload.encode()?
        };
        Ok(serde_json::to_vec(&wire)?)
    }
}

/// One shard's answer to a correlated request
#[derive(Debug, Clone, PartialEq)]
pub struct ShardReply {
    pub shard:   ShardIndex,
    pub payload: Payload
}

impl ShardReply {
    pub fn values(&self) -> Option<&Map<String, Value>> {
        match &self.payload {
            Payload::Values(values) => Some(values),
            _ => None
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values().and_then(|values| values.get(key))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn round_trip(envelope: Envelope) {
        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::parse(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_every_operation_survives_the_wire() {
        let nonce = CorrelationId::generate();
        let mut values = Map::new();
        values.insert("uptime".to_string(), json!(1234));
        values.insert("guilds".to_string(), json!(7));

        round_trip(Envelope::ping(Sender::Shard(3), Recipients::Manager, None));
        round_trip(Envelope::pong(Sender::Manager, Recipients::Shards(vec![3]), Some(nonce.clone())));
        round_trip(Envelope::request_values(
            Sender::Manager,
            Recipients::All,
            nonce.clone(),
            vec!["uptime".to_string(), "ping".to_string()]
        ));
        round_trip(Envelope::request_values(Sender::Shard(1), Recipients::Manager, nonce.clone(), vec![]));
        round_trip(Envelope::reply_with_values(Sender::Shard(0), Recipients::Manager, nonce.clone(), values));
        round_trip(Envelope::interaction(
            Sender::Manager,
            Recipients::Shards(vec![2]),
            nonce.clone(),
            json!({"id": "42", "type": 2})
        ));
        round_trip(Envelope::interaction_reply(Sender::Shard(2), Recipients::Manager, nonce, json!({"type": 4})));
    }

    #[test]
    fn test_wire_field_names_and_keywords() {
        let envelope = Envelope::request_values(
            Sender::Manager,
            Recipients::All,
            CorrelationId::from("abc"),
            vec!["uptime".to_string(), "ping".to_string()]
        );
        let wire: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "operation": "request_values",
                "fromShard": "MANAGER",
                "toShards": "ALL",
                "nonce": "abc",
                "data": "uptime,ping"
            })
        );
    }

    #[test]
    fn test_parse_decodes_secondary_payloads() {
        let raw = br#"{"operation":"reply_with_values","fromShard":2,"toShards":"MANAGER","nonce":"n1","data":"{\"uptime\":5}"}"#;
        let envelope = Envelope::parse(raw).unwrap();

        assert_eq!(envelope.from, Sender::Shard(2));
        assert!(envelope.to.includes_manager());
        let mut expected = Map::new();
        expected.insert("uptime".to_string(), json!(5));
        assert_eq!(envelope.payload, Payload::Values(expected));

        let raw = br#"{"operation":"request_values","fromShard":0,"toShards":[1,2],"nonce":"n2","data":" uptime , ,ping"}"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(envelope.payload, Payload::Keys(vec!["uptime".to_string(), "ping".to_string()]));
    }

    #[test]
    fn test_parse_rejects_malformed_envelopes() {
        let rejected: &[&[u8]] = &[
            b"not json",
            br#"{"operation":"explode","fromShard":0,"toShards":"MANAGER","nonce":"n"}"#,
            br#"{"operation":"ping","toShards":"MANAGER"}"#,
            br#"{"operation":"ping","fromShard":"SOMEONE","toShards":"MANAGER"}"#,
            br#"{"operation":"ping","fromShard":-1,"toShards":"MANAGER"}"#,
            br#"{"operation":"ping","fromShard":0,"toShards":"EVERYONE"}"#,
            br#"{"operation":"ping","fromShard":0,"toShards":4}"#,
            br#"{"operation":"request_values","fromShard":0,"toShards":"MANAGER","data":"pid"}"#,
            br#"{"operation":"reply_with_values","fromShard":0,"toShards":"MANAGER","nonce":""}"#,
            br#"{"operation":"reply_with_values","fromShard":0,"toShards":"MANAGER","nonce":"n"}"#,
            br#"{"operation":"reply_with_values","fromShard":0,"toShards":"MANAGER","nonce":"n","data":"[1]"}"#
        ];

        for raw in rejected {
            let result = Envelope::parse(raw);
            assert!(
                matches!(result, Err(ShardError::Parse(_))),
                "expected parse error for {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_ping_without_nonce_is_accepted() {
        let envelope = Envelope::parse(br#"{"operation":"ping","fromShard":4,"toShards":"MANAGER"}"#).unwrap();
        assert_eq!(envelope.operation, Operation::Ping);
        assert_eq!(envelope.nonce, None);
    }

    #[test]
    fn test_recipients_resolution() {
        let roster = vec![0, 1, 3];
        assert_eq!(Recipients::All.resolve(&roster), vec![0, 1, 3]);
        assert_eq!(Recipients::Shards(vec![3, 1, 3]).resolve(&roster), vec![3, 1]);
        assert!(Recipients::Manager.resolve(&roster).is_empty());
    }
}
