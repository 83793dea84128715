//! JSON control message envelope carried inside a [`ControlPacket`].
//!
//! ```text
//! {
//!   "sessionId": "...",
//!   "addressPath": "/session/start",
//!   "transactionId": 123,
//!   "timestamp": 1700000000000,
//!   "type": "request" | "response" | "update",
//!   "body": { ... },                          // optional
//!   "error": { "name": "", "description": "" } // optional
//! }
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use super::packet::ControlPacket;
use crate::error::{CpsError, Result};

/// Direction/role of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Update,
}

impl MessageType {
    /// Wire literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Update => "update",
        }
    }

    /// Exact, case-sensitive match against the three wire literals.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "update" => Ok(MessageType::Update),
            other => Err(CpsError::InvalidMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level error reported by the peer. An empty `name` means no error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControlError {
    pub name: String,
    pub description: String,
}

impl ControlError {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// Decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub session_id: String,
    pub address_path: String,
    pub transaction_id: u32,
    pub timestamp: u64,
    pub message_type: MessageType,
    /// JSON object body. `None` is serialized as an absent key.
    pub body: Option<Value>,
    pub error: ControlError,
}

/// Serialization view; field order here is the order on the wire.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    session_id: &'a str,
    address_path: &'a str,
    transaction_id: u32,
    timestamp: u64,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ControlError>,
}

impl ControlMessage {
    /// Build a message with no body and no error.
    pub fn new(
        message_type: MessageType,
        address_path: impl Into<String>,
        session_id: impl Into<String>,
        transaction_id: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            address_path: address_path.into(),
            transaction_id,
            timestamp,
            message_type,
            body: None,
            error: ControlError::default(),
        }
    }

    /// Attach a body. A JSON `null` is treated as no body.
    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body.filter(|b| !b.is_null());
        self
    }

    pub fn with_error(mut self, error: ControlError) -> Self {
        self.error = error;
        self
    }

    /// Serialize the envelope to compact JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            session_id: &self.session_id,
            address_path: &self.address_path,
            transaction_id: self.transaction_id,
            timestamp: self.timestamp,
            message_type: self.message_type,
            body: self.body.as_ref().filter(|b| !b.is_null()),
            error: (!self.error.is_empty()).then_some(&self.error),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Wrap the serialized envelope in a packet at `version`.
    pub fn to_packet(&self, version: u16) -> Result<ControlPacket> {
        ControlPacket::new(version, Bytes::from(self.to_json()?))
    }

    /// Decode a packet, rejecting any version other than `expected_version`.
    pub fn from_packet(packet: &ControlPacket, expected_version: u16) -> Result<Self> {
        if packet.version() != expected_version {
            return Err(CpsError::UnsupportedVersion {
                expected: expected_version,
                actual: packet.version(),
            });
        }
        Self::from_json(packet.payload())
    }

    /// Decode the JSON envelope.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| CpsError::MalformedMessage(format!("invalid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(CpsError::MalformedMessage(
                "payload is not a JSON object".to_string(),
            ));
        };

        let session_id = required_str(&map, "sessionId")?;
        let address_path = required_str(&map, "addressPath")?;
        let transaction_id = required_u64(&map, "transactionId")?;
        let transaction_id = u32::try_from(transaction_id)
            .map_err(|_| CpsError::MalformedMessage("transactionId out of range".to_string()))?;
        let timestamp = required_u64(&map, "timestamp")?;
        let message_type = MessageType::parse(&required_str(&map, "type")?)?;

        let body = match map.get("body") {
            None | Some(Value::Null) => None,
            Some(body @ Value::Object(_)) => Some(body.clone()),
            Some(_) => {
                return Err(CpsError::MalformedMessage(
                    "body is not an object".to_string(),
                ))
            }
        };

        let error = match map.get("error") {
            Some(Value::Object(err)) => ControlError {
                name: optional_str(err, "name"),
                description: optional_str(err, "description"),
            },
            _ => ControlError::default(),
        };

        Ok(Self {
            session_id,
            address_path,
            transaction_id,
            timestamp,
            message_type,
            body,
            error,
        })
    }
}

fn required_str(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(CpsError::MalformedMessage(format!("{} is not a string", key))),
        None => Err(CpsError::MalformedMessage(format!("missing {}", key))),
    }
}

fn required_u64(map: &Map<String, Value>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(v) => v.as_u64().ok_or_else(|| {
            CpsError::MalformedMessage(format!("{} is not an unsigned integer", key))
        }),
        None => Err(CpsError::MalformedMessage(format!("missing {}", key))),
    }
}

fn optional_str(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
