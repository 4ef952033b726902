//! Protocol-independent message and error value types (C1).
//!
//! `Message` is the unit every protocol server and the unified client
//! exchange internally; protocol-specific encodings are produced by
//! [`crate::transformer`] at the edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Wire-stable communication protocol identifiers (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommunicationProtocol {
    Http = 0,
    WebSocket = 1,
    Grpc = 2,
    Mqtt = 3,
    Zmq = 4,
    Tcp = 5,
    Udp = 6,
    Stdio = 7,
    Fifo = 8,
}

/// Delivery guarantee requested by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Command,
    Response,
    Event,
    PropertyChange,
    Error,
    Heartbeat,
    DiscoveryRequest,
}

/// Protocol-independent unit of communication (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender_id: String,
    pub recipient_id: String,
    pub topic: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
    pub qos: QoS,
    pub source_protocol: Option<CommunicationProtocol>,
    pub target_protocol: Option<CommunicationProtocol>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub original_message_id: Option<String>,
}

impl Message {
    /// Build a message with a fresh unique id and the current timestamp.
    pub fn new(message_type: MessageType, sender_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message_type,
            sender_id: sender_id.into(),
            recipient_id: String::new(),
            topic: topic.into(),
            payload: Value::Null,
            headers: HashMap::new(),
            qos: QoS::AtLeastOnce,
            source_protocol: None,
            target_protocol: None,
            timestamp: Utc::now(),
            correlation_id: None,
            original_message_id: None,
        }
    }

    /// Build an ERROR message from a `ProtocolError`, satisfying the
    /// invariant that it carries either `correlation_id` or
    /// `original_message_id`.
    pub fn from_protocol_error(
        error: &crate::error_mapper::ProtocolError,
        original_message_id: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        debug_assert!(
            original_message_id.is_some() || correlation_id.is_some(),
            "ERROR messages must carry correlation_id or original_message_id"
        );

        let mut msg = Self::new(MessageType::Error, "system", "error");
        msg.correlation_id = correlation_id;
        msg.original_message_id = original_message_id.clone();
        msg.payload = serde_json::json!({
            "code": (error.code as i32).to_string(),
            "message": error.message,
            "details": {
                "component": error.component,
                "operation": error.operation,
                "details": error.details,
                "timestamp": error.timestamp.to_rfc3339(),
                "metadata": error.metadata,
            }
        });
        msg
    }

    /// Deep-copy. `Message` has no interior mutability so `Clone` already
    /// gives value semantics; this exists to name the operation spec.md §4.1
    /// requires explicitly.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl PartialEq for Message {
    /// Equality is defined on `message_id` alone (spec.md §4.1).
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
    }
}
impl Eq for Message {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_canonical_json() {
        let mut msg = Message::new(MessageType::Command, "client-1", "devices/cam1/expose");
        msg.payload = serde_json::json!({"duration": 0.1});
        msg.correlation_id = Some("corr-1".to_string());

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, msg);
        assert_eq!(parsed.payload, msg.payload);
    }

    #[test]
    fn equality_is_by_message_id_only() {
        let mut a = Message::new(MessageType::Event, "s", "t");
        let mut b = a.clone();
        a.payload = serde_json::json!(1);
        b.payload = serde_json::json!(2);
        assert_eq!(a, b);
    }

    #[test]
    fn error_message_carries_correlation_or_original_id() {
        let err = crate::error_mapper::ProtocolError::new(
            crate::error_mapper::ProtocolErrorCode::DeviceNotFound,
            "not found",
            "core",
            "lookup",
        );
        let msg = Message::from_protocol_error(&err, Some("orig-1".to_string()), None);
        assert_eq!(msg.message_type, MessageType::Error);
        assert!(msg.original_message_id.is_some() || msg.correlation_id.is_some());
    }
}
