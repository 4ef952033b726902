//! Protocol-specific wire shaping for `Message` (C3).
//!
//! Every conversion here is total: an unsupported `Message`/protocol
//! combination produces an explicit `{"success": false, "errorMessage": ..}`
//! payload rather than an error return, matching spec.md §4.3.

use serde_json::{json, Value};

use crate::message::{CommunicationProtocol, Message, MessageType};

/// Converts canonical `Message`s to and from protocol wire shapes.
pub struct MessageTransformer;

impl MessageTransformer {
    /// Render `message` the way `protocol` expects to see it on the wire.
    pub fn to_protocol_format(message: &Message, protocol: CommunicationProtocol) -> Value {
        match protocol {
            CommunicationProtocol::Http => Self::to_http(message),
            CommunicationProtocol::WebSocket => Self::to_websocket(message),
            CommunicationProtocol::Grpc => Self::to_grpc(message),
            CommunicationProtocol::Mqtt => Self::to_mqtt(message),
            CommunicationProtocol::Zmq => Self::to_zmq(message),
            CommunicationProtocol::Tcp
            | CommunicationProtocol::Udp
            | CommunicationProtocol::Stdio
            | CommunicationProtocol::Fifo => Self::unsupported(protocol),
        }
    }

    fn to_http(message: &Message) -> Value {
        json!({
            "messageId": message.message_id,
            "type": Self::type_name(message.message_type),
            "topic": message.topic,
            "payload": message.payload,
            "timestamp": message.timestamp.to_rfc3339(),
        })
    }

    fn to_websocket(message: &Message) -> Value {
        json!({
            "id": message.message_id,
            "type": Self::type_name(message.message_type),
            "senderId": message.sender_id,
            "recipientId": message.recipient_id,
            "topic": message.topic,
            "payload": message.payload,
            "correlationId": message.correlation_id,
        })
    }

    fn to_grpc(message: &Message) -> Value {
        json!({
            "message_id": message.message_id,
            "message_type": Self::type_name(message.message_type),
            "topic": message.topic,
            "payload": message.payload.to_string(),
        })
    }

    fn to_mqtt(message: &Message) -> Value {
        json!({
            "topic": message.topic,
            "payload": message.payload,
            "qos": message.qos as u8,
        })
    }

    fn to_zmq(message: &Message) -> Value {
        json!({
            "topic": message.topic,
            "body": message.payload,
        })
    }

    fn unsupported(protocol: CommunicationProtocol) -> Value {
        json!({
            "success": false,
            "errorMessage": format!("{:?} has no message wire encoding", protocol),
        })
    }

    fn type_name(message_type: MessageType) -> &'static str {
        match message_type {
            MessageType::Command => "COMMAND",
            MessageType::Response => "RESPONSE",
            MessageType::Event => "EVENT",
            MessageType::PropertyChange => "PROPERTY_CHANGE",
            MessageType::Error => "ERROR",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::DiscoveryRequest => "DISCOVERY_REQUEST",
        }
    }

    /// Parse a protocol-shaped payload back into a canonical `Message`.
    /// Returns `None` (rather than erroring) on a payload this protocol
    /// doesn't recognize, per spec.md §4.3.
    pub fn from_protocol_format(raw: &Value, protocol: CommunicationProtocol) -> Option<Message> {
        match protocol {
            CommunicationProtocol::Http | CommunicationProtocol::WebSocket => {
                let topic = raw.get("topic")?.as_str()?.to_string();
                let mut msg = Message::new(MessageType::Command, "client", topic);
                msg.payload = raw.get("payload").cloned().unwrap_or(Value::Null);
                if let Some(id) = raw.get("correlationId").and_then(|v| v.as_str()) {
                    msg.correlation_id = Some(id.to_string());
                }
                msg.source_protocol = Some(protocol);
                Some(msg)
            }
            CommunicationProtocol::Mqtt | CommunicationProtocol::Zmq => {
                let topic = raw.get("topic")?.as_str()?.to_string();
                let mut msg = Message::new(MessageType::Event, "device", topic);
                msg.payload = raw
                    .get("payload")
                    .or_else(|| raw.get("body"))
                    .cloned()
                    .unwrap_or(Value::Null);
                msg.source_protocol = Some(protocol);
                Some(msg)
            }
            CommunicationProtocol::Grpc => {
                let topic = raw.get("topic")?.as_str()?.to_string();
                let mut msg = Message::new(MessageType::Command, "client", topic);
                let payload_str = raw.get("payload").and_then(|v| v.as_str()).unwrap_or("null");
                msg.payload = serde_json::from_str(payload_str).unwrap_or(Value::Null);
                msg.source_protocol = Some(protocol);
                Some(msg)
            }
            CommunicationProtocol::Tcp
            | CommunicationProtocol::Udp
            | CommunicationProtocol::Stdio
            | CommunicationProtocol::Fifo => None,
        }
    }
}
