//! Transport boundary for the unified device client (C11).
//!
//! The client is protocol-agnostic; a concrete `ClientTransport` dials one
//! of the wire protocols in [`crate::message::CommunicationProtocol`] and
//! moves `Message` wire payloads in and out. Grounded on the teacher's
//! `ProtocolAdapter` trait shape (`adapters/mod.rs`), reused here at the
//! client's connection boundary rather than the device-driver boundary.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),
    #[error("transport write failed: {0}")]
    WriteFailed(String),
    #[error("transport closed")]
    Closed,
}

/// One physical connection to a protocol server, from the client's side.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self);
    async fn is_connected(&self) -> bool;

    /// Write one wire-encoded message.
    async fn send(&self, payload: Value) -> Result<(), TransportError>;

    /// Block until the next inbound wire payload, or `None` once the
    /// transport is closed. Called in a loop by the client's receive task.
    async fn recv(&self) -> Option<Value>;
}
