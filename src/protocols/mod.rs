//! Protocol servers (C9): one implementation per wire protocol, all
//! conforming to the same lifecycle/status contract so C10 can aggregate
//! them uniformly.
//!
//! Grounded on the teacher's `metrics.rs`/`grpc/mod.rs` axum+tonic
//! bootstrap style and `original_source/.../http_server.h` for the
//! required HTTP surface.

pub mod grpc;
pub mod http;
pub mod mqtt;
pub mod zmq;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::message::CommunicationProtocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub client_id: String,
    pub protocol: CommunicationProtocol,
    pub remote_address: String,
    pub remote_port: u16,
    pub connected_at: chrono::DateTime<Utc>,
    pub last_activity: chrono::DateTime<Utc>,
}

/// Success/error envelope shapes, spec.md §4.9.
pub fn success_envelope(data: Option<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "timestamp": Utc::now().timestamp(),
        "data": data,
    })
}

pub fn error_envelope(message: &str, status: u16) -> serde_json::Value {
    serde_json::json!({
        "error": message,
        "status": status,
        "timestamp": Utc::now().timestamp(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolServerConfig {
    pub values: HashMap<String, String>,
}

impl ProtocolServerConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }
}

/// The three event callbacks spec.md §4.9 requires of every protocol
/// server, mirrored on the `ConnectionEventCallback`/`CommandEventCallback`
/// shape already used by `device::DeviceService`. `Arc`-wrapped (rather
/// than `Box`, as `device::DeviceService` uses) so C10 can install the
/// same global callback on every child server.
pub type ConnectCallback = Arc<dyn Fn(&ConnectionInfo) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Shared contract every wire-protocol server implements (spec.md §4.9).
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    fn protocol(&self) -> CommunicationProtocol;
    fn protocol_name(&self) -> &str;

    async fn start(&self) -> bool;
    async fn stop(&self) -> bool;
    async fn restart(&self) -> bool {
        self.stop().await && self.start().await
    }

    async fn status(&self) -> ProtocolStatus;
    async fn config(&self) -> ProtocolServerConfig;
    async fn set_config(&self, config: ProtocolServerConfig);
    fn is_config_valid(&self, config: &ProtocolServerConfig) -> bool;

    async fn active_connections(&self) -> Vec<ConnectionInfo>;
    async fn connection_count(&self) -> usize {
        self.active_connections().await.len()
    }
    async fn disconnect_client(&self, client_id: &str) -> bool;

    /// Invoked when a client connects, on each inbound message, and on
    /// disconnect. Implementations store the latest registration and
    /// fire it without holding any other lock (spec.md §5).
    async fn set_connect_callback(&self, cb: ConnectCallback);
    async fn set_message_callback(&self, cb: MessageCallback);
    async fn set_disconnect_callback(&self, cb: DisconnectCallback);

    async fn is_healthy(&self) -> bool {
        matches!(self.status().await, ProtocolStatus::Running)
    }
    async fn health_status(&self) -> String {
        format!("{:?}", self.status().await)
    }
}
