//! Unified device client value types (C11).

use std::time::Duration;

use crate::message::CommunicationProtocol;

#[derive(Debug, Clone)]
pub struct UnifiedDeviceClientConfig {
    pub client_id: String,
    /// Wire protocol this client speaks to its transport in.
    pub target_protocol: CommunicationProtocol,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    /// 0 means unlimited, per spec.md §4.11.
    pub max_reconnect_attempts: u32,
    pub enable_auto_reconnect: bool,
    pub message_timeout: Duration,
}

impl Default for UnifiedDeviceClientConfig {
    fn default() -> Self {
        Self {
            client_id: "hydrogen-client".to_string(),
            target_protocol: CommunicationProtocol::WebSocket,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            enable_auto_reconnect: true,
            message_timeout: Duration::from_secs(10),
        }
    }
}

/// Carried from `original_source/.../unified_device_client.h`'s
/// `ClientStatistics`, not named explicitly in spec.md §4.11 but the
/// natural observability surface for a reconnecting client.
#[derive(Debug, Default, Clone)]
pub struct ClientStatistics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnection_attempts: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
