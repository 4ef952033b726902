//! ZeroMQ protocol server (spec.md §4.9). The `zmq` crate is a thin
//! synchronous binding to libzmq, so unlike the other servers this one
//! runs its accept/reply loop on a blocking task rather than an async
//! socket, polling a shutdown flag between receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::device::DeviceService;
use crate::message::CommunicationProtocol;
use crate::protocols::{
    ConnectCallback, ConnectionInfo, DisconnectCallback, MessageCallback, ProtocolServer, ProtocolServerConfig, ProtocolStatus,
};

/// REP-socket poll interval while waiting for a shutdown signal.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

pub struct ZmqServer {
    bind_address: String,
    devices: Arc<DeviceService>,
    status: RwLock<ProtocolStatus>,
    config: RwLock<ProtocolServerConfig>,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
    shutdown: Arc<AtomicBool>,
    connect_event: Arc<RwLock<Option<ConnectCallback>>>,
    message_event: Arc<RwLock<Option<MessageCallback>>>,
    disconnect_event: RwLock<Option<DisconnectCallback>>,
}

impl ZmqServer {
    pub fn new(bind_address: impl Into<String>, devices: Arc<DeviceService>) -> Self {
        Self {
            bind_address: bind_address.into(),
            devices,
            status: RwLock::new(ProtocolStatus::Stopped),
            config: RwLock::new(ProtocolServerConfig { values: HashMap::new() }),
            connections: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            connect_event: Arc::new(RwLock::new(None)),
            message_event: Arc::new(RwLock::new(None)),
            disconnect_event: RwLock::new(None),
        }
    }

    /// Handle one decoded request frame, returning the JSON reply payload.
    async fn handle_request(devices: &DeviceService, raw: &str) -> String {
        let request: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return serde_json::json!({"success": false, "errorMessage": format!("invalid JSON: {e}")}).to_string();
            }
        };

        let device_id = request.get("deviceId").and_then(|v| v.as_str()).unwrap_or_default();
        let command = request.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        let parameters: HashMap<String, String> = request
            .get("parameters")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let command_id = devices.execute_command(device_id, command, parameters).await;
        match devices.get_command_result(&command_id).await {
            Some(result) => serde_json::json!({
                "commandId": result.command_id,
                "success": result.success,
                "result": result.result,
                "errorMessage": result.error_message,
            })
            .to_string(),
            None => serde_json::json!({"commandId": command_id, "success": false, "errorMessage": "pending"}).to_string(),
        }
    }
}

#[async_trait]
impl ProtocolServer for ZmqServer {
    fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::Zmq
    }

    fn protocol_name(&self) -> &str {
        "zmq"
    }

    async fn start(&self) -> bool {
        *self.status.write().await = ProtocolStatus::Starting;

        let context = zmq::Context::new();
        let socket = match context.socket(zmq::REP) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to create ZMQ REP socket");
                *self.status.write().await = ProtocolStatus::Error;
                return false;
            }
        };
        if let Err(e) = socket.set_rcvtimeo(RECV_TIMEOUT.as_millis() as i32) {
            warn!(error = %e, "failed to set ZMQ receive timeout");
        }
        if let Err(e) = socket.bind(&self.bind_address) {
            error!(error = %e, address = %self.bind_address, "failed to bind ZMQ REP socket");
            *self.status.write().await = ProtocolStatus::Error;
            return false;
        }

        info!(address = %self.bind_address, "ZeroMQ server bound");
        *self.status.write().await = ProtocolStatus::Running;
        if let Some(cb) = self.connect_event.read().await.as_ref() {
            cb(&ConnectionInfo {
                client_id: self.bind_address.clone(),
                protocol: CommunicationProtocol::Zmq,
                remote_address: self.bind_address.clone(),
                remote_port: 0,
                connected_at: chrono::Utc::now(),
                last_activity: chrono::Utc::now(),
            });
        }

        let devices = self.devices.clone();
        let shutdown = self.shutdown.clone();
        let message_event = self.message_event.clone();
        shutdown.store(false, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            let runtime = tokio::runtime::Handle::current();
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let request = match socket.recv_string(0) {
                    Ok(Ok(text)) => text,
                    Ok(Err(_)) => continue,
                    Err(e) if e == zmq::Error::EAGAIN => continue,
                    Err(e) => {
                        error!(error = %e, "ZMQ receive error");
                        break;
                    }
                };
                runtime.block_on(async {
                    if let Some(cb) = message_event.read().await.as_ref() {
                        cb("zmq", &request);
                    }
                });
                let reply = runtime.block_on(Self::handle_request(&devices, &request));
                if let Err(e) = socket.send(&reply, 0) {
                    error!(error = %e, "ZMQ send error");
                    break;
                }
            }
        });
        true
    }

    async fn stop(&self) -> bool {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.status.write().await = ProtocolStatus::Stopped;
        if let Some(cb) = self.disconnect_event.read().await.as_ref() {
            cb(&self.bind_address);
        }
        true
    }

    async fn status(&self) -> ProtocolStatus {
        *self.status.read().await
    }

    async fn config(&self) -> ProtocolServerConfig {
        self.config.read().await.clone()
    }

    async fn set_config(&self, config: ProtocolServerConfig) {
        *self.config.write().await = config;
    }

    fn is_config_valid(&self, _config: &ProtocolServerConfig) -> bool {
        true
    }

    async fn active_connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().await.values().cloned().collect()
    }

    async fn disconnect_client(&self, client_id: &str) -> bool {
        self.connections.write().await.remove(client_id).is_some()
    }

    async fn set_connect_callback(&self, cb: ConnectCallback) {
        *self.connect_event.write().await = Some(cb);
    }

    async fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_event.write().await = Some(cb);
    }

    async fn set_disconnect_callback(&self, cb: DisconnectCallback) {
        *self.disconnect_event.write().await = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceServiceConfig;

    #[tokio::test]
    async fn unknown_device_command_fails_explicitly() {
        let devices = Arc::new(DeviceService::new(DeviceServiceConfig::default()));
        let reply = ZmqServer::handle_request(&devices, r#"{"deviceId":"ghost","command":"noop"}"#).await;
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["success"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn malformed_request_is_rejected_without_panicking() {
        let devices = Arc::new(DeviceService::new(DeviceServiceConfig::default()));
        let reply = ZmqServer::handle_request(&devices, "not json").await;
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["success"], serde_json::json!(false));
    }
}
