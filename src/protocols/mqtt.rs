//! MQTT protocol server (spec.md §4.9). Grounded on the teacher's
//! `adapters/mqtt.rs` rumqttc usage, generalized from "subscribe to tag
//! topics and forward readings" to "bridge `hydrogen/<device>/command` and
//! `hydrogen/<device>/response` topics onto the device service".

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS as MqttQoS};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::device::DeviceService;
use crate::message::CommunicationProtocol;
use crate::protocols::{
    ConnectCallback, ConnectionInfo, DisconnectCallback, MessageCallback, ProtocolServer, ProtocolServerConfig, ProtocolStatus,
};

const COMMAND_TOPIC_FILTER: &str = "hydrogen/+/command";

pub struct MqttServer {
    broker_addr: SocketAddr,
    client_id: String,
    devices: Arc<DeviceService>,
    status: RwLock<ProtocolStatus>,
    config: RwLock<ProtocolServerConfig>,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
    client: RwLock<Option<AsyncClient>>,
    shutdown: Arc<Notify>,
    connect_event: Arc<RwLock<Option<ConnectCallback>>>,
    message_event: Arc<RwLock<Option<MessageCallback>>>,
    disconnect_event: RwLock<Option<DisconnectCallback>>,
}

impl MqttServer {
    pub fn new(broker_addr: SocketAddr, client_id: impl Into<String>, devices: Arc<DeviceService>) -> Self {
        Self {
            broker_addr,
            client_id: client_id.into(),
            devices,
            status: RwLock::new(ProtocolStatus::Stopped),
            config: RwLock::new(ProtocolServerConfig { values: HashMap::new() }),
            connections: RwLock::new(HashMap::new()),
            client: RwLock::new(None),
            shutdown: Arc::new(Notify::new()),
            connect_event: Arc::new(RwLock::new(None)),
            message_event: Arc::new(RwLock::new(None)),
            disconnect_event: RwLock::new(None),
        }
    }

    fn device_id_from_command_topic(topic: &str) -> Option<&str> {
        let mut parts = topic.splitn(3, '/');
        let prefix = parts.next()?;
        let device_id = parts.next()?;
        let suffix = parts.next()?;
        (prefix == "hydrogen" && suffix == "command").then_some(device_id)
    }
}

#[async_trait]
impl ProtocolServer for MqttServer {
    fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::Mqtt
    }

    fn protocol_name(&self) -> &str {
        "mqtt"
    }

    async fn start(&self) -> bool {
        *self.status.write().await = ProtocolStatus::Starting;

        let mut options = MqttOptions::new(self.client_id.clone(), self.broker_addr.ip().to_string(), self.broker_addr.port());
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        if let Err(e) = client.subscribe(COMMAND_TOPIC_FILTER, MqttQoS::AtLeastOnce).await {
            error!(error = %e, "failed to subscribe to command topic");
            *self.status.write().await = ProtocolStatus::Error;
            return false;
        }

        *self.client.write().await = Some(client.clone());
        *self.status.write().await = ProtocolStatus::Running;
        info!(addr = %self.broker_addr, "MQTT bridge connected");
        if let Some(cb) = self.connect_event.read().await.as_ref() {
            cb(&ConnectionInfo {
                client_id: self.client_id.clone(),
                protocol: CommunicationProtocol::Mqtt,
                remote_address: self.broker_addr.ip().to_string(),
                remote_port: self.broker_addr.port(),
                connected_at: chrono::Utc::now(),
                last_activity: chrono::Utc::now(),
            });
        }

        let devices = self.devices.clone();
        let shutdown = self.shutdown.clone();
        let message_event = self.message_event.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = eventloop.poll() => {
                        match event {
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                let Some(device_id) = Self::device_id_from_command_topic(&publish.topic) else {
                                    continue;
                                };
                                let device_id = device_id.to_string();
                                let Ok(command) = std::str::from_utf8(&publish.payload) else {
                                    warn!(topic = %publish.topic, "non-utf8 MQTT command payload");
                                    continue;
                                };
                                debug!(device_id = %device_id, command, "dispatching MQTT command");
                                if let Some(cb) = message_event.read().await.as_ref() {
                                    cb(&device_id, command);
                                }
                                let command_id = devices.execute_command(&device_id, command, HashMap::new()).await;
                                if let Some(result) = devices.get_command_result(&command_id).await {
                                    let response_topic = format!("hydrogen/{device_id}/response");
                                    let payload = serde_json::json!({
                                        "commandId": result.command_id,
                                        "success": result.success,
                                        "result": result.result,
                                        "errorMessage": result.error_message,
                                    });
                                    if let Err(e) = client
                                        .publish(response_topic, MqttQoS::AtLeastOnce, false, payload.to_string())
                                        .await
                                    {
                                        error!(error = %e, "failed to publish MQTT response");
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(error = %e, "MQTT event loop error");
                                break;
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        true
    }

    async fn stop(&self) -> bool {
        self.shutdown.notify_waiters();
        if let Some(client) = self.client.write().await.take() {
            let _ = client.disconnect().await;
        }
        *self.status.write().await = ProtocolStatus::Stopped;
        if let Some(cb) = self.disconnect_event.read().await.as_ref() {
            cb(&self.client_id);
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

    #[test]
    fn command_topic_extracts_device_id() {
        assert_eq!(MqttServer::device_id_from_command_topic("hydrogen/cam1/command"), Some("cam1"));
    }

    #[test]
    fn unrelated_topic_is_ignored() {
        assert_eq!(MqttServer::device_id_from_command_topic("hydrogen/cam1/status"), None);
        assert_eq!(MqttServer::device_id_from_command_topic("other/cam1/command"), None);
    }
}
