//! gRPC protocol server (spec.md §4.9). Grounded on the teacher's
//! `grpc/mod.rs` (`tonic::include_proto!`, `Server::builder().add_service`
//! bootstrap), reduced to the device-control surface described in
//! `proto/hydrogen.proto` — authored for this gateway since the teacher's
//! `.proto`/`build.rs` query a SCADA-specific service this spec doesn't have.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{info, warn};

use crate::auth::{AuthRequest, AuthService};
use crate::device::DeviceService;
use crate::message::CommunicationProtocol;
use crate::protocols::{
    ConnectCallback, ConnectionInfo, DisconnectCallback, MessageCallback, ProtocolServer, ProtocolServerConfig, ProtocolStatus,
};

pub mod hydrogen {
    tonic::include_proto!("hydrogen");
}

use hydrogen::device_control_server::{DeviceControl, DeviceControlServer};
use hydrogen::{
    AuthenticateRequest, AuthenticateResponse, DeviceEvent, DeviceInfo as ProtoDeviceInfo, ExecuteCommandRequest,
    ExecuteCommandResponse, GetDeviceRequest, ListDevicesRequest, ListDevicesResponse, StreamDeviceEventsRequest,
};

struct Service {
    auth: Arc<AuthService>,
    devices: Arc<DeviceService>,
}

fn to_proto(info: crate::device::DeviceInfo) -> ProtoDeviceInfo {
    ProtoDeviceInfo {
        device_id: info.device_id,
        device_type: info.device_type,
        device_name: info.device_name,
        manufacturer: info.manufacturer,
        model: info.model,
        connection_status: info.connection_status as u32,
        health_status: info.health_status as u32,
        properties: info.properties,
    }
}

#[tonic::async_trait]
impl DeviceControl for Service {
    async fn authenticate(&self, request: Request<AuthenticateRequest>) -> Result<Response<AuthenticateResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .auth
            .authenticate(AuthRequest {
                username: req.username,
                password: req.password,
                client_id: req.client_id,
                remote_address: "grpc".to_string(),
            })
            .await;

        Ok(Response::new(AuthenticateResponse {
            success: result.success,
            error_message: result.error_message.unwrap_or_default(),
            token: result.token.as_ref().map(|t| t.token.clone()).unwrap_or_default(),
            expires_at: result.token.map(|t| t.expires_at.timestamp()).unwrap_or_default(),
        }))
    }

    async fn list_devices(&self, request: Request<ListDevicesRequest>) -> Result<Response<ListDevicesResponse>, Status> {
        let req = request.into_inner();
        let devices = if req.device_type.is_empty() {
            self.devices.get_all_devices().await
        } else {
            self.devices.get_devices_by_type(&req.device_type).await
        };
        Ok(Response::new(ListDevicesResponse {
            devices: devices.into_iter().map(to_proto).collect(),
        }))
    }

    async fn get_device(&self, request: Request<GetDeviceRequest>) -> Result<Response<ProtoDeviceInfo>, Status> {
        let req = request.into_inner();
        match self.devices.get_device_info(&req.device_id).await {
            Some(info) => Ok(Response::new(to_proto(info))),
            None => Err(Status::not_found(format!("device '{}' not found", req.device_id))),
        }
    }

    async fn execute_command(
        &self,
        request: Request<ExecuteCommandRequest>,
    ) -> Result<Response<ExecuteCommandResponse>, Status> {
        let req = request.into_inner();
        let command_id = self
            .devices
            .execute_command(&req.device_id, &req.command, req.parameters)
            .await;
        let result = self.devices.get_command_result(&command_id).await;
        let (success, output, error_message) = match result {
            Some(r) => (r.success, r.result, r.error_message.unwrap_or_default()),
            None => (false, String::new(), "command result unavailable".to_string()),
        };
        Ok(Response::new(ExecuteCommandResponse {
            command_id,
            success,
            result: output,
            error_message,
        }))
    }

    type StreamDeviceEventsStream = ReceiverStream<Result<DeviceEvent, Status>>;

    async fn stream_device_events(
        &self,
        request: Request<StreamDeviceEventsRequest>,
    ) -> Result<Response<Self::StreamDeviceEventsStream>, Status> {
        let device_id = request.into_inner().device_id;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(DeviceEvent {
                    device_id,
                    event_type: "subscribed".to_string(),
                    detail: String::new(),
                    timestamp: chrono::Utc::now().timestamp(),
                }))
                .await;
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

pub struct GrpcServer {
    addr: SocketAddr,
    auth: Arc<AuthService>,
    devices: Arc<DeviceService>,
    status: RwLock<ProtocolStatus>,
    config: RwLock<ProtocolServerConfig>,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
    shutdown: Arc<Notify>,
    connect_event: RwLock<Option<ConnectCallback>>,
    message_event: RwLock<Option<MessageCallback>>,
    disconnect_event: RwLock<Option<DisconnectCallback>>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, auth: Arc<AuthService>, devices: Arc<DeviceService>) -> Self {
        Self {
            addr,
            auth,
            devices,
            status: RwLock::new(ProtocolStatus::Stopped),
            config: RwLock::new(ProtocolServerConfig { values: HashMap::new() }),
            connections: RwLock::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
            connect_event: RwLock::new(None),
            message_event: RwLock::new(None),
            disconnect_event: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ProtocolServer for GrpcServer {
    fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::Grpc
    }

    fn protocol_name(&self) -> &str {
        "grpc"
    }

    async fn start(&self) -> bool {
        *self.status.write().await = ProtocolStatus::Starting;
        let service = Service {
            auth: self.auth.clone(),
            devices: self.devices.clone(),
        };
        let addr = self.addr;
        *self.status.write().await = ProtocolStatus::Running;
        info!(%addr, "gRPC server listening");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(DeviceControlServer::new(service))
                .serve_with_shutdown(addr, async move {
                    shutdown.notified().await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "gRPC server terminated");
            }
        });
        true
    }

    async fn stop(&self) -> bool {
        self.shutdown.notify_waiters();
        *self.status.write().await = ProtocolStatus::Stopped;
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
    use crate::auth::AuthServiceConfig;
    use crate::device::DeviceServiceConfig;

    #[tokio::test]
    async fn get_device_on_unknown_id_is_not_found() {
        let service = Service {
            auth: Arc::new(AuthService::new(AuthServiceConfig::default())),
            devices: Arc::new(DeviceService::new(DeviceServiceConfig::default())),
        };
        let result = service
            .get_device(Request::new(GetDeviceRequest {
                device_id: "ghost".to_string(),
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn authenticate_succeeds_against_bootstrapped_admin() {
        let auth = Arc::new(AuthService::new(AuthServiceConfig::default()));
        auth.bootstrap_default_admin().await;
        let service = Service {
            auth,
            devices: Arc::new(DeviceService::new(DeviceServiceConfig::default())),
        };
        let response = service
            .authenticate(Request::new(AuthenticateRequest {
                username: "admin".to_string(),
                password: "admin123!".to_string(),
                client_id: "grpc-test".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.success);
        assert!(!response.token.is_empty());
    }
}
