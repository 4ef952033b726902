//! Multi-protocol server (C10): aggregates one `ProtocolServer` per wire
//! protocol behind a single lifecycle surface.
//!
//! Grounded on the teacher's `main.rs` aggregate-lifecycle style (spawn
//! each subsystem, collect failures, continue) generalized from "start
//! every per-tenant SCADA connection" to "start every protocol server".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::message::CommunicationProtocol;
use crate::protocols::{ConnectCallback, ConnectionInfo, DisconnectCallback, MessageCallback, ProtocolServer, ProtocolStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OverallRank {
    Stopped,
    Running,
    Stopping,
    Starting,
    Error,
}

/// Aggregates the configured `ProtocolServer` instances and exposes one
/// start/stop/status surface over all of them (spec.md §4.10).
pub struct MultiProtocolServer {
    servers: Vec<Arc<dyn ProtocolServer>>,
}

impl MultiProtocolServer {
    pub fn new(servers: Vec<Arc<dyn ProtocolServer>>) -> Self {
        Self { servers }
    }

    pub fn servers(&self) -> &[Arc<dyn ProtocolServer>] {
        &self.servers
    }

    fn find(&self, protocol: CommunicationProtocol) -> Option<&Arc<dyn ProtocolServer>> {
        self.servers.iter().find(|s| s.protocol() == protocol)
    }

    /// Starts each server sequentially, recording failures but continuing;
    /// overall success requires every server to have started.
    pub async fn start_all(&self) -> bool {
        let mut all_ok = true;
        for server in &self.servers {
            let ok = server.start().await;
            if ok {
                info!(protocol = server.protocol_name(), "protocol server started");
            } else {
                warn!(protocol = server.protocol_name(), "protocol server failed to start");
                all_ok = false;
            }
        }
        all_ok
    }

    pub async fn stop_all(&self) -> bool {
        let mut all_ok = true;
        for server in &self.servers {
            let ok = server.stop().await;
            if ok {
                info!(protocol = server.protocol_name(), "protocol server stopped");
            } else {
                error!(protocol = server.protocol_name(), "protocol server failed to stop");
                all_ok = false;
            }
        }
        all_ok
    }

    pub async fn restart_all(&self) -> bool {
        self.stop_all().await;
        self.start_all().await
    }

    /// Precedence per spec.md §4.10: ERROR > STARTING > STOPPING > RUNNING > STOPPED.
    pub async fn overall_status(&self) -> ProtocolStatus {
        let mut worst = OverallRank::Stopped;
        for server in &self.servers {
            let rank = match server.status().await {
                ProtocolStatus::Error => OverallRank::Error,
                ProtocolStatus::Starting => OverallRank::Starting,
                ProtocolStatus::Stopping => OverallRank::Stopping,
                ProtocolStatus::Running => OverallRank::Running,
                ProtocolStatus::Stopped => OverallRank::Stopped,
            };
            if rank > worst {
                worst = rank;
            }
        }
        match worst {
            OverallRank::Error => ProtocolStatus::Error,
            OverallRank::Starting => ProtocolStatus::Starting,
            OverallRank::Stopping => ProtocolStatus::Stopping,
            OverallRank::Running => ProtocolStatus::Running,
            OverallRank::Stopped => ProtocolStatus::Stopped,
        }
    }

    pub async fn all_connections(&self) -> Vec<ConnectionInfo> {
        let mut out = Vec::new();
        for server in &self.servers {
            out.extend(server.active_connections().await);
        }
        out
    }

    pub async fn connection_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for server in &self.servers {
            counts.insert(server.protocol_name().to_string(), server.connection_count().await);
        }
        counts
    }

    pub async fn disconnect_client(&self, protocol: CommunicationProtocol, client_id: &str) -> bool {
        match self.find(protocol) {
            Some(server) => server.disconnect_client(client_id).await,
            None => false,
        }
    }

    pub async fn are_all_healthy(&self) -> bool {
        for server in &self.servers {
            if !server.is_healthy().await {
                return false;
            }
        }
        true
    }

    /// Installs a single callback on every child server (spec.md §4.10:
    /// "Global callbacks are installed on every child server").
    pub async fn set_global_connect_callback(&self, cb: ConnectCallback) {
        for server in &self.servers {
            server.set_connect_callback(cb.clone()).await;
        }
    }

    pub async fn set_global_message_callback(&self, cb: MessageCallback) {
        for server in &self.servers {
            server.set_message_callback(cb.clone()).await;
        }
    }

    pub async fn set_global_disconnect_callback(&self, cb: DisconnectCallback) {
        for server in &self.servers {
            server.set_disconnect_callback(cb.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::protocols::ProtocolServerConfig;

    struct StubServer {
        protocol: CommunicationProtocol,
        name: &'static str,
        status: Mutex<ProtocolStatus>,
        fail_start: AtomicBool,
        connect_event: Mutex<Option<crate::protocols::ConnectCallback>>,
    }

    #[async_trait]
    impl ProtocolServer for StubServer {
        fn protocol(&self) -> CommunicationProtocol {
            self.protocol
        }
        fn protocol_name(&self) -> &str {
            self.name
        }
        async fn start(&self) -> bool {
            if self.fail_start.load(Ordering::SeqCst) {
                *self.status.lock().unwrap() = ProtocolStatus::Error;
                false
            } else {
                *self.status.lock().unwrap() = ProtocolStatus::Running;
                true
            }
        }
        async fn stop(&self) -> bool {
            *self.status.lock().unwrap() = ProtocolStatus::Stopped;
            true
        }
        async fn status(&self) -> ProtocolStatus {
            *self.status.lock().unwrap()
        }
        async fn config(&self) -> ProtocolServerConfig {
            ProtocolServerConfig { values: HashMap::new() }
        }
        async fn set_config(&self, _config: ProtocolServerConfig) {}
        fn is_config_valid(&self, _config: &ProtocolServerConfig) -> bool {
            true
        }
        async fn active_connections(&self) -> Vec<ConnectionInfo> {
            Vec::new()
        }
        async fn disconnect_client(&self, _client_id: &str) -> bool {
            false
        }
        async fn set_connect_callback(&self, cb: crate::protocols::ConnectCallback) {
            *self.connect_event.lock().unwrap() = Some(cb);
        }
        async fn set_message_callback(&self, _cb: crate::protocols::MessageCallback) {}
        async fn set_disconnect_callback(&self, _cb: crate::protocols::DisconnectCallback) {}
    }

    fn stub(protocol: CommunicationProtocol, name: &'static str, fail_start: bool) -> Arc<dyn ProtocolServer> {
        stub_concrete(protocol, name, fail_start)
    }

    fn stub_concrete(protocol: CommunicationProtocol, name: &'static str, fail_start: bool) -> Arc<StubServer> {
        Arc::new(StubServer {
            protocol,
            name,
            status: Mutex::new(ProtocolStatus::Stopped),
            fail_start: AtomicBool::new(fail_start),
            connect_event: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn start_all_continues_past_individual_failures() {
        let server = MultiProtocolServer::new(vec![
            stub(CommunicationProtocol::Http, "http", false),
            stub(CommunicationProtocol::Mqtt, "mqtt", true),
        ]);
        let ok = server.start_all().await;
        assert!(!ok);
        assert_eq!(server.servers()[0].status().await, ProtocolStatus::Running);
        assert_eq!(server.servers()[1].status().await, ProtocolStatus::Error);
    }

    #[tokio::test]
    async fn overall_status_prefers_error_over_running() {
        let server = MultiProtocolServer::new(vec![
            stub(CommunicationProtocol::Http, "http", false),
            stub(CommunicationProtocol::Mqtt, "mqtt", true),
        ]);
        server.start_all().await;
        assert_eq!(server.overall_status().await, ProtocolStatus::Error);
    }

    #[tokio::test]
    async fn overall_status_is_stopped_with_no_servers_started() {
        let server = MultiProtocolServer::new(vec![stub(CommunicationProtocol::Http, "http", false)]);
        assert_eq!(server.overall_status().await, ProtocolStatus::Stopped);
    }

    #[tokio::test]
    async fn global_connect_callback_is_installed_on_every_child_server() {
        let http = stub_concrete(CommunicationProtocol::Http, "http", false);
        let mqtt = stub_concrete(CommunicationProtocol::Mqtt, "mqtt", false);
        let server = MultiProtocolServer::new(vec![http.clone(), mqtt.clone()]);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        server
            .set_global_connect_callback(Arc::new(move |info: &ConnectionInfo| {
                recorder.lock().unwrap().push(info.client_id.clone());
            }))
            .await;

        http.connect_event.lock().unwrap().as_ref().unwrap()(&ConnectionInfo {
            client_id: "c1".to_string(),
            protocol: CommunicationProtocol::Http,
            remote_address: String::new(),
            remote_port: 0,
            connected_at: chrono::Utc::now(),
            last_activity: chrono::Utc::now(),
        });
        mqtt.connect_event.lock().unwrap().as_ref().unwrap()(&ConnectionInfo {
            client_id: "c2".to_string(),
            protocol: CommunicationProtocol::Mqtt,
            remote_address: String::new(),
            remote_port: 0,
            connected_at: chrono::Utc::now(),
            last_activity: chrono::Utc::now(),
        });

        assert_eq!(*seen.lock().unwrap(), vec!["c1".to_string(), "c2".to_string()]);
    }
}
