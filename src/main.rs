//! # Hydrogen Gateway
//!
//! Multi-protocol device-control gateway for remote instrumentation:
//! clients speak HTTP, WebSocket, gRPC, MQTT or ZeroMQ and the gateway
//! normalizes every request into a single internal [`Message`] before
//! dispatching it to the [`DeviceService`].
//!
//! ## Architecture
//!
//! ```text
//! HTTP/WS/gRPC/MQTT/ZMQ clients → ProtocolServer impls → DeviceService
//!                                        ↓                    ↓
//!                                 MultiProtocolServer    ServiceRegistry
//!                                        ↓
//!                                 Prometheus metrics
//! ```
//!
//! ## Responsibilities
//!
//! 1. Authenticate and authorize callers (sessions, tokens, API keys, RBAC)
//! 2. Accept device commands over any supported wire protocol
//! 3. Track device health, circuit-break unhealthy connections
//! 4. Expose a uniform status/metrics surface regardless of protocol
//!
//! ## NOT Responsible For
//!
//! - Device-specific driver logic (owned by the `DeviceCollaborator` a
//!   caller registers per device)
//! - Persisting long-term telemetry history (out of scope, spec.md §2)

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hydrogen_gateway::auth::{self, AuthService, AuthServiceConfig};
use hydrogen_gateway::config::Config;
use hydrogen_gateway::device::{DeviceService, DeviceServiceConfig};
use hydrogen_gateway::errors::GatewayError;
use hydrogen_gateway::metrics::MetricsServer;
use hydrogen_gateway::multi_server::MultiProtocolServer;
use hydrogen_gateway::protocols::grpc::GrpcServer;
use hydrogen_gateway::protocols::http::HttpServer;
use hydrogen_gateway::protocols::mqtt::MqttServer;
use hydrogen_gateway::protocols::zmq::ZmqServer;
use hydrogen_gateway::protocols::{self, ConnectionInfo, ProtocolServer};
use hydrogen_gateway::registry::ServiceRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydrogen_gateway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Hydrogen Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().map_err(|e| GatewayError::Config(e.to_string()))?;
    info!(host = %config.host, http_port = config.http_port, "loaded configuration");

    let auth = auth::shared(AuthServiceConfig {
        token_expiration_secs: config.token_expiration_secs as i64,
        session_timeout_secs: config.session_timeout_secs as i64,
        max_failed_attempts: config.max_failed_attempts,
        lockout_duration_secs: config.lockout_duration_secs as i64,
    });
    auth.bootstrap_default_admin().await;

    let devices = Arc::new(DeviceService::new(DeviceServiceConfig {
        health_check_interval: std::time::Duration::from_secs(
            config.health_check_interval_secs,
        ),
        ..Default::default()
    }));

    let registry = ServiceRegistry::new();
    registry.register_service(auth.clone()).await;
    registry.register_service(devices.clone()).await;

    registry.initialize_all().await.map_err(GatewayError::from)?;
    registry.start_all().await.map_err(GatewayError::from)?;
    info!("service registry started");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let health_monitor = tokio::spawn(devices.clone().health_monitor_loop(shutdown_rx));

    let http_addr = (config.host.as_str(), config.http_port)
        .to_socket_addrs_checked()?;
    let grpc_addr = (config.host.as_str(), config.grpc_port)
        .to_socket_addrs_checked()?;
    let mqtt_addr = (config.host.as_str(), config.mqtt_port)
        .to_socket_addrs_checked()?;

    let http_server: Arc<dyn ProtocolServer> =
        Arc::new(HttpServer::new(http_addr, auth.clone(), devices.clone()));
    let grpc_server: Arc<dyn ProtocolServer> =
        Arc::new(GrpcServer::new(grpc_addr, auth.clone(), devices.clone()));
    let mqtt_server: Arc<dyn ProtocolServer> = Arc::new(MqttServer::new(
        mqtt_addr,
        "hydrogen-gateway",
        devices.clone(),
    ));
    let zmq_server: Arc<dyn ProtocolServer> =
        Arc::new(ZmqServer::new(config.zmq_address.clone(), devices.clone()));

    let multi_server = Arc::new(MultiProtocolServer::new(vec![
        http_server,
        grpc_server,
        mqtt_server,
        zmq_server,
    ]));

    multi_server
        .set_global_connect_callback(Arc::new(|info: &ConnectionInfo| {
            info!(client_id = %info.client_id, protocol = ?info.protocol, "client connected");
        }))
        .await;
    multi_server
        .set_global_disconnect_callback(Arc::new(|client_id: &str| {
            info!(client_id, "client disconnected");
        }))
        .await;

    if !multi_server.start_all().await {
        for server in multi_server.servers() {
            if server.status().await != protocols::ProtocolStatus::Running {
                return Err(GatewayError::ProtocolServerStartFailed(server.protocol_name().to_string()).into());
            }
        }
    }
    info!("protocol servers started");

    let metrics_server = MetricsServer::new(config.metrics_port);
    tokio::spawn(async move {
        if let Err(e) = metrics_server.serve().await {
            error!(error = %e, "metrics server error");
        }
    });
    info!(port = config.metrics_port, "metrics server listening");

    info!("gateway ready, listening for shutdown signals (SIGTERM, SIGINT)");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, initiating graceful shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("SIGTERM received, initiating graceful shutdown...");
        }
    }

    info!("stopping protocol servers...");
    multi_server.stop_all().await;

    let _ = shutdown_tx.send(true);
    let _ = health_monitor.await;

    info!("stopping service registry...");
    registry.stop_all().await;
    registry.shutdown_all().await;

    info!("Hydrogen Gateway stopped successfully");
    Ok(())
}

trait ToSocketAddrChecked {
    fn to_socket_addrs_checked(self) -> Result<std::net::SocketAddr>;
}

impl ToSocketAddrChecked for (&str, u16) {
    fn to_socket_addrs_checked(self) -> Result<std::net::SocketAddr> {
        use std::net::ToSocketAddrs;
        self.to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("could not resolve address {}:{}", self.0, self.1))
    }
}
