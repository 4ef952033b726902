//! Prometheus metrics for the Hydrogen gateway.
//!
//! Grounded on the teacher's `metrics.rs` (`CounterVec`/`GaugeVec`/
//! `HistogramVec` behind `lazy_static!`, one `/metrics` route using
//! `TextEncoder`); metric names and labels change to match this
//! gateway's domain.

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;

lazy_static! {
    /// Commands executed per device and outcome.
    pub static ref COMMANDS_EXECUTED: CounterVec = register_counter_vec!(
        "hydrogen_commands_executed_total",
        "Total number of device commands executed",
        &["device_id", "command", "success"]
    )
    .unwrap();

    /// Devices currently connected, by protocol.
    pub static ref CONNECTED_DEVICES: GaugeVec = register_gauge_vec!(
        "hydrogen_connected_devices",
        "Number of currently connected devices",
        &["device_type"]
    )
    .unwrap();

    /// Active connections per protocol server.
    pub static ref ACTIVE_CONNECTIONS: GaugeVec = register_gauge_vec!(
        "hydrogen_active_connections",
        "Number of active connections per protocol",
        &["protocol"]
    )
    .unwrap();

    /// Errors handled by the unified error handler.
    pub static ref ERRORS_HANDLED: CounterVec = register_counter_vec!(
        "hydrogen_errors_handled_total",
        "Total number of errors handled",
        &["category", "severity", "recovery_action"]
    )
    .unwrap();

    /// Command dispatch latency.
    pub static ref COMMAND_LATENCY: HistogramVec = register_histogram_vec!(
        "hydrogen_command_duration_seconds",
        "Time taken to execute a device command",
        &["device_type"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Authentication attempts by outcome.
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "hydrogen_auth_attempts_total",
        "Total number of authentication attempts",
        &["outcome"]
    )
    .unwrap();

    /// Circuit breaker OPEN transitions.
    pub static ref CIRCUIT_BREAKER_TRIPS: CounterVec = register_counter_vec!(
        "hydrogen_circuit_breaker_trips_total",
        "Total number of circuit breaker OPEN transitions",
        &["connection_id"]
    )
    .unwrap();
}

pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
