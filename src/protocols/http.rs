//! HTTP/WebSocket protocol server — the reference implementation
//! (spec.md §4.9).
//!
//! Grounded on the teacher's `metrics.rs` axum bootstrap
//! (`Router`/`TcpListener`/`axum::serve`) generalized from a single
//! `/metrics` route to the full required surface, plus
//! `original_source/.../http_server.h` for endpoint/middleware shape.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Notify, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthRequest, AuthService};
use crate::device::DeviceService;
use crate::message::CommunicationProtocol;
use crate::protocols::{
    error_envelope, success_envelope, ConnectCallback, ConnectionInfo, DisconnectCallback, MessageCallback, ProtocolServer,
    ProtocolServerConfig, ProtocolStatus,
};

/// Endpoints the auth middleware never gates, per spec.md §4.9.
const AUTH_WHITELIST: &[&str] = &["/api/auth/login", "/api/status", "/api/health"];

struct Stats {
    requests: AtomicU64,
    errors: AtomicU64,
}

pub struct HttpServerState {
    pub auth: Arc<AuthService>,
    pub devices: Arc<DeviceService>,
    start_time: Instant,
    stats: Stats,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
    connect_event: RwLock<Option<ConnectCallback>>,
    message_event: RwLock<Option<MessageCallback>>,
    disconnect_event: RwLock<Option<DisconnectCallback>>,
}

type SharedState = Arc<HttpServerState>;

pub struct HttpServer {
    state: SharedState,
    addr: SocketAddr,
    status: RwLock<ProtocolStatus>,
    config: RwLock<ProtocolServerConfig>,
    shutdown: Arc<Notify>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, auth: Arc<AuthService>, devices: Arc<DeviceService>) -> Self {
        Self {
            state: Arc::new(HttpServerState {
                auth,
                devices,
                start_time: Instant::now(),
                stats: Stats {
                    requests: AtomicU64::new(0),
                    errors: AtomicU64::new(0),
                },
                connections: RwLock::new(HashMap::new()),
                connect_event: RwLock::new(None),
                message_event: RwLock::new(None),
                disconnect_event: RwLock::new(None),
            }),
            addr,
            status: RwLock::new(ProtocolStatus::Stopped),
            config: RwLock::new(ProtocolServerConfig { values: HashMap::new() }),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), request_tracking_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(response_headers_middleware))
        .layer(cors)
        .with_state(state)
}

async fn response_headers_middleware(request: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("Server", HeaderValue::from_static("Hydrogen-Server/1.0"));
    headers.insert("X-Powered-By", HeaderValue::from_static("Hydrogen"));
    response
}

async fn request_tracking_middleware(State(state): State<SharedState>, request: Request<axum::body::Body>, next: Next) -> Response {
    state.stats.requests.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;
    if response.status().is_server_error() || response.status().is_client_error() {
        state.stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    response
}

async fn auth_middleware(State(state): State<SharedState>, request: Request<axum::body::Body>, next: Next) -> Response {
    let path = request.uri().path();
    if AUTH_WHITELIST.contains(&path) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(t) if state.auth.validate_token(t).await => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, Json(error_envelope("Unauthorized", 401))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let remote_address = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    let result = state
        .auth
        .authenticate(AuthRequest {
            username: body.username,
            password: body.password,
            client_id: Uuid::new_v4().to_string(),
            remote_address,
        })
        .await;

    if !result.success {
        return (StatusCode::UNAUTHORIZED, Json(error_envelope(&result.error_message.unwrap_or_default(), 401))).into_response();
    }

    let token = result.token.expect("success implies token");
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "token": token.token,
            "expiresAt": token.expires_at.timestamp(),
            "user": {
                "userId": token.user_id,
                "username": token.username,
                "role": token.role as u8,
            }
        })),
    )
        .into_response()
}

async fn logout(State(state): State<SharedState>, request: Request<axum::body::Body>) -> Response {
    if let Some(token) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.auth.revoke_token(token).await;
    }
    (StatusCode::OK, Json(success_envelope(None))).into_response()
}

async fn list_devices(State(state): State<SharedState>) -> Response {
    let devices = state.devices.get_all_devices().await;
    let payload: Vec<_> = devices
        .iter()
        .map(|d| {
            json!({
                "deviceId": d.device_id,
                "deviceName": d.device_name,
                "deviceType": d.device_type,
                "manufacturer": d.manufacturer,
                "model": d.model,
                "connectionStatus": d.connection_status as u8,
                "healthStatus": d.health_status as u8,
            })
        })
        .collect();
    (StatusCode::OK, Json(payload)).into_response()
}

async fn get_device(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.devices.get_device_info(&id).await {
        Some(d) => (
            StatusCode::OK,
            Json(json!({
                "deviceId": d.device_id,
                "deviceName": d.device_name,
                "deviceType": d.device_type,
                "manufacturer": d.manufacturer,
                "model": d.model,
                "connectionStatus": d.connection_status as u8,
                "healthStatus": d.health_status as u8,
                "properties": d.properties,
            })),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_envelope("device not found", 404))).into_response(),
    }
}

async fn status(State(state): State<SharedState>) -> Response {
    let connections = state.connections.read().await.len();
    (
        StatusCode::OK,
        Json(json!({
            "status": "running",
            "uptime": state.start_time.elapsed().as_secs(),
            "connections": connections,
            "requests": state.stats.requests.load(Ordering::Relaxed),
            "errors": state.stats.errors.load(Ordering::Relaxed),
        })),
    )
        .into_response()
}

async fn health(State(_state): State<SharedState>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "healthy": true,
            "status": "ok",
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
        .into_response()
}

async fn websocket_upgrade(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    let client_id = format!("ws_{:016x}", rand_u64());
    let now = chrono::Utc::now();
    let info = ConnectionInfo {
        client_id: client_id.clone(),
        protocol: CommunicationProtocol::WebSocket,
        remote_address: String::new(),
        remote_port: 0,
        connected_at: now,
        last_activity: now,
    };
    state.connections.write().await.insert(client_id.clone(), info.clone());
    crate::metrics::ACTIVE_CONNECTIONS.with_label_values(&["websocket"]).inc();
    if let Some(cb) = state.connect_event.read().await.as_ref() {
        cb(&info);
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if let Some(conn) = state.connections.write().await.get_mut(&client_id) {
            conn.last_activity = chrono::Utc::now();
        }
        if let WsMessage::Text(text) = msg {
            if let Some(cb) = state.message_event.read().await.as_ref() {
                cb(&client_id, &text);
            }
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if value.get("type").and_then(|t| t.as_str()) == Some("heartbeat") {
                    let echo = json!({"type": "heartbeat", "timestamp": value.get("timestamp")});
                    if socket.send(WsMessage::Text(echo.to_string().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }
    }

    state.connections.write().await.remove(&client_id);
    crate::metrics::ACTIVE_CONNECTIONS.with_label_values(&["websocket"]).dec();
    if let Some(cb) = state.disconnect_event.read().await.as_ref() {
        cb(&client_id);
    }
}

fn rand_u64() -> u64 {
    use rand::RngCore;
    rand::thread_rng().next_u64()
}

#[async_trait::async_trait]
impl ProtocolServer for HttpServer {
    fn protocol(&self) -> CommunicationProtocol {
        CommunicationProtocol::Http
    }

    fn protocol_name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> bool {
        *self.status.write().await = ProtocolStatus::Starting;
        let listener = match tokio::net::TcpListener::bind(self.addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to bind HTTP listener");
                *self.status.write().await = ProtocolStatus::Error;
                return false;
            }
        };
        let router = build_router(self.state.clone());
        *self.status.write().await = ProtocolStatus::Running;
        info!(addr = %self.addr, "HTTP/WebSocket server listening");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
            let result = axum::serve(listener, make_service)
                .with_graceful_shutdown(async move {
                    shutdown.notified().await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "HTTP server terminated");
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
        self.state.connections.read().await.values().cloned().collect()
    }

    async fn disconnect_client(&self, client_id: &str) -> bool {
        self.state.connections.write().await.remove(client_id).is_some()
    }

    async fn set_connect_callback(&self, cb: ConnectCallback) {
        *self.state.connect_event.write().await = Some(cb);
    }

    async fn set_message_callback(&self, cb: MessageCallback) {
        *self.state.message_event.write().await = Some(cb);
    }

    async fn set_disconnect_callback(&self, cb: DisconnectCallback) {
        *self.state.disconnect_event.write().await = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthServiceConfig;
    use crate::device::DeviceServiceConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        Arc::new(HttpServerState {
            auth: Arc::new(AuthService::new(AuthServiceConfig::default())),
            devices: Arc::new(DeviceService::new(DeviceServiceConfig::default())),
            start_time: Instant::now(),
            stats: Stats {
                requests: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            },
            connections: RwLock::new(HashMap::new()),
            connect_event: RwLock::new(None),
            message_event: RwLock::new(None),
            disconnect_event: RwLock::new(None),
        })
    }

    #[tokio::test]
    async fn health_endpoint_is_whitelisted_and_returns_ok() {
        let state = test_state();
        let router = build_router(state);
        let response = router
            .oneshot(Request::builder().uri("/api/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Server").unwrap(), "Hydrogen-Server/1.0");
    }

    #[tokio::test]
    async fn devices_endpoint_requires_bearer_token() {
        let state = test_state();
        let router = build_router(state);
        let response = router
            .oneshot(Request::builder().uri("/api/devices").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_then_devices_succeeds_with_token() {
        let state = test_state();
        state.auth.bootstrap_default_admin().await;
        let router = build_router(state);

        let login_body = json!({"username": "admin", "password": "admin123!"}).to_string();
        let login_response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(login_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(login_response.status(), StatusCode::OK);
        let bytes = login_response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let token = parsed["token"].as_str().unwrap();

        let devices_response = router
            .oneshot(
                Request::builder()
                    .uri("/api/devices")
                    .header("authorization", format!("Bearer {token}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(devices_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_request_never_reaches_the_handler() {
        let state = test_state();
        state.auth.bootstrap_default_admin().await;
        let router = build_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/devices/ghost")
                    .header("authorization", "Bearer irrelevant")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_device_returns_404_for_an_authenticated_caller() {
        let state = test_state();
        state.auth.bootstrap_default_admin().await;
        let router = build_router(state.clone());

        let login_body = json!({"username": "admin", "password": "admin123!"}).to_string();
        let login_response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(login_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = login_response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let token = parsed["token"].as_str().unwrap();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/devices/ghost")
                    .header("authorization", format!("Bearer {token}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
