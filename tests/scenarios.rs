//! End-to-end scenario tests (spec.md §8, S1-S6) driven against the
//! Axum router directly via `tower::ServiceExt::oneshot`, without binding
//! a socket.

use std::collections::HashMap;
use std::time::Duration;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hydrogen_gateway::auth::{AuthService, AuthServiceConfig};
use hydrogen_gateway::device::{DeviceInfo, DeviceService, DeviceServiceConfig};
use hydrogen_gateway::protocols::http::HttpServer;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_server() -> (HttpServer, Arc<AuthService>, Arc<DeviceService>) {
    let auth = hydrogen_gateway::auth::shared(AuthServiceConfig::default());
    let devices = Arc::new(DeviceService::new(DeviceServiceConfig::default()));
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    (HttpServer::new(addr, auth.clone(), devices.clone()), auth, devices)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn s1_login_then_status() {
    let (server, auth, _devices) = test_server();
    auth.bootstrap_default_admin().await;
    let router = server.router();

    let login_body = json!({"username": "admin", "password": "admin123!"}).to_string();
    let login_req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(login_body))
        .unwrap();
    let login_resp = router.clone().oneshot(login_req).await.unwrap();
    assert_eq!(login_resp.status(), StatusCode::OK);
    let body = json_body(login_resp).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["user"]["role"], json!(4));
    let token = body["token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());

    let status_req = Request::builder()
        .method("GET")
        .uri("/api/status")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let status_resp = router.oneshot(status_req).await.unwrap();
    assert_eq!(status_resp.status(), StatusCode::OK);
    let body = json_body(status_resp).await;
    assert_eq!(body["status"], json!("running"));
    assert!(body["uptime"].as_u64().is_some());
}

#[tokio::test]
async fn s2_device_listing() {
    let (server, _auth, devices) = test_server();
    devices
        .register_device(
            DeviceInfo {
                manufacturer: "ZWO".to_string(),
                model: "ASI294".to_string(),
                ..DeviceInfo::new("cam1", "camera", "Cam 1")
            },
            None,
        )
        .await;
    let router = server.router();

    let list_req = Request::builder().uri("/api/devices").body(Body::empty()).unwrap();
    let list_resp = router.clone().oneshot(list_req).await.unwrap();
    assert_eq!(list_resp.status(), StatusCode::OK);
    let body = json_body(list_resp).await;
    let arr = body.as_array().unwrap();
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["deviceId"], json!("cam1"));
    assert_eq!(arr[0]["connectionStatus"], json!(0));

    let found_req = Request::builder().uri("/api/devices/cam1").body(Body::empty()).unwrap();
    let found_resp = router.clone().oneshot(found_req).await.unwrap();
    assert_eq!(found_resp.status(), StatusCode::OK);

    let missing_req = Request::builder().uri("/api/devices/nope").body(Body::empty()).unwrap();
    let missing_resp = router.oneshot(missing_req).await.unwrap();
    assert_eq!(missing_resp.status(), StatusCode::NOT_FOUND);
    let body = json_body(missing_resp).await;
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn s5_auth_lockout() {
    let auth = hydrogen_gateway::auth::shared(AuthServiceConfig {
        max_failed_attempts: 3,
        lockout_duration_secs: 1,
        ..AuthServiceConfig::default()
    });
    auth.bootstrap_default_admin().await;

    let bad = |n: u32| hydrogen_gateway::auth::AuthRequest {
        username: "admin".to_string(),
        password: format!("wrong-{n}"),
        client_id: "test".to_string(),
        remote_address: "127.0.0.1".to_string(),
    };

    for n in 0..3 {
        let result = auth.authenticate(bad(n)).await;
        assert!(!result.success);
    }

    let locked = auth
        .authenticate(hydrogen_gateway::auth::AuthRequest {
            username: "admin".to_string(),
            password: "admin123!".to_string(),
            client_id: "test".to_string(),
            remote_address: "127.0.0.1".to_string(),
        })
        .await;
    assert!(!locked.success);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let recovered = auth
        .authenticate(hydrogen_gateway::auth::AuthRequest {
            username: "admin".to_string(),
            password: "admin123!".to_string(),
            client_id: "test".to_string(),
            remote_address: "127.0.0.1".to_string(),
        })
        .await;
    assert!(recovered.success);
}

#[tokio::test]
async fn s6_command_lifecycle() {
    let devices = DeviceService::new(DeviceServiceConfig::default());
    devices.register_device(DeviceInfo::new("cam1", "camera", "Cam 1"), None).await;

    let mut params = HashMap::new();
    params.insert("duration".to_string(), "0.1".to_string());
    let command_id = devices.execute_command("cam1", "expose", params).await;

    let pattern = regex_lite_match(&command_id);
    assert!(pattern, "commandId {command_id} does not match /^cmd_[0-9a-f]{{8}}$/");

    tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            let pending = devices.get_pending_commands(Some("cam1")).await;
            if pending.iter().all(|c| c.command_id != command_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("command did not complete within 500ms");

    let result = devices.get_command_result(&command_id).await.expect("result recorded");
    assert!(result.success);
}

fn regex_lite_match(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("cmd_") else { return false };
    hex.len() == 8 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
