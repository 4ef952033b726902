//! Unified device client (C11): client side of the protocol servers in
//! [`crate::protocols`]. Handles auto-reconnect, request/response
//! correlation, heartbeats, and subscription replay.
//!
//! Grounded on `original_source/.../unified_device_client.h`
//! (`UnifiedDeviceClient`, `ClientStatistics`), adapted from C++
//! condition-variable waiters to `tokio::sync::oneshot` channels — the
//! idiomatic equivalent of "a caller blocks on a registered waiter with a
//! timeout" in an async runtime.

pub mod models;
pub mod transport;

pub use models::{ClientStatistics, UnifiedDeviceClientConfig};
pub use transport::{ClientTransport, TransportError};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::{Message, MessageType};
use crate::transformer::MessageTransformer;

type AsyncCallback = Box<dyn FnOnce(Value) + Send>;
type EventCallback = Box<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriptionKind {
    Property,
    Event,
}

/// Client side of the protocol-server connection (spec.md §4.11).
pub struct UnifiedDeviceClient {
    config: UnifiedDeviceClientConfig,
    transport: Arc<dyn ClientTransport>,

    connected: AtomicBool,
    connecting: AtomicBool,
    shutdown: AtomicBool,

    response_waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    async_callbacks: Mutex<HashMap<String, AsyncCallback>>,
    device_cache: RwLock<HashMap<String, Value>>,
    subscriptions: RwLock<HashSet<(SubscriptionKind, String, String)>>,

    statistics: Mutex<ClientStatistics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_notify: Notify,

    event_callback: RwLock<Option<EventCallback>>,
    property_change_callback: RwLock<Option<EventCallback>>,
    error_callback: RwLock<Option<EventCallback>>,
}

impl UnifiedDeviceClient {
    pub fn new(config: UnifiedDeviceClientConfig, transport: Arc<dyn ClientTransport>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            response_waiters: Mutex::new(HashMap::new()),
            async_callbacks: Mutex::new(HashMap::new()),
            device_cache: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashSet::new()),
            statistics: Mutex::new(ClientStatistics::default()),
            tasks: Mutex::new(Vec::new()),
            shutdown_notify: Notify::new(),
            event_callback: RwLock::new(None),
            property_change_callback: RwLock::new(None),
            error_callback: RwLock::new(None),
        })
    }

    pub async fn set_event_callback(&self, cb: EventCallback) {
        *self.event_callback.write().await = Some(cb);
    }
    pub async fn set_property_change_callback(&self, cb: EventCallback) {
        *self.property_change_callback.write().await = Some(cb);
    }
    pub async fn set_error_callback(&self, cb: EventCallback) {
        *self.error_callback.write().await = Some(cb);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn record_error(&self, message: String) {
        let mut stats = self.statistics.lock().await;
        stats.errors += 1;
        stats.last_error = Some(message);
    }

    pub async fn statistics(&self) -> ClientStatistics {
        self.statistics.lock().await.clone()
    }

    pub async fn reset_statistics(&self) {
        *self.statistics.lock().await = ClientStatistics::default();
    }

    /// Idempotent when already connected; exclusive — a second concurrent
    /// `connect` returns `false` while one is already in flight
    /// (spec.md §4.11, testable property 5).
    pub async fn connect(self: &Arc<Self>) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }
        if self.connecting.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return false;
        }

        self.shutdown.store(false, Ordering::SeqCst);
        let result = self.transport.connect().await;
        self.connecting.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.spawn_background_tasks().await;
                self.replay_subscriptions().await;
                true
            }
            Err(e) => {
                self.record_error(e.to_string()).await;
                false
            }
        }
    }

    /// Sets the shutdown flag, wakes all waiters with a timeout error,
    /// and joins background tasks (spec.md §5 cancellation model).
    pub async fn disconnect(self: &Arc<Self>) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();

        let mut waiters = self.response_waiters.lock().await;
        for (message_id, tx) in waiters.drain() {
            let _ = tx.send(json!({"error": "Message timeout", "messageId": message_id}));
        }
        drop(waiters);

        self.transport.disconnect().await;

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
    }

    async fn spawn_background_tasks(self: &Arc<Self>) {
        let receive_handle = tokio::spawn(self.clone().receive_loop());
        let heartbeat_handle = tokio::spawn(self.clone().heartbeat_loop());
        let mut handles = vec![receive_handle, heartbeat_handle];
        if self.config.enable_auto_reconnect {
            handles.push(tokio::spawn(self.clone().reconnection_loop()));
        }
        self.tasks.lock().await.extend(handles);
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match self.transport.recv().await {
                Some(raw) => self.handle_incoming_message(raw).await,
                None => break,
            }
        }
    }

    /// Sleeps `heartbeat_interval`, emits a heartbeat when connected; send
    /// errors are logged but never break the loop (spec.md §4.11).
    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !self.connected.load(Ordering::SeqCst) {
                continue;
            }
            let mut msg = Message::new(MessageType::Heartbeat, self.config.client_id.clone(), "heartbeat");
            msg.payload = json!({"timestamp": chrono::Utc::now().timestamp_millis()});
            msg.target_protocol = Some(self.config.target_protocol);
            let payload = MessageTransformer::to_protocol_format(&msg, self.config.target_protocol);
            if let Err(e) = self.transport.send(payload).await {
                warn!(error = %e, "heartbeat send failed");
            }
        }
    }

    /// Runs while `enable_auto_reconnect`; waits `reconnect_interval`
    /// between attempts and honors `max_reconnect_attempts` (0 = unlimited).
    async fn reconnection_loop(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                _ = self.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if self.connected.load(Ordering::SeqCst) || !self.transport.is_connected().await {
                if self.connected.load(Ordering::SeqCst) {
                    continue;
                }
                if self.config.max_reconnect_attempts != 0 && attempts >= self.config.max_reconnect_attempts {
                    continue;
                }
                attempts += 1;
                self.statistics.lock().await.reconnection_attempts += 1;
                if self.transport.connect().await.is_ok() {
                    self.connected.store(true, Ordering::SeqCst);
                    self.replay_subscriptions().await;
                    attempts = 0;
                }
            }
        }
    }

    /// Dispatch by `type` to response / event / property-change / error /
    /// heartbeat handlers (spec.md §4.11).
    pub async fn handle_incoming_message(&self, raw: Value) {
        self.statistics.lock().await.messages_received += 1;

        let message_type = raw.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match message_type {
            "RESPONSE" => self.dispatch_response(raw).await,
            "ERROR" => self.dispatch_response(raw.clone()).await,
            "EVENT" => {
                if let Some(cb) = self.event_callback.read().await.as_ref() {
                    if let Some(msg) = Self::to_message(&raw) {
                        cb(&msg);
                    }
                }
            }
            "PROPERTY_CHANGE" => {
                if let Some(cb) = self.property_change_callback.read().await.as_ref() {
                    if let Some(msg) = Self::to_message(&raw) {
                        cb(&msg);
                    }
                }
            }
            "HEARTBEAT" => {
                debug!("heartbeat acknowledged by remote");
            }
            other => {
                debug!(message_type = other, "unhandled inbound message type");
            }
        }
    }

    async fn dispatch_response(&self, raw: Value) {
        let Some(correlation_id) = raw.get("correlationId").and_then(|v| v.as_str()).map(str::to_string) else {
            warn!("response message missing correlationId, dropping");
            return;
        };
        let payload = raw.get("payload").cloned().unwrap_or(Value::Null);

        if let Some(tx) = self.response_waiters.lock().await.remove(&correlation_id) {
            let _ = tx.send(payload);
            return;
        }
        if let Some(cb) = self.async_callbacks.lock().await.remove(&correlation_id) {
            cb(payload);
            return;
        }
        debug!(correlation_id = %correlation_id, "response for unknown message id");
    }

    fn to_message(raw: &Value) -> Option<Message> {
        serde_json::from_value(raw.clone()).ok()
    }

    /// Registers a waiter keyed by `messageId`, transforms via C3, writes,
    /// then blocks up to `timeout`. Returns the decoded response payload or
    /// `{"error": "Message timeout", "messageId": ...}` (spec.md §4.11).
    pub async fn send_message(&self, mut msg: Message, timeout: Duration) -> Value {
        let message_id = msg.message_id.clone();
        let (tx, rx) = oneshot::channel();
        self.response_waiters.lock().await.insert(message_id.clone(), tx);

        msg.target_protocol = Some(self.config.target_protocol);
        let payload = MessageTransformer::to_protocol_format(&msg, self.config.target_protocol);

        if let Err(e) = self.transport.send(payload).await {
            self.response_waiters.lock().await.remove(&message_id);
            self.record_error(e.to_string()).await;
            return json!({"error": e.to_string(), "messageId": message_id});
        }
        self.statistics.lock().await.messages_sent += 1;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => value,
            _ => {
                self.response_waiters.lock().await.remove(&message_id);
                json!({"error": "Message timeout", "messageId": message_id})
            }
        }
    }

    /// Registers the callback, sends, returns immediately. On write error
    /// the callback is invoked inline with `{"error": ...}`.
    pub async fn send_message_async(&self, mut msg: Message, callback: AsyncCallback) {
        let message_id = msg.message_id.clone();
        self.async_callbacks.lock().await.insert(message_id.clone(), callback);

        msg.target_protocol = Some(self.config.target_protocol);
        let payload = MessageTransformer::to_protocol_format(&msg, self.config.target_protocol);

        if let Err(e) = self.transport.send(payload).await {
            if let Some(cb) = self.async_callbacks.lock().await.remove(&message_id) {
                cb(json!({"error": e.to_string()}));
            }
            return;
        }
        self.statistics.lock().await.messages_sent += 1;
    }

    async fn subscribe(&self, kind: SubscriptionKind, device_id: &str, name: &str) -> bool {
        let mut msg = Message::new(MessageType::Command, self.config.client_id.clone(), "subscribe");
        msg.recipient_id = device_id.to_string();
        msg.payload = json!({
            "kind": if kind == SubscriptionKind::Property { "property" } else { "event" },
            "name": name,
        });
        let response = self.send_message(msg, self.config.message_timeout).await;
        let ok = response.get("error").is_none();
        if ok {
            self.subscriptions
                .write()
                .await
                .insert((kind, device_id.to_string(), name.to_string()));
        }
        ok
    }

    async fn unsubscribe(&self, kind: SubscriptionKind, device_id: &str, name: &str) -> bool {
        let mut msg = Message::new(MessageType::Command, self.config.client_id.clone(), "unsubscribe");
        msg.recipient_id = device_id.to_string();
        msg.payload = json!({
            "kind": if kind == SubscriptionKind::Property { "property" } else { "event" },
            "name": name,
        });
        let response = self.send_message(msg, self.config.message_timeout).await;
        let ok = response.get("error").is_none();
        self.subscriptions
            .write()
            .await
            .remove(&(kind, device_id.to_string(), name.to_string()));
        ok
    }

    pub async fn subscribe_to_property(&self, device_id: &str, property: &str) -> bool {
        self.subscribe(SubscriptionKind::Property, device_id, property).await
    }
    pub async fn unsubscribe_from_property(&self, device_id: &str, property: &str) -> bool {
        self.unsubscribe(SubscriptionKind::Property, device_id, property).await
    }
    pub async fn subscribe_to_event(&self, device_id: &str, event: &str) -> bool {
        self.subscribe(SubscriptionKind::Event, device_id, event).await
    }
    pub async fn unsubscribe_from_event(&self, device_id: &str, event: &str) -> bool {
        self.unsubscribe(SubscriptionKind::Event, device_id, event).await
    }

    /// Cached subscriptions are replayed on (re)connect, per spec.md §4.11.
    async fn replay_subscriptions(&self) {
        let subscriptions: Vec<_> = self.subscriptions.read().await.iter().cloned().collect();
        for (kind, device_id, name) in subscriptions {
            let mut msg = Message::new(MessageType::Command, self.config.client_id.clone(), "subscribe");
            msg.message_id = Uuid::new_v4().to_string();
            msg.recipient_id = device_id.clone();
            msg.payload = json!({
                "kind": if kind == SubscriptionKind::Property { "property" } else { "event" },
                "name": name,
            });
            msg.target_protocol = Some(self.config.target_protocol);
            let payload = MessageTransformer::to_protocol_format(&msg, self.config.target_protocol);
            let _ = self.transport.send(payload).await;
        }
    }

    pub async fn cache_device(&self, device_id: &str, info: Value) {
        self.device_cache.write().await.insert(device_id.to_string(), info);
    }

    pub async fn cached_device(&self, device_id: &str) -> Option<Value> {
        self.device_cache.read().await.get(device_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// In-process transport backed by two channels, standing in for a real
    /// protocol connection in tests.
    struct ChannelTransport {
        outbox: mpsc::UnboundedSender<Value>,
        inbox: Mutex<mpsc::UnboundedReceiver<Value>>,
        connected: AtomicBool,
        fail_connect: AtomicBool,
    }

    #[async_trait]
    impl ClientTransport for ChannelTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectFailed("refused".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn send(&self, payload: Value) -> Result<(), TransportError> {
            self.outbox.send(payload).map_err(|_| TransportError::Closed)
        }
        async fn recv(&self) -> Option<Value> {
            self.inbox.lock().await.recv().await
        }
    }

    fn make_client() -> (Arc<UnifiedDeviceClient>, mpsc::UnboundedReceiver<Value>, mpsc::UnboundedSender<Value>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            outbox: out_tx,
            inbox: Mutex::new(in_rx),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
        });
        let mut config = UnifiedDeviceClientConfig::default();
        config.enable_auto_reconnect = false;
        config.heartbeat_interval = Duration::from_secs(3600);
        let client = UnifiedDeviceClient::new(config, transport);
        (client, out_rx, in_tx)
    }

    #[tokio::test]
    async fn connect_is_idempotent_when_already_connected() {
        let (client, _out_rx, _in_tx) = make_client();
        assert!(client.connect().await);
        assert!(client.connect().await);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn concurrent_connect_only_one_wins() {
        let (client, _out_rx, _in_tx) = make_client();
        client.connecting.store(true, Ordering::SeqCst);
        assert!(!client.connect().await);
        client.connecting.store(false, Ordering::SeqCst);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn send_message_times_out_without_a_response() {
        let (client, mut out_rx, _in_tx) = make_client();
        client.connect().await;
        let msg = Message::new(MessageType::Command, "client", "devices/cam1/expose");
        let response = client.send_message(msg, Duration::from_millis(50)).await;
        assert!(out_rx.recv().await.is_some());
        assert_eq!(response["error"], json!("Message timeout"));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn send_message_resolves_on_matching_correlation_id() {
        let (client, mut out_rx, _in_tx) = make_client();
        client.connect().await;
        let msg = Message::new(MessageType::Command, "client", "devices/cam1/expose");
        let message_id = msg.message_id.clone();

        let client_for_send = client.clone();
        let send_task = tokio::spawn(async move { client_for_send.send_message(msg, Duration::from_secs(2)).await });

        let sent = out_rx.recv().await.unwrap();
        assert_eq!(sent["messageId"].as_str(), Some(message_id.as_str()));

        let response = json!({
            "type": "RESPONSE",
            "correlationId": message_id,
            "payload": {"success": true},
        });
        client.handle_incoming_message(response).await;

        let result = send_task.await.unwrap();
        assert_eq!(result["success"], json!(true));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_wakes_pending_waiters_with_timeout_error() {
        let (client, mut out_rx, _in_tx) = make_client();
        client.connect().await;
        let msg = Message::new(MessageType::Command, "client", "devices/cam1/expose");

        let client_for_send = client.clone();
        let send_task = tokio::spawn(async move { client_for_send.send_message(msg, Duration::from_secs(5)).await });
        out_rx.recv().await.unwrap();

        client.disconnect().await;
        let result = send_task.await.unwrap();
        assert_eq!(result["error"], json!("Message timeout"));
    }

    #[tokio::test]
    async fn response_without_correlation_id_is_dropped_not_panicked() {
        let (client, _out_rx, _in_tx) = make_client();
        client.connect().await;
        client
            .handle_incoming_message(json!({"type": "RESPONSE", "payload": {"x": 1}}))
            .await;
        client.disconnect().await;
    }
}
