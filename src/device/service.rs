//! Device service (C8): registry, properties, commands, groups, health
//! monitor.
//!
//! Grounded on `original_source/.../device_service.h`'s `IDeviceService`
//! surface (narrowed to spec.md §4.8 plus the `getDevicesByCapability`/
//! `getCommandHistory`/`updateBulkProperties` supplements noted in
//! SPEC_FULL.md) and the teacher's `tenant_router.rs` concurrency shape —
//! one `RwLock` per concern, never held across a callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::device::collaborator::DeviceCollaborator;
use crate::device::models::{
    DeviceCommand, DeviceCommandResult, DeviceConnectionStatus, DeviceGroup, DeviceHealthStatus, DeviceInfo,
};
use crate::registry::Service;

type DeviceEventCallback = Box<dyn Fn(&str, &str, &str) + Send + Sync>;
type ConnectionEventCallback = Box<dyn Fn(&str, DeviceConnectionStatus) + Send + Sync>;
type CommandEventCallback = Box<dyn Fn(&DeviceCommandResult) + Send + Sync>;
type HealthEventCallback = Box<dyn Fn(&str, DeviceHealthStatus, &str) + Send + Sync>;

struct Registry {
    devices: HashMap<String, DeviceInfo>,
    groups: HashMap<String, DeviceGroup>,
    /// device_id -> group_ids it belongs to; the only place device<->group
    /// linkage lives.
    membership: HashMap<String, Vec<String>>,
    collaborators: HashMap<String, Arc<dyn DeviceCollaborator>>,
}

struct Commands {
    pending: HashMap<String, DeviceCommand>,
    history: Vec<DeviceCommandResult>,
}

pub struct DeviceServiceConfig {
    pub health_check_interval: Duration,
}

impl Default for DeviceServiceConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
        }
    }
}

pub struct DeviceService {
    config: RwLock<DeviceServiceConfig>,
    /// `Arc`-wrapped so `execute_command` can move a handle into the
    /// `tokio::spawn`'d worker without requiring callers to hold
    /// `Arc<DeviceService>`.
    registry: Arc<RwLock<Registry>>,
    commands: Arc<RwLock<Commands>>,
    device_event: Arc<RwLock<Option<DeviceEventCallback>>>,
    connection_event: RwLock<Option<ConnectionEventCallback>>,
    command_event: Arc<RwLock<Option<CommandEventCallback>>>,
    health_event: RwLock<Option<HealthEventCallback>>,
}

impl DeviceService {
    pub fn new(config: DeviceServiceConfig) -> Self {
        Self {
            config: RwLock::new(config),
            registry: Arc::new(RwLock::new(Registry {
                devices: HashMap::new(),
                groups: HashMap::new(),
                membership: HashMap::new(),
                collaborators: HashMap::new(),
            })),
            commands: Arc::new(RwLock::new(Commands {
                pending: HashMap::new(),
                history: Vec::new(),
            })),
            device_event: Arc::new(RwLock::new(None)),
            connection_event: RwLock::new(None),
            command_event: Arc::new(RwLock::new(None)),
            health_event: RwLock::new(None),
        }
    }

    pub async fn set_device_event_callback(&self, cb: DeviceEventCallback) {
        *self.device_event.write().await = Some(cb);
    }
    pub async fn set_connection_event_callback(&self, cb: ConnectionEventCallback) {
        *self.connection_event.write().await = Some(cb);
    }
    pub async fn set_command_event_callback(&self, cb: CommandEventCallback) {
        *self.command_event.write().await = Some(cb);
    }
    pub async fn set_health_event_callback(&self, cb: HealthEventCallback) {
        *self.health_event.write().await = Some(cb);
    }

    /// Rejects an empty id; overwrites a duplicate registration with a
    /// logged warning (spec.md §4.8).
    pub async fn register_device(&self, info: DeviceInfo, collaborator: Option<Arc<dyn DeviceCollaborator>>) -> bool {
        if info.device_id.is_empty() {
            return false;
        }
        let mut registry = self.registry.write().await;
        if registry.devices.contains_key(&info.device_id) {
            warn!(device_id = %info.device_id, "overwriting existing device registration");
        }
        if let Some(collaborator) = collaborator {
            registry.collaborators.insert(info.device_id.clone(), collaborator);
        }
        registry.devices.insert(info.device_id.clone(), info);
        true
    }

    pub async fn unregister_device(&self, device_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let removed = registry.devices.remove(device_id).is_some();
        registry.collaborators.remove(device_id);
        if let Some(group_ids) = registry.membership.remove(device_id) {
            for group_id in group_ids {
                if let Some(group) = registry.groups.get_mut(&group_id) {
                    group.device_ids.retain(|id| id != device_id);
                    group.modified_at = Utc::now();
                }
            }
        }
        removed
    }

    pub async fn is_device_registered(&self, device_id: &str) -> bool {
        self.registry.read().await.devices.contains_key(device_id)
    }

    pub async fn get_device_info(&self, device_id: &str) -> Option<DeviceInfo> {
        self.registry.read().await.devices.get(device_id).cloned()
    }

    pub async fn get_all_devices(&self) -> Vec<DeviceInfo> {
        self.registry.read().await.devices.values().cloned().collect()
    }

    pub async fn get_devices_by_type(&self, device_type: &str) -> Vec<DeviceInfo> {
        self.registry
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.device_type == device_type)
            .cloned()
            .collect()
    }

    pub async fn get_devices_by_capability(&self, capability: &str) -> Vec<DeviceInfo> {
        self.registry
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    async fn set_connection_status(&self, device_id: &str, status: DeviceConnectionStatus) -> bool {
        let device_type = {
            let mut registry = self.registry.write().await;
            let Some(device) = registry.devices.get_mut(device_id) else {
                return false;
            };
            device.connection_status = status;
            if status == DeviceConnectionStatus::Connected {
                device.last_seen = Utc::now();
            }
            device.device_type.clone()
        };

        let gauge = crate::metrics::CONNECTED_DEVICES.with_label_values(&[&device_type]);
        match status {
            DeviceConnectionStatus::Connected => gauge.inc(),
            _ => gauge.dec(),
        }

        if let Some(cb) = self.connection_event.read().await.as_ref() {
            cb(device_id, status);
        }
        true
    }

    pub async fn connect_device(&self, device_id: &str) -> bool {
        self.set_connection_status(device_id, DeviceConnectionStatus::Connected).await
    }

    pub async fn disconnect_device(&self, device_id: &str) -> bool {
        self.set_connection_status(device_id, DeviceConnectionStatus::Disconnected).await
    }

    pub async fn get_connected_devices(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.connection_status == DeviceConnectionStatus::Connected)
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub async fn get_disconnected_devices(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.connection_status != DeviceConnectionStatus::Connected)
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub async fn get_device_property(&self, device_id: &str, property: &str) -> Option<String> {
        self.registry.read().await.devices.get(device_id)?.properties.get(property).cloned()
    }

    pub async fn set_device_property(&self, device_id: &str, property: &str, value: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(device) = registry.devices.get_mut(device_id) else {
            return false;
        };
        device.properties.insert(property.to_string(), value.to_string());
        true
    }

    pub async fn update_bulk_properties(&self, device_ids: &[String], properties: &HashMap<String, String>) -> bool {
        let mut registry = self.registry.write().await;
        let mut all_ok = true;
        for device_id in device_ids {
            match registry.devices.get_mut(device_id) {
                Some(device) => {
                    for (k, v) in properties {
                        device.properties.insert(k.clone(), v.clone());
                    }
                }
                None => all_ok = false,
            }
        }
        all_ok
    }

    fn generate_command_id() -> String {
        let suffix: u32 = rand::thread_rng().gen();
        format!("cmd_{:08x}", suffix)
    }

    /// Assigns a fresh id, places it pending, and schedules async execution
    /// on the registered collaborator (spec.md §4.8: "schedules async
    /// execution", §5: "command execution (async; dispatched to a
    /// worker)"). Returns the `commandId` immediately; the result lands in
    /// `get_command_result` once the spawned worker finishes. A collaborator
    /// call that outruns `DeviceCommand.timeout` is cancelled and recorded
    /// as `success=false, errorMessage="timeout"`.
    pub async fn execute_command(&self, device_id: &str, command: &str, parameters: HashMap<String, String>) -> String {
        let cmd = DeviceCommand {
            command_id: Self::generate_command_id(),
            device_id: device_id.to_string(),
            command: command.to_string(),
            parameters,
            client_id: String::new(),
            timestamp: Utc::now(),
            timeout: Duration::from_secs(30),
            priority: 0,
        };
        self.dispatch_command(cmd).await
    }

    /// Shared by `execute_command` and tests that need a non-default
    /// `DeviceCommand.timeout`.
    async fn dispatch_command(&self, cmd: DeviceCommand) -> String {
        let command_id = cmd.command_id.clone();
        let device_id = cmd.device_id.clone();
        self.commands.write().await.pending.insert(command_id.clone(), cmd.clone());

        let collaborator = self.registry.read().await.collaborators.get(&device_id).cloned();
        let device_type = self
            .registry
            .read()
            .await
            .devices
            .get(&device_id)
            .map(|d| d.device_type.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let commands = self.commands.clone();
        let command_event = self.command_event.clone();
        let device_event = self.device_event.clone();
        let device_id = device_id.to_string();
        let worker_command_id = command_id.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let result = match collaborator {
                None => DeviceCommandResult {
                    command_id: worker_command_id.clone(),
                    device_id: device_id.clone(),
                    success: false,
                    result: String::new(),
                    error_message: Some("device not found".to_string()),
                    completed_at: Utc::now(),
                    execution_time: start.elapsed(),
                },
                Some(collaborator) => {
                    match tokio::time::timeout(cmd.timeout, collaborator.handle_device_command(&cmd.command, &cmd.parameters)).await {
                        Ok(Ok(value)) => DeviceCommandResult {
                            command_id: worker_command_id.clone(),
                            device_id: device_id.clone(),
                            success: true,
                            result: value.to_string(),
                            error_message: None,
                            completed_at: Utc::now(),
                            execution_time: start.elapsed(),
                        },
                        Ok(Err(e)) => DeviceCommandResult {
                            command_id: worker_command_id.clone(),
                            device_id: device_id.clone(),
                            success: false,
                            result: String::new(),
                            error_message: Some(e.to_string()),
                            completed_at: Utc::now(),
                            execution_time: start.elapsed(),
                        },
                        Err(_) => {
                            warn!(device_id = %device_id, command_id = %worker_command_id, "command timed out");
                            DeviceCommandResult {
                                command_id: worker_command_id.clone(),
                                device_id: device_id.clone(),
                                success: false,
                                result: String::new(),
                                error_message: Some("timeout".to_string()),
                                completed_at: Utc::now(),
                                execution_time: start.elapsed(),
                            }
                        }
                    }
                }
            };

            {
                let mut commands = commands.write().await;
                commands.pending.remove(&worker_command_id);
                commands.history.push(result.clone());
            }
            crate::metrics::COMMANDS_EXECUTED
                .with_label_values(&[&device_id, &cmd.command, if result.success { "true" } else { "false" }])
                .inc();
            crate::metrics::COMMAND_LATENCY
                .with_label_values(&[&device_type])
                .observe(result.execution_time.as_secs_f64());
            if let Some(cb) = command_event.read().await.as_ref() {
                cb(&result);
            }
            if let Some(cb) = device_event.read().await.as_ref() {
                cb(&device_id, "command_completed", &worker_command_id);
            }
        });

        command_id
    }

    pub async fn get_command_result(&self, command_id: &str) -> Option<DeviceCommandResult> {
        self.commands.read().await.history.iter().rev().find(|r| r.command_id == command_id).cloned()
    }

    /// Idempotent: removing an id that's already gone is not an error.
    pub async fn cancel_command(&self, command_id: &str) -> bool {
        self.commands.write().await.pending.remove(command_id).is_some()
    }

    pub async fn get_pending_commands(&self, device_id: Option<&str>) -> Vec<DeviceCommand> {
        self.commands
            .read()
            .await
            .pending
            .values()
            .filter(|c| device_id.map(|d| c.device_id == d).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn get_command_history(&self, device_id: Option<&str>, limit: usize) -> Vec<DeviceCommandResult> {
        self.commands
            .read()
            .await
            .history
            .iter()
            .rev()
            .filter(|r| device_id.map(|d| r.device_id == d).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the assigned `commandId`s, preserving input order.
    pub async fn execute_bulk_command(
        &self,
        device_ids: &[String],
        command: &str,
        parameters: HashMap<String, String>,
    ) -> Vec<String> {
        let mut ids = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            ids.push(self.execute_command(device_id, command, parameters.clone()).await);
        }
        ids
    }

    pub async fn create_device_group(&self, group: DeviceGroup) -> bool {
        let mut registry = self.registry.write().await;
        if registry.groups.contains_key(&group.group_id) {
            return false;
        }
        for device_id in &group.device_ids {
            registry.membership.entry(device_id.clone()).or_default().push(group.group_id.clone());
        }
        registry.groups.insert(group.group_id.clone(), group);
        true
    }

    pub async fn delete_device_group(&self, group_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(group) = registry.groups.remove(group_id) else {
            return false;
        };
        for device_id in &group.device_ids {
            if let Some(groups) = registry.membership.get_mut(device_id) {
                groups.retain(|g| g != group_id);
            }
        }
        true
    }

    pub async fn get_device_group(&self, group_id: &str) -> Option<DeviceGroup> {
        self.registry.read().await.groups.get(group_id).cloned()
    }

    pub async fn get_all_device_groups(&self) -> Vec<DeviceGroup> {
        self.registry.read().await.groups.values().cloned().collect()
    }

    pub async fn add_device_to_group(&self, group_id: &str, device_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        if !registry.groups.contains_key(group_id) {
            return false;
        }
        if let Some(group) = registry.groups.get_mut(group_id) {
            if !group.device_ids.iter().any(|id| id == device_id) {
                group.device_ids.push(device_id.to_string());
                group.modified_at = Utc::now();
            }
        }
        registry.membership.entry(device_id.to_string()).or_default().push(group_id.to_string());
        true
    }

    pub async fn remove_device_from_group(&self, group_id: &str, device_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(group) = registry.groups.get_mut(group_id) else {
            return false;
        };
        group.device_ids.retain(|id| id != device_id);
        group.modified_at = Utc::now();
        if let Some(groups) = registry.membership.get_mut(device_id) {
            groups.retain(|g| g != group_id);
        }
        true
    }

    pub async fn get_device_groups(&self, device_id: &str) -> Vec<String> {
        self.registry.read().await.membership.get(device_id).cloned().unwrap_or_default()
    }

    /// spec.md §4.8 health thresholds, run on the configured interval.
    pub async fn run_health_check_once(&self) {
        let now = Utc::now();
        let mut transitions = Vec::new();
        {
            let mut registry = self.registry.write().await;
            for device in registry.devices.values_mut() {
                let new_status = if device.connection_status != DeviceConnectionStatus::Connected {
                    DeviceHealthStatus::Offline
                } else {
                    let age = now.signed_duration_since(device.last_seen).num_seconds();
                    if age < 60 {
                        DeviceHealthStatus::Healthy
                    } else if age < 300 {
                        DeviceHealthStatus::Warning
                    } else {
                        DeviceHealthStatus::Critical
                    }
                };
                if new_status != device.health_status {
                    device.health_status = new_status;
                    transitions.push((device.device_id.clone(), new_status));
                }
            }
        }
        if let Some(cb) = self.health_event.read().await.as_ref() {
            for (device_id, status) in transitions {
                cb(&device_id, status, "");
            }
        }
    }

    pub async fn get_unhealthy_devices(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .devices
            .values()
            .filter(|d| matches!(d.health_status, DeviceHealthStatus::Warning | DeviceHealthStatus::Critical | DeviceHealthStatus::Offline))
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub async fn device_count(&self) -> usize {
        self.registry.read().await.devices.len()
    }

    /// Background loop: call from a `tokio::spawn`'d task; polls
    /// `shutdown` between iterations per spec.md §5.
    pub async fn health_monitor_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = self.config.read().await.health_check_interval;
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_health_check_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Service for DeviceService {
    fn name(&self) -> &str {
        "devices"
    }

    async fn initialize(&self) -> bool {
        true
    }

    async fn start(&self) -> bool {
        info!("device service running");
        true
    }

    async fn stop(&self) -> bool {
        true
    }

    async fn shutdown(&self) -> bool {
        true
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::collaborator::{CollaboratorError, DeviceCollaborator};
    use serde_json::Value;

    struct EchoCollaborator;

    #[async_trait]
    impl DeviceCollaborator for EchoCollaborator {
        async fn get_property(&self, _name: &str) -> Result<Value, CollaboratorError> {
            Ok(Value::Null)
        }
        async fn set_property(&self, _name: &str, _value: Value) -> Result<bool, CollaboratorError> {
            Ok(true)
        }
        async fn handle_device_command(
            &self,
            command: &str,
            _params: &HashMap<String, String>,
        ) -> Result<Value, CollaboratorError> {
            Ok(serde_json::json!({"echo": command}))
        }
    }

    #[tokio::test]
    async fn register_device_rejects_empty_id() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        assert!(!service.register_device(DeviceInfo::new("", "camera", "cam"), None).await);
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service.register_device(DeviceInfo::new("cam1", "camera", "one"), None).await;
        service.register_device(DeviceInfo::new("cam1", "camera", "two"), None).await;
        assert_eq!(service.get_device_info("cam1").await.unwrap().device_name, "two");
    }

    #[tokio::test]
    async fn unregister_removes_from_all_groups() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service.register_device(DeviceInfo::new("cam1", "camera", "one"), None).await;
        service
            .create_device_group(DeviceGroup {
                group_id: "g1".to_string(),
                group_name: "cams".to_string(),
                description: String::new(),
                device_ids: vec!["cam1".to_string()],
                group_properties: HashMap::new(),
                created_at: Utc::now(),
                modified_at: Utc::now(),
            })
            .await;
        service.unregister_device("cam1").await;
        assert!(service.get_device_group("g1").await.unwrap().device_ids.is_empty());
    }

    /// `execute_command` dispatches on a spawned worker and returns
    /// immediately, so tests poll for the result instead of expecting it
    /// synchronously.
    async fn wait_for_result(service: &DeviceService, command_id: &str) -> DeviceCommandResult {
        for _ in 0..200 {
            if let Some(result) = service.get_command_result(command_id).await {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("command {command_id} did not complete in time");
    }

    struct SlowCollaborator {
        delay: Duration,
    }

    #[async_trait]
    impl DeviceCollaborator for SlowCollaborator {
        async fn get_property(&self, _name: &str) -> Result<Value, CollaboratorError> {
            Ok(Value::Null)
        }
        async fn set_property(&self, _name: &str, _value: Value) -> Result<bool, CollaboratorError> {
            Ok(true)
        }
        async fn handle_device_command(
            &self,
            _command: &str,
            _params: &HashMap<String, String>,
        ) -> Result<Value, CollaboratorError> {
            tokio::time::sleep(self.delay).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn command_to_unknown_device_fails_explicitly() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        let id = service.execute_command("ghost", "expose", HashMap::new()).await;
        let result = wait_for_result(&service, &id).await;
        assert!(!result.success);
        assert_eq!(result.error_message.unwrap(), "device not found");
    }

    #[tokio::test]
    async fn command_dispatches_to_collaborator() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service
            .register_device(DeviceInfo::new("cam1", "camera", "one"), Some(Arc::new(EchoCollaborator)))
            .await;
        let id = service.execute_command("cam1", "expose", HashMap::new()).await;
        let result = wait_for_result(&service, &id).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn command_still_pending_immediately_after_dispatch() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service
            .register_device(
                DeviceInfo::new("cam1", "camera", "one"),
                Some(Arc::new(SlowCollaborator { delay: Duration::from_millis(50) })),
            )
            .await;
        let id = service.execute_command("cam1", "expose", HashMap::new()).await;
        assert!(service.get_pending_commands(Some("cam1")).await.iter().any(|c| c.command_id == id));
        let result = wait_for_result(&service, &id).await;
        assert!(result.success);
        assert!(service.get_pending_commands(Some("cam1")).await.is_empty());
    }

    #[tokio::test]
    async fn command_exceeding_its_timeout_fails_with_timeout_message() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service
            .register_device(
                DeviceInfo::new("cam1", "camera", "one"),
                Some(Arc::new(SlowCollaborator { delay: Duration::from_secs(60) })),
            )
            .await;
        let cmd = DeviceCommand {
            command_id: DeviceService::generate_command_id(),
            device_id: "cam1".to_string(),
            command: "expose".to_string(),
            parameters: HashMap::new(),
            client_id: String::new(),
            timestamp: Utc::now(),
            timeout: Duration::from_millis(20),
            priority: 0,
        };
        let id = service.dispatch_command(cmd).await;
        let result = wait_for_result(&service, &id).await;
        assert!(!result.success);
        assert_eq!(result.error_message.unwrap(), "timeout");
    }

    #[tokio::test]
    async fn bulk_command_preserves_order() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        for id in ["a", "b", "c"] {
            service.register_device(DeviceInfo::new(id, "camera", id), Some(Arc::new(EchoCollaborator))).await;
        }
        let ids = service.execute_bulk_command(&["a".into(), "b".into(), "c".into()], "ping", HashMap::new()).await;
        assert_eq!(ids.len(), 3);
        for id in &ids {
            wait_for_result(&service, id).await;
        }
    }

    #[tokio::test]
    async fn health_check_marks_stale_devices() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        let mut info = DeviceInfo::new("cam1", "camera", "one");
        info.connection_status = DeviceConnectionStatus::Connected;
        info.last_seen = Utc::now() - chrono::Duration::seconds(400);
        service.register_device(info, None).await;
        service.run_health_check_once().await;
        assert_eq!(service.get_device_info("cam1").await.unwrap().health_status, DeviceHealthStatus::Critical);
    }

    #[tokio::test]
    async fn disconnected_device_is_offline_regardless_of_last_seen() {
        let service = DeviceService::new(DeviceServiceConfig::default());
        service.register_device(DeviceInfo::new("cam1", "camera", "one"), None).await;
        service.run_health_check_once().await;
        assert_eq!(service.get_device_info("cam1").await.unwrap().health_status, DeviceHealthStatus::Offline);
    }
}
