//! Device value types, grounded on
//! `original_source/.../device_service.h` (`DeviceInfo`, `DeviceCommand`,
//! `DeviceCommandResult`, `DeviceGroup`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Error = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceHealthStatus {
    Unknown = 0,
    Healthy = 1,
    Warning = 2,
    Critical = 3,
    Offline = 4,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: String,
    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub driver_version: String,
    pub capabilities: Vec<String>,
    pub properties: HashMap<String, String>,
    pub connection_status: DeviceConnectionStatus,
    pub health_status: DeviceHealthStatus,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub client_id: String,
    pub remote_address: String,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, device_type: impl Into<String>, device_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            device_name: device_name.into(),
            manufacturer: String::new(),
            model: String::new(),
            firmware_version: String::new(),
            driver_version: String::new(),
            capabilities: Vec::new(),
            properties: HashMap::new(),
            connection_status: DeviceConnectionStatus::Disconnected,
            health_status: DeviceHealthStatus::Unknown,
            last_seen: now,
            registered_at: now,
            client_id: String::new(),
            remote_address: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceCommand {
    pub command_id: String,
    pub device_id: String,
    pub command: String,
    pub parameters: HashMap<String, String>,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
    pub timeout: std::time::Duration,
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct DeviceCommandResult {
    pub command_id: String,
    pub device_id: String,
    pub success: bool,
    pub result: String,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub execution_time: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct DeviceGroup {
    pub group_id: String,
    pub group_name: String,
    pub description: String,
    pub device_ids: Vec<String>,
    pub group_properties: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}
