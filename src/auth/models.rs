//! Auth value types, grounded on
//! `original_source/.../auth_service.h` (`UserInfo`, `AuthToken`,
//! `SessionInfo`, `UserRole`, `Permission`).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserRole {
    Guest = 0,
    User = 1,
    Operator = 2,
    Admin = 3,
    SuperAdmin = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    ReadDevices,
    WriteDevices,
    ControlDevices,
    ManageUsers,
    ManageSystem,
    ViewLogs,
    ManageConfigs,
    ExecuteCommands,
    BulkOperations,
    ManageGroups,
}

/// Fixed role→permission table, GUEST ⊂ USER ⊂ OPERATOR ⊂ ADMIN ⊂ SUPER_ADMIN.
pub fn role_permissions(role: UserRole) -> HashSet<Permission> {
    use Permission::*;
    let mut perms = HashSet::new();
    if role >= UserRole::Guest {
        perms.insert(ReadDevices);
    }
    if role >= UserRole::User {
        perms.insert(WriteDevices);
        perms.insert(ViewLogs);
    }
    if role >= UserRole::Operator {
        perms.insert(ControlDevices);
        perms.insert(ExecuteCommands);
        perms.insert(BulkOperations);
    }
    if role >= UserRole::Admin {
        perms.insert(ManageUsers);
        perms.insert(ManageConfigs);
        perms.insert(ManageGroups);
    }
    if role >= UserRole::SuperAdmin {
        perms.insert(ManageSystem);
    }
    perms
}

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub permissions: HashSet<Permission>,
    pub is_active: bool,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
    pub permissions: HashSet<Permission>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub username: String,
    pub client_id: String,
    pub remote_address: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub key: String,
    pub user_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub remote_address: String,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub token: Option<AuthToken>,
    pub session: Option<SessionInfo>,
}
