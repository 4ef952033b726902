//! Auth service (C7): users, passwords, sessions, tokens, API keys,
//! rate-limiting, lockout, RBAC.
//!
//! Grounded on `original_source/.../auth_service.h`'s `IAuthService`
//! surface, narrowed to the operations spec.md §4.7 calls out (MFA, OAuth2,
//! LDAP and certificate auth are part of the original's broader interface
//! but outside this spec's scope). State layout follows spec.md §5: one
//! mutex over all auth state, matching the teacher's single-`RwLock`-per-
//! subsystem convention.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::models::{
    role_permissions, ApiKey, AuthRequest, AuthResult, AuthToken, Permission, SessionInfo, UserInfo, UserRole,
};
use crate::registry::Service;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username '{0}' already exists")]
    UsernameTaken(String),
    #[error("user '{0}' not found")]
    UserNotFound(String),
    #[error("password does not satisfy policy")]
    WeakPassword,
}

const DEFAULT_TOKEN_EXPIRATION_SECS: i64 = 3600;
const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 1800;
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_DURATION_SECS: i64 = 300;
const AUDIT_LOG_CAPACITY: usize = 1000;
const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    pub token_expiration_secs: i64,
    pub session_timeout_secs: i64,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: i64,
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        Self {
            token_expiration_secs: DEFAULT_TOKEN_EXPIRATION_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
        }
    }
}

struct RateLimitEntry {
    count: u32,
    window_start: DateTime<Utc>,
}

struct State {
    users_by_id: HashMap<String, UserInfo>,
    username_index: HashMap<String, String>,
    password_hashes: HashMap<String, String>,
    sessions: HashMap<String, SessionInfo>,
    tokens: HashMap<String, AuthToken>,
    api_keys: HashMap<String, ApiKey>,
    rate_limits: HashMap<String, RateLimitEntry>,
    audit_log: Vec<String>,
}

/// Process-wide authentication and session authority.
pub struct AuthService {
    config: RwLock<AuthServiceConfig>,
    state: RwLock<State>,
}

impl AuthService {
    pub fn new(config: AuthServiceConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(State {
                users_by_id: HashMap::new(),
                username_index: HashMap::new(),
                password_hashes: HashMap::new(),
                sessions: HashMap::new(),
                tokens: HashMap::new(),
                api_keys: HashMap::new(),
                rate_limits: HashMap::new(),
                audit_log: Vec::new(),
            }),
        }
    }

    /// spec.md §4.7 "Default admin": create `admin`/`admin123!` with
    /// SUPER_ADMIN if no users exist yet. Callers MUST force rotation on
    /// first use; this core only enforces the password policy, not rotation.
    pub async fn bootstrap_default_admin(&self) {
        let has_users = { !self.state.read().await.users_by_id.is_empty() };
        if has_users {
            return;
        }
        let _ = self
            .create_user(
                UserInfo {
                    user_id: Uuid::new_v4().to_string(),
                    username: "admin".to_string(),
                    email: "admin@localhost".to_string(),
                    full_name: "Default Administrator".to_string(),
                    role: UserRole::SuperAdmin,
                    permissions: role_permissions(UserRole::SuperAdmin),
                    is_active: true,
                    is_locked: false,
                    created_at: Utc::now(),
                    last_login_at: None,
                    password_changed_at: Utc::now(),
                    failed_login_attempts: 0,
                    locked_until: None,
                },
                "admin123!",
            )
            .await;
        warn!("bootstrapped default admin user; rotate its password before production use");
    }

    fn hash_password(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// spec.md §4.7 password policy: length >= 8, one each of upper,
    /// lower, digit, punctuation.
    pub fn validate_password(password: &str) -> bool {
        password.len() >= 8
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_digit())
            && password.chars().any(|c| c.is_ascii_punctuation())
    }

    pub async fn create_user(&self, user: UserInfo, password: &str) -> Result<(), AuthError> {
        if !Self::validate_password(password) {
            return Err(AuthError::WeakPassword);
        }
        let mut state = self.state.write().await;
        if state.username_index.contains_key(&user.username) {
            return Err(AuthError::UsernameTaken(user.username));
        }
        state.username_index.insert(user.username.clone(), user.user_id.clone());
        state.password_hashes.insert(user.user_id.clone(), Self::hash_password(password));
        state.users_by_id.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn log_audit(&self, user_id: &str, event: &str, details: &str) {
        let mut state = self.state.write().await;
        let entry = format!("{}|{}|{}|{}", Utc::now().to_rfc3339(), user_id, event, details);
        if state.audit_log.len() >= AUDIT_LOG_CAPACITY {
            state.audit_log.remove(0);
        }
        state.audit_log.push(entry);
    }

    pub async fn get_auth_audit_log(&self, user_id_filter: Option<&str>, limit: usize) -> Vec<String> {
        let state = self.state.read().await;
        state
            .audit_log
            .iter()
            .rev()
            .filter(|entry| user_id_filter.map(|f| entry.contains(f)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn is_rate_limited(&self, identifier: &str) -> bool {
        let state = self.state.read().await;
        state
            .rate_limits
            .get(identifier)
            .map(|entry| {
                Utc::now().signed_duration_since(entry.window_start) < ChronoDuration::seconds(RATE_LIMIT_WINDOW_SECS)
                    && entry.count >= RATE_LIMIT_MAX_ATTEMPTS
            })
            .unwrap_or(false)
    }

    async fn record_auth_attempt(&self, identifier: &str) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let entry = state.rate_limits.entry(identifier.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });
        if now.signed_duration_since(entry.window_start) >= ChronoDuration::seconds(RATE_LIMIT_WINDOW_SECS) {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
    }

    /// `isUserLocked` — auto-clears once `now > lockedUntil`.
    pub async fn is_user_locked(&self, user_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(user) = state.users_by_id.get_mut(user_id) else {
            return false;
        };
        if let Some(until) = user.locked_until {
            if Utc::now() > until {
                user.is_locked = false;
                user.locked_until = None;
                user.failed_login_attempts = 0;
                return false;
            }
        }
        user.is_locked
    }

    fn generate_token_string() -> String {
        rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
    }

    /// spec.md §4.7 `authenticate`.
    pub async fn authenticate(&self, request: AuthRequest) -> AuthResult {
        let identifier = format!("{}@{}", request.username, request.remote_address);
        if self.is_rate_limited(&identifier).await {
            crate::metrics::AUTH_ATTEMPTS.with_label_values(&["rate_limited"]).inc();
            return AuthResult {
                success: false,
                error_message: Some("Rate limit exceeded".to_string()),
                token: None,
                session: None,
            };
        }
        self.record_auth_attempt(&identifier).await;

        let user_id = {
            let state = self.state.read().await;
            state.username_index.get(&request.username).cloned()
        };
        let Some(user_id) = user_id else {
            crate::metrics::AUTH_ATTEMPTS.with_label_values(&["invalid_credentials"]).inc();
            return AuthResult {
                success: false,
                error_message: Some("Invalid credentials".to_string()),
                token: None,
                session: None,
            };
        };

        if self.is_user_locked(&user_id).await {
            crate::metrics::AUTH_ATTEMPTS.with_label_values(&["locked"]).inc();
            return AuthResult {
                success: false,
                error_message: Some("Account locked".to_string()),
                token: None,
                session: None,
            };
        }

        let (is_active, password_ok) = {
            let state = self.state.read().await;
            let user = state.users_by_id.get(&user_id);
            let is_active = user.map(|u| u.is_active).unwrap_or(false);
            let hash = state.password_hashes.get(&user_id).cloned().unwrap_or_default();
            (is_active, hash == Self::hash_password(&request.password))
        };

        if !is_active {
            crate::metrics::AUTH_ATTEMPTS.with_label_values(&["disabled"]).inc();
            return AuthResult {
                success: false,
                error_message: Some("Account disabled".to_string()),
                token: None,
                session: None,
            };
        }

        if !password_ok {
            self.on_failed_login(&user_id).await;
            crate::metrics::AUTH_ATTEMPTS.with_label_values(&["invalid_credentials"]).inc();
            return AuthResult {
                success: false,
                error_message: Some("Invalid credentials".to_string()),
                token: None,
                session: None,
            };
        }

        self.on_successful_login(&user_id).await;
        let (role, permissions, username) = {
            let state = self.state.read().await;
            let user = state.users_by_id.get(&user_id).expect("user just looked up");
            (user.role, user.permissions.clone(), user.username.clone())
        };

        let token = self.issue_token(&user_id, &username, role, permissions).await;
        let session = self.create_session(&user_id, &username, &request.client_id, &request.remote_address).await;

        self.log_audit(&user_id, "login_success", &request.remote_address).await;
        crate::metrics::AUTH_ATTEMPTS.with_label_values(&["success"]).inc();

        AuthResult {
            success: true,
            error_message: None,
            token: Some(token),
            session: Some(session),
        }
    }

    async fn on_failed_login(&self, user_id: &str) {
        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;
        if let Some(user) = state.users_by_id.get_mut(user_id) {
            user.failed_login_attempts += 1;
            if user.failed_login_attempts >= config.max_failed_attempts {
                user.is_locked = true;
                user.locked_until = Some(Utc::now() + ChronoDuration::seconds(config.lockout_duration_secs));
            }
        }
        drop(state);
        self.log_audit(user_id, "login_failed", "").await;
    }

    async fn on_successful_login(&self, user_id: &str) {
        let mut state = self.state.write().await;
        if let Some(user) = state.users_by_id.get_mut(user_id) {
            user.failed_login_attempts = 0;
            user.last_login_at = Some(Utc::now());
        }
    }

    async fn issue_token(
        &self,
        user_id: &str,
        username: &str,
        role: UserRole,
        permissions: std::collections::HashSet<Permission>,
    ) -> AuthToken {
        let config = self.config.read().await.clone();
        let token = AuthToken {
            token: Self::generate_token_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            role,
            permissions,
            issued_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::seconds(config.token_expiration_secs),
        };
        self.state.write().await.tokens.insert(token.token.clone(), token.clone());
        token
    }

    /// Lazily evicts the token if expired.
    pub async fn validate_token(&self, token: &str) -> bool {
        let mut state = self.state.write().await;
        match state.tokens.get(token) {
            Some(t) if t.expires_at > Utc::now() => true,
            Some(_) => {
                state.tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub async fn parse_token(&self, token: &str) -> Option<AuthToken> {
        self.state.read().await.tokens.get(token).cloned()
    }

    pub async fn refresh_token(&self, token: &str) -> Option<AuthToken> {
        let old = self.state.write().await.tokens.remove(token)?;
        Some(self.issue_token(&old.user_id, &old.username, old.role, old.permissions).await)
    }

    pub async fn revoke_token(&self, token: &str) {
        self.state.write().await.tokens.remove(token);
    }

    async fn create_session(
        &self,
        user_id: &str,
        username: &str,
        client_id: &str,
        remote_address: &str,
    ) -> SessionInfo {
        let config = self.config.read().await.clone();
        let now = Utc::now();
        let session = SessionInfo {
            session_id: Self::generate_token_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            client_id: client_id.to_string(),
            remote_address: remote_address.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + ChronoDuration::seconds(config.session_timeout_secs),
            is_active: true,
        };
        self.state.write().await.sessions.insert(session.session_id.clone(), session.clone());
        session
    }

    pub async fn validate_session(&self, session_id: &str) -> bool {
        let state = self.state.read().await;
        state.sessions.get(session_id).map(|s| s.is_active && s.expires_at > Utc::now()).unwrap_or(false)
    }

    pub async fn update_session_activity(&self, session_id: &str) -> bool {
        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.last_activity = Utc::now();
            session.expires_at = Utc::now() + ChronoDuration::seconds(config.session_timeout_secs);
            true
        } else {
            false
        }
    }

    pub async fn terminate_session(&self, session_id: &str) {
        self.state.write().await.sessions.remove(session_id);
    }

    /// Background sweep, intended to run every 60s per spec.md §4.7.
    pub async fn sweep_expired_sessions(&self) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.sessions.retain(|_, s| s.expires_at > now);
    }

    pub async fn generate_api_key(&self, user_id: &str, description: &str) -> String {
        let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect();
        let key = format!("ak_{suffix}");
        self.state.write().await.api_keys.insert(
            key.clone(),
            ApiKey {
                key: key.clone(),
                user_id: user_id.to_string(),
                description: description.to_string(),
                created_at: Utc::now(),
            },
        );
        key
    }

    pub async fn validate_api_key(&self, api_key: &str) -> bool {
        self.state.read().await.api_keys.contains_key(api_key)
    }

    pub async fn revoke_api_key(&self, api_key: &str) {
        self.state.write().await.api_keys.remove(api_key);
    }

    pub async fn has_permission(&self, user_id: &str, permission: Permission) -> bool {
        self.state
            .read()
            .await
            .users_by_id
            .get(user_id)
            .map(|u| u.permissions.contains(&permission))
            .unwrap_or(false)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<UserInfo> {
        let state = self.state.read().await;
        let id = state.username_index.get(username)?;
        state.users_by_id.get(id).cloned()
    }
}

#[async_trait]
impl Service for AuthService {
    fn name(&self) -> &str {
        "auth"
    }

    async fn initialize(&self) -> bool {
        self.bootstrap_default_admin().await;
        true
    }

    async fn start(&self) -> bool {
        info!("auth service running");
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

pub fn shared(config: AuthServiceConfig) -> Arc<AuthService> {
    Arc::new(AuthService::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, password: &str) -> AuthRequest {
        AuthRequest {
            username: username.to_string(),
            password: password.to_string(),
            client_id: "client-1".to_string(),
            remote_address: "127.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn bootstrap_creates_default_admin_once() {
        let service = AuthService::new(AuthServiceConfig::default());
        service.bootstrap_default_admin().await;
        assert!(service.get_user_by_username("admin").await.is_some());
        let users_before = service.state.read().await.users_by_id.len();
        service.bootstrap_default_admin().await;
        assert_eq!(service.state.read().await.users_by_id.len(), users_before);
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_user_generically() {
        let service = AuthService::new(AuthServiceConfig::default());
        let result = service.authenticate(request("nobody", "whatever")).await;
        assert!(!result.success);
        assert_eq!(result.error_message.unwrap(), "Invalid credentials");
    }

    #[tokio::test]
    async fn authenticate_succeeds_with_correct_password() {
        let service = AuthService::new(AuthServiceConfig::default());
        service.bootstrap_default_admin().await;
        let result = service.authenticate(request("admin", "admin123!")).await;
        assert!(result.success);
        assert!(result.token.is_some());
        assert!(result.session.is_some());
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let service = AuthService::new(AuthServiceConfig {
            max_failed_attempts: 2,
            ..AuthServiceConfig::default()
        });
        service.bootstrap_default_admin().await;
        for _ in 0..2 {
            service.authenticate(request("admin", "wrong")).await;
        }
        let result = service.authenticate(request("admin", "admin123!")).await;
        assert!(!result.success);
        assert_eq!(result.error_message.unwrap(), "Account locked");
    }

    #[tokio::test]
    async fn weak_password_is_rejected_on_create() {
        let service = AuthService::new(AuthServiceConfig::default());
        let user = UserInfo {
            user_id: "u1".to_string(),
            username: "bob".to_string(),
            email: "bob@x.com".to_string(),
            full_name: "Bob".to_string(),
            role: UserRole::User,
            permissions: role_permissions(UserRole::User),
            is_active: true,
            is_locked: false,
            created_at: Utc::now(),
            last_login_at: None,
            password_changed_at: Utc::now(),
            failed_login_attempts: 0,
            locked_until: None,
        };
        assert!(service.create_user(user, "weak").await.is_err());
    }

    #[tokio::test]
    async fn token_validation_lazily_expires() {
        let service = AuthService::new(AuthServiceConfig {
            token_expiration_secs: -1,
            ..AuthServiceConfig::default()
        });
        service.bootstrap_default_admin().await;
        let result = service.authenticate(request("admin", "admin123!")).await;
        let token = result.token.unwrap().token;
        assert!(!service.validate_token(&token).await);
    }

    #[test]
    fn role_permissions_are_cumulative() {
        let guest = role_permissions(UserRole::Guest);
        let admin = role_permissions(UserRole::Admin);
        assert!(guest.is_subset(&admin));
        assert!(admin.contains(&Permission::ManageUsers));
        assert!(!admin.contains(&Permission::ManageSystem));
    }
}
