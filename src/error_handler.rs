//! Unified error handler (C5): classifies, correlates, retries, and drives
//! per-connection circuit breakers.
//!
//! Grounded on `original_source/.../unified_websocket_error_handler.h`
//! (`EnhancedWebSocketError`, `UnifiedWebSocketErrorHandler`,
//! `UnifiedErrorStatistics`): state is split into one mutex per concern
//! (`connections`/`correlation`/`statistics`/per-connection retry policy),
//! never held across a callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Timeout,
    Authentication,
    Message,
    Resource,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    Retry,
    Reconnect,
    Reset,
    Escalate,
    Terminate,
}

/// Connection-scoped error (spec.md §3 `WebSocketError`/`EnhancedError`).
#[derive(Debug, Clone)]
pub struct EnhancedError {
    pub error_id: String,
    pub error_code: String,
    pub message: String,
    pub details: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recommended_action: RecoveryAction,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub operation: String,
    pub connection_id: String,
    pub correlation_id: Option<String>,
    pub error_chain: Vec<String>,
    pub is_retryable: bool,
    pub suggested_retry_delay: Duration,
}

impl EnhancedError {
    pub fn new(
        connection_id: impl Into<String>,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            error_code: String::new(),
            message: message.into(),
            details: String::new(),
            category,
            severity,
            recommended_action: RecoveryAction::None,
            timestamp: Utc::now(),
            component: String::new(),
            operation: String::new(),
            connection_id: connection_id.into(),
            correlation_id: None,
            error_chain: Vec::new(),
            is_retryable: true,
            suggested_retry_delay: Duration::from_millis(1000),
        }
    }

    fn fingerprint(&self) -> String {
        format!(
            "{:?}:{:?}:{}:{}",
            self.category, self.severity, self.error_code, self.component
        )
    }

    fn triggers_circuit_breaker(&self) -> bool {
        matches!(
            (self.category, self.severity),
            (ErrorCategory::Connection, ErrorSeverity::High | ErrorSeverity::Critical)
                | (ErrorCategory::Network, ErrorSeverity::Medium | ErrorSeverity::High | ErrorSeverity::Critical)
                | (ErrorCategory::Timeout, ErrorSeverity::High | ErrorSeverity::Critical)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: String,
    pub component_name: String,
    pub endpoint: String,
    pub is_client: bool,
    pub connection_start_time: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
    pub reconnect_attempts: u32,
}

/// Retry policy: global by default, overridable per connection
/// (spec.md §4.5 "per-connection override, else global").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnifiedErrorHandlerConfig {
    pub global_retry_policy: RetryPolicy,
    pub correlation_window: Duration,
    pub circuit_breaker_enabled: bool,
}

impl Default for UnifiedErrorHandlerConfig {
    fn default() -> Self {
        Self {
            global_retry_policy: RetryPolicy::default(),
            correlation_window: Duration::from_secs(5),
            circuit_breaker_enabled: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorHandlerStatistics {
    pub total_errors: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub timeout_errors: u64,
    pub message_errors: u64,
    pub authentication_errors: u64,
    pub network_errors: u64,
    pub unknown_errors: u64,
    pub retries_attempted: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub circuit_breaker_trips: u64,
    pub errors_by_connection: HashMap<String, u64>,
    pub errors_by_component: HashMap<String, u64>,
}

struct Correlated {
    errors: Vec<EnhancedError>,
    inserted_at: DateTime<Utc>,
}

type RecoveryStrategyCallback = Box<dyn Fn(&EnhancedError) -> RecoveryAction + Send + Sync>;
type ConnectionRecoveryCallback = Box<dyn Fn(&str, RecoveryAction) -> bool + Send + Sync>;
type ErrorEventCallback = Box<dyn Fn(&EnhancedError, RecoveryAction, bool) + Send + Sync>;

/// Process-wide error handler, one instance shared across protocol servers.
pub struct UnifiedErrorHandler {
    connections: Mutex<HashMap<String, ConnectionContext>>,
    circuit_breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    correlation: Mutex<HashMap<String, Correlated>>,
    correlation_window: Duration,
    statistics: Mutex<ErrorHandlerStatistics>,
    global_retry_policy: RetryPolicy,
    connection_retry_policies: Mutex<HashMap<String, RetryPolicy>>,
    circuit_breaker_enabled: bool,
    recovery_strategy: Mutex<Option<RecoveryStrategyCallback>>,
    connection_recovery: Mutex<Option<ConnectionRecoveryCallback>>,
    error_event: Mutex<Option<ErrorEventCallback>>,
}

impl Default for UnifiedErrorHandler {
    fn default() -> Self {
        Self::new(UnifiedErrorHandlerConfig::default())
    }
}

impl UnifiedErrorHandler {
    pub fn new(config: UnifiedErrorHandlerConfig) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            circuit_breakers: Mutex::new(HashMap::new()),
            correlation: Mutex::new(HashMap::new()),
            correlation_window: config.correlation_window,
            statistics: Mutex::new(ErrorHandlerStatistics::default()),
            global_retry_policy: config.global_retry_policy,
            connection_retry_policies: Mutex::new(HashMap::new()),
            circuit_breaker_enabled: config.circuit_breaker_enabled,
            recovery_strategy: Mutex::new(None),
            connection_recovery: Mutex::new(None),
            error_event: Mutex::new(None),
        }
    }

    /// Installs a per-connection retry policy that `retry_policy_for`
    /// prefers over `global_retry_policy` (spec.md §4.5).
    pub fn set_retry_policy_for_connection(&self, connection_id: &str, policy: RetryPolicy) {
        self.connection_retry_policies
            .lock()
            .expect("poisoned")
            .insert(connection_id.to_string(), policy);
    }

    pub fn clear_retry_policy_for_connection(&self, connection_id: &str) {
        self.connection_retry_policies.lock().expect("poisoned").remove(connection_id);
    }

    pub fn set_recovery_strategy_callback(&self, cb: RecoveryStrategyCallback) {
        *self.recovery_strategy.lock().expect("poisoned") = Some(cb);
    }

    pub fn set_connection_recovery_callback(&self, cb: ConnectionRecoveryCallback) {
        *self.connection_recovery.lock().expect("poisoned") = Some(cb);
    }

    pub fn set_error_event_callback(&self, cb: ErrorEventCallback) {
        *self.error_event.lock().expect("poisoned") = Some(cb);
    }

    pub fn register_connection(&self, ctx: ConnectionContext) {
        if self.circuit_breaker_enabled {
            self.circuit_breakers
                .lock()
                .expect("poisoned")
                .insert(ctx.connection_id.clone(), Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())));
        }
        self.connections.lock().expect("poisoned").insert(ctx.connection_id.clone(), ctx);
    }

    pub fn unregister_connection(&self, connection_id: &str) {
        self.connections.lock().expect("poisoned").remove(connection_id);
        self.circuit_breakers.lock().expect("poisoned").remove(connection_id);
        self.connection_retry_policies.lock().expect("poisoned").remove(connection_id);
    }

    pub fn update_connection_activity(&self, connection_id: &str) {
        if let Some(ctx) = self.connections.lock().expect("poisoned").get_mut(connection_id) {
            ctx.last_activity_time = Utc::now();
        }
    }

    fn circuit_breaker_for(&self, connection_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.lock().expect("poisoned").get(connection_id).cloned()
    }

    pub fn get_circuit_breaker(&self, connection_id: &str) -> Arc<CircuitBreaker> {
        self.circuit_breakers
            .lock()
            .expect("poisoned")
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())))
            .clone()
    }

    /// spec.md §4.5 recovery action selection order.
    pub fn determine_recovery_action(&self, error: &EnhancedError) -> RecoveryAction {
        if let Some(cb) = self.recovery_strategy.lock().expect("poisoned").as_ref() {
            let action = cb(error);
            if action != RecoveryAction::None {
                return action;
            }
        }
        if error.recommended_action != RecoveryAction::None {
            return error.recommended_action;
        }
        match error.category {
            ErrorCategory::Connection => {
                if error.severity >= ErrorSeverity::Medium {
                    RecoveryAction::Reconnect
                } else {
                    RecoveryAction::Retry
                }
            }
            ErrorCategory::Timeout => RecoveryAction::Retry,
            ErrorCategory::Message => RecoveryAction::None,
            ErrorCategory::Network => RecoveryAction::Reconnect,
            ErrorCategory::Authentication => RecoveryAction::Terminate,
            ErrorCategory::Protocol => {
                if error.severity >= ErrorSeverity::High {
                    RecoveryAction::Reconnect
                } else {
                    RecoveryAction::Reset
                }
            }
            _ => RecoveryAction::Retry,
        }
    }

    fn retry_policy_for(&self, connection_id: &str) -> RetryPolicy {
        self.connection_retry_policies
            .lock()
            .expect("poisoned")
            .get(connection_id)
            .copied()
            .unwrap_or(self.global_retry_policy)
    }

    /// `shouldRetry(err, n)` per spec.md §4.5.
    pub fn should_retry(&self, error: &EnhancedError, attempt: u32, connection_id: &str) -> bool {
        let policy = self.retry_policy_for(connection_id);
        attempt < policy.max_attempts
            && error.is_retryable
            && error.category != ErrorCategory::Authentication
            && error.severity != ErrorSeverity::Critical
    }

    /// `retryDelay(err, n)` with uniform jitter in [0.75, 1.25].
    pub fn retry_delay(&self, attempt: u32, connection_id: &str) -> Duration {
        let policy = self.retry_policy_for(connection_id);
        let base = if policy.exponential_backoff {
            let scaled = policy.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
            Duration::from_millis(scaled.min(policy.max_delay.as_millis() as u64))
        } else {
            policy.base_delay
        };
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    }

    /// Opportunistic sweep of correlation entries older than the window.
    fn cleanup_old_correlations(&self) {
        let window = self.correlation_window;
        let now = Utc::now();
        self.correlation.lock().expect("poisoned").retain(|_, entry| {
            now.signed_duration_since(entry.inserted_at).to_std().unwrap_or(Duration::ZERO) < window
        });
    }

    pub fn correlate_error(&self, correlation_id: &str, error: EnhancedError) {
        self.cleanup_old_correlations();
        let mut correlation = self.correlation.lock().expect("poisoned");
        correlation
            .entry(correlation_id.to_string())
            .or_insert_with(|| Correlated {
                errors: Vec::new(),
                inserted_at: Utc::now(),
            })
            .errors
            .push(error);
    }

    pub fn get_correlated_errors(&self, correlation_id: &str) -> Vec<EnhancedError> {
        self.correlation
            .lock()
            .expect("poisoned")
            .get(correlation_id)
            .map(|c| c.errors.clone())
            .unwrap_or_default()
    }

    fn update_statistics(&self, error: &EnhancedError, recovery_successful: Option<bool>) {
        let mut stats = self.statistics.lock().expect("poisoned");
        stats.total_errors += 1;
        match error.category {
            ErrorCategory::Connection => stats.connection_errors += 1,
            ErrorCategory::Protocol => stats.protocol_errors += 1,
            ErrorCategory::Timeout => stats.timeout_errors += 1,
            ErrorCategory::Message => stats.message_errors += 1,
            ErrorCategory::Authentication => stats.authentication_errors += 1,
            ErrorCategory::Network => stats.network_errors += 1,
            ErrorCategory::Resource | ErrorCategory::Unknown => stats.unknown_errors += 1,
        }
        *stats.errors_by_connection.entry(error.connection_id.clone()).or_insert(0) += 1;
        *stats.errors_by_component.entry(error.component.clone()).or_insert(0) += 1;
        if error.triggers_circuit_breaker() {
            stats.circuit_breaker_trips += 1;
        }
        match recovery_successful {
            Some(true) => stats.successful_recoveries += 1,
            Some(false) => stats.failed_recoveries += 1,
            None => {}
        }
    }

    pub fn statistics(&self) -> ErrorHandlerStatistics {
        self.statistics.lock().expect("poisoned").clone()
    }

    pub fn reset_statistics(&self) {
        *self.statistics.lock().expect("poisoned") = ErrorHandlerStatistics::default();
    }

    /// `handleError` (spec.md §4.5): normalize, consult the breaker,
    /// determine and execute the recovery action, update statistics.
    pub fn handle_error(&self, error: EnhancedError) -> RecoveryAction {
        let breaker = self.circuit_breaker_for(&error.connection_id);
        let breaker_open = breaker.as_ref().map(|b| !b.allow_request()).unwrap_or(false);

        let action = if breaker_open {
            RecoveryAction::None
        } else {
            self.determine_recovery_action(&error)
        };

        let recovered = if !breaker_open {
            let ok = self
                .connection_recovery
                .lock()
                .expect("poisoned")
                .as_ref()
                .map(|cb| cb(&error.connection_id, action))
                .unwrap_or(true);
            if let Some(b) = &breaker {
                if ok {
                    b.record_success();
                } else {
                    b.record_failure();
                    if b.state() == crate::circuit_breaker::CircuitState::Open {
                        crate::metrics::CIRCUIT_BREAKER_TRIPS.with_label_values(&[&error.connection_id]).inc();
                    }
                }
            }
            Some(ok)
        } else {
            None
        };

        crate::metrics::ERRORS_HANDLED
            .with_label_values(&[&format!("{:?}", error.category), &format!("{:?}", error.severity), &format!("{:?}", action)])
            .inc();

        self.update_statistics(&error, recovered);

        if let Some(correlation_id) = &error.correlation_id {
            self.correlate_error(correlation_id, error.clone());
        }

        if let Some(cb) = self.error_event.lock().expect("poisoned").as_ref() {
            cb(&error, action, recovered.unwrap_or(false));
        }

        if error.severity >= ErrorSeverity::High {
            warn!(connection_id = %error.connection_id, category = ?error.category, "error handled with action {:?}", action);
        } else {
            info!(connection_id = %error.connection_id, category = ?error.category, "error handled with action {:?}", action);
        }

        action
    }

    /// Aggregate by fingerprint `{category}:{severity}:{code}:{component}`
    /// and return the most frequent, most-recent-first on ties.
    pub fn top_error_patterns(&self, limit: usize) -> Vec<String> {
        let correlation = self.correlation.lock().expect("poisoned");
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in correlation.values() {
            for err in &entry.errors {
                *counts.entry(err.fingerprint()).or_insert(0) += 1;
            }
        }
        let mut patterns: Vec<(String, u64)> = counts.into_iter().collect();
        patterns.sort_by(|a, b| b.1.cmp(&a.1));
        patterns.into_iter().take(limit).map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(category: ErrorCategory, severity: ErrorSeverity) -> EnhancedError {
        EnhancedError::new("conn-1", category, severity, "boom")
    }

    #[test]
    fn recovery_action_defaults_by_category() {
        let handler = UnifiedErrorHandler::default();
        assert_eq!(
            handler.determine_recovery_action(&err(ErrorCategory::Authentication, ErrorSeverity::Low)),
            RecoveryAction::Terminate
        );
        assert_eq!(
            handler.determine_recovery_action(&err(ErrorCategory::Timeout, ErrorSeverity::Low)),
            RecoveryAction::Retry
        );
        assert_eq!(
            handler.determine_recovery_action(&err(ErrorCategory::Connection, ErrorSeverity::High)),
            RecoveryAction::Reconnect
        );
        assert_eq!(
            handler.determine_recovery_action(&err(ErrorCategory::Connection, ErrorSeverity::Low)),
            RecoveryAction::Retry
        );
    }

    #[test]
    fn should_retry_excludes_authentication_and_critical() {
        let handler = UnifiedErrorHandler::default();
        let mut e = err(ErrorCategory::Connection, ErrorSeverity::Medium);
        assert!(handler.should_retry(&e, 0, "conn-1"));
        e.category = ErrorCategory::Authentication;
        assert!(!handler.should_retry(&e, 0, "conn-1"));
        e.category = ErrorCategory::Connection;
        e.severity = ErrorSeverity::Critical;
        assert!(!handler.should_retry(&e, 0, "conn-1"));
    }

    #[test]
    fn correlation_groups_by_id_and_sweeps_old_entries() {
        let handler = UnifiedErrorHandler::default();
        handler.correlate_error("corr-1", err(ErrorCategory::Network, ErrorSeverity::Medium));
        handler.correlate_error("corr-1", err(ErrorCategory::Network, ErrorSeverity::Medium));
        assert_eq!(handler.get_correlated_errors("corr-1").len(), 2);
    }

    #[test]
    fn handle_error_updates_statistics() {
        let handler = UnifiedErrorHandler::default();
        handler.register_connection(ConnectionContext {
            connection_id: "conn-1".into(),
            component_name: "ws".into(),
            endpoint: "/ws".into(),
            is_client: false,
            connection_start_time: Utc::now(),
            last_activity_time: Utc::now(),
            reconnect_attempts: 0,
        });
        handler.handle_error(err(ErrorCategory::Protocol, ErrorSeverity::Medium));
        let stats = handler.statistics();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.protocol_errors, 1);
    }

    #[test]
    fn per_connection_retry_policy_overrides_global() {
        let handler = UnifiedErrorHandler::default();
        let s4_policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential_backoff: true,
        };
        handler.set_retry_policy_for_connection("conn-s4", s4_policy);

        let retryable = err(ErrorCategory::Connection, ErrorSeverity::Medium);
        assert!(handler.should_retry(&retryable, 3, "conn-s4"));
        assert!(!handler.should_retry(&retryable, 4, "conn-s4"));
        // A connection without an override still uses the global policy.
        assert!(!handler.should_retry(&retryable, RetryPolicy::default().max_attempts, "conn-other"));

        handler.clear_retry_policy_for_connection("conn-s4");
        assert!(!handler.should_retry(&retryable, 3, "conn-s4"));
    }

    #[test]
    fn top_error_patterns_ranks_by_frequency() {
        let handler = UnifiedErrorHandler::default();
        let mut a = err(ErrorCategory::Network, ErrorSeverity::High);
        a.error_code = "X".into();
        a.component = "c".into();
        handler.correlate_error("k1", a.clone());
        handler.correlate_error("k2", a.clone());
        let mut b = err(ErrorCategory::Message, ErrorSeverity::Low);
        b.error_code = "Y".into();
        handler.correlate_error("k3", b);
        let top = handler.top_error_patterns(10);
        assert_eq!(top[0], a.fingerprint());
    }
}
