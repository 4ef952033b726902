//! Per-component circuit breaker (C4).
//!
//! Grounded on `original_source/.../unified_websocket_error_handler.h`'s
//! `WebSocketCircuitBreaker`, narrowed from connection-scoped bookkeeping
//! to the spec's protocol-agnostic breaker: CLOSED/OPEN/HALF_OPEN gated
//! purely on success/failure counts and a recovery timeout.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// HALF_OPEN admits exactly one trial request at a time; set by
    /// `allow_request`, cleared by the matching `record_success`/
    /// `record_failure`.
    half_open_trial_in_flight: bool,
}

/// Thread-safe circuit breaker guarding a single downstream dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Whether a call is allowed right now. OPEN transitions to HALF_OPEN
    /// on its own once `recovery_timeout` has elapsed. HALF_OPEN admits at
    /// most one trial request until it is resolved by `record_success` or
    /// `record_failure`.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.half_open_trial_in_flight {
                    false
                } else {
                    inner.half_open_trial_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of a call that `allow_request` admitted.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.half_open_trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
                inner.half_open_trial_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        inner.half_open_trial_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_millis(20),
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker();
        for _ in 0..3 {
            assert!(cb.allow_request());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_state_resets_failure_count() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_only_one_trial_request_at_a_time() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow_request());
        cb.record_success();
        assert!(cb.allow_request());
    }
}
