//! Configuration management for the Hydrogen gateway.
//!
//! Loads configuration from environment variables with sensible defaults,
//! in the teacher's `Config::from_env()` style. Covers every key spec.md
//! §6 recognizes; unknown keys are preserved verbatim in `extra` and
//! forwarded to services that ask for them.

use anyhow::Result;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub mqtt_port: u16,
    pub zmq_address: String,
    pub enable_ssl: bool,
    pub ssl_cert_path: Option<String>,
    pub ssl_key_path: Option<String>,
    pub max_connections: u32,
    pub log_level: String,
    pub device_persistence_dir: Option<String>,
    pub auth_config_path: Option<String>,
    pub health_enable_metrics: bool,
    pub error_recovery_enabled: bool,
    pub token_expiration_secs: u64,
    pub session_timeout_secs: u64,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: u64,
    pub health_check_interval_secs: u64,
    pub metrics_port: u16,
    /// Recognized-but-unmodeled keys, forwarded verbatim (spec.md §6).
    pub extra: HashMap<String, String>,
}

const KNOWN_KEYS: &[&str] = &[
    "HOST",
    "HTTP_PORT",
    "GRPC_PORT",
    "MQTT_PORT",
    "ZMQ_ADDRESS",
    "ENABLE_SSL",
    "SSL_CERT_PATH",
    "SSL_KEY_PATH",
    "MAX_CONNECTIONS",
    "LOG_LEVEL",
    "DEVICE_PERSISTENCE_DIR",
    "AUTH_CONFIG_PATH",
    "HEALTH_ENABLE_METRICS",
    "ERROR_RECOVERY_ENABLED",
    "TOKEN_EXPIRATION",
    "SESSION_TIMEOUT",
    "MAX_FAILED_ATTEMPTS",
    "LOCKOUT_DURATION",
    "HEALTH_CHECK_INTERVAL",
    "METRICS_PORT",
];

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env("HTTP_PORT", 8000)?,
            grpc_port: parse_env("GRPC_PORT", 50051)?,
            mqtt_port: parse_env("MQTT_PORT", 1883)?,
            zmq_address: env::var("ZMQ_ADDRESS").unwrap_or_else(|_| "tcp://0.0.0.0:5555".to_string()),
            enable_ssl: parse_env("ENABLE_SSL", false)?,
            ssl_cert_path: env::var("SSL_CERT_PATH").ok(),
            ssl_key_path: env::var("SSL_KEY_PATH").ok(),
            max_connections: parse_env("MAX_CONNECTIONS", 1000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            device_persistence_dir: env::var("DEVICE_PERSISTENCE_DIR").ok(),
            auth_config_path: env::var("AUTH_CONFIG_PATH").ok(),
            health_enable_metrics: parse_env("HEALTH_ENABLE_METRICS", true)?,
            error_recovery_enabled: parse_env("ERROR_RECOVERY_ENABLED", true)?,
            token_expiration_secs: parse_env("TOKEN_EXPIRATION", 3600)?,
            session_timeout_secs: parse_env("SESSION_TIMEOUT", 1800)?,
            max_failed_attempts: parse_env("MAX_FAILED_ATTEMPTS", 5)?,
            lockout_duration_secs: parse_env("LOCKOUT_DURATION", 300)?,
            health_check_interval_secs: parse_env("HEALTH_CHECK_INTERVAL", 30)?,
            metrics_port: parse_env("METRICS_PORT", 9090)?,
            extra: unrecognized_env_vars(),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

/// Any `HYDROGEN_`-prefixed variable not in [`KNOWN_KEYS`] is preserved
/// verbatim per spec.md §6 ("Unknown keys are preserved verbatim and
/// forwarded to services").
fn unrecognized_env_vars() -> HashMap<String, String> {
    env::vars()
        .filter_map(|(k, v)| {
            let stripped = k.strip_prefix("HYDROGEN_")?;
            (!KNOWN_KEYS.contains(&stripped)).then(|| (stripped.to_lowercase(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_env() {
        // SAFETY: test runs single-threaded within this process' env mutation.
        for key in KNOWN_KEYS {
            env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.http_port, 8000);
        assert_eq!(config.token_expiration_secs, 3600);
        assert!(config.health_enable_metrics);
    }
}
