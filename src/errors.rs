//! Top-level error type for gateway startup and lifecycle glue.
//!
//! Component-level errors live next to the component that raises them
//! (`registry::RegistryError`, `auth::AuthError`,
//! `device::CollaboratorError`); this one wraps failures that only make
//! sense at the `main.rs` orchestration level, where `anyhow` otherwise
//! takes over.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("service registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("protocol server '{0}' failed to start")]
    ProtocolServerStartFailed(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
