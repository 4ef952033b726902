//! Device collaborator boundary (spec.md §6): the interface beneath which
//! the core never reaches. Grounded on the teacher's `ProtocolAdapter`
//! trait shape (`adapters/mod.rs`) — repurposed from "talk to a field
//! protocol" to "talk to one concrete device implementation".

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("device not connected")]
    NotConnected,
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Implemented once per concrete device; the registry and command
/// dispatcher hold these behind a `dyn DeviceCollaborator`.
#[async_trait]
pub trait DeviceCollaborator: Send + Sync {
    async fn get_property(&self, name: &str) -> Result<Value, CollaboratorError>;
    async fn set_property(&self, name: &str, value: Value) -> Result<bool, CollaboratorError>;
    async fn handle_device_command(
        &self,
        command: &str,
        params: &std::collections::HashMap<String, String>,
    ) -> Result<Value, CollaboratorError>;
}
