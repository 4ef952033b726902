pub mod collaborator;
pub mod models;
pub mod service;

pub use collaborator::{CollaboratorError, DeviceCollaborator};
pub use models::{
    DeviceCommand, DeviceCommandResult, DeviceConnectionStatus, DeviceGroup, DeviceHealthStatus, DeviceInfo,
};
pub use service::{DeviceService, DeviceServiceConfig};
