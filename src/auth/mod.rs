pub mod models;
pub mod service;

pub use models::{AuthRequest, AuthResult, AuthToken, Permission, SessionInfo, UserInfo, UserRole};
pub use service::{shared, AuthService, AuthServiceConfig};
