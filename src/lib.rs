//! Library surface for the Hydrogen gateway, split out of the binary so
//! integration tests in `tests/` can drive the HTTP surface in-process
//! with `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod device;
pub mod error_handler;
pub mod error_mapper;
pub mod errors;
pub mod message;
pub mod metrics;
pub mod multi_server;
pub mod protocols;
pub mod registry;
pub mod transformer;
