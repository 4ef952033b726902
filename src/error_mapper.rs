//! Protocol error taxonomy and per-protocol wire mapping (C2).
//!
//! Grounded on `original_source/.../protocol_error_mapper.h`: a stateless
//! mapper holding per-protocol formatters plus a registry of exception-type
//! handlers, used to turn any internal failure into a `ProtocolError` and
//! then into the wire shape a given protocol expects.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::message::Message;

/// Internal error taxonomy (spec.md §7). Integer values are fixed and
/// tested — do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ProtocolErrorCode {
    Success = 0,
    UnknownError = 1000,
    InternalError = 1001,
    InvalidRequest = 1002,
    InvalidParameters = 1003,
    OperationFailed = 1004,

    ConnectionFailed = 2000,
    ConnectionLost = 2001,
    ConnectionTimeout = 2002,
    AuthenticationFailed = 2003,
    AuthorizationFailed = 2004,

    ProtocolError = 3000,
    UnsupportedOperation = 3001,
    MessageFormatError = 3002,
    ProtocolVersionMismatch = 3003,

    DeviceNotFound = 4000,
    DeviceBusy = 4001,
    DeviceError = 4002,
    DeviceDisconnected = 4003,
    DeviceTimeout = 4004,

    ResourceUnavailable = 5000,
    ResourceExhausted = 5001,
    QuotaExceeded = 5002,

    ValidationError = 6000,
    MissingRequiredField = 6001,
    InvalidFieldValue = 6002,
    FieldOutOfRange = 6003,
}

impl ProtocolErrorCode {
    pub fn name(self) -> &'static str {
        use ProtocolErrorCode::*;
        match self {
            Success => "SUCCESS",
            UnknownError => "UNKNOWN_ERROR",
            InternalError => "INTERNAL_ERROR",
            InvalidRequest => "INVALID_REQUEST",
            InvalidParameters => "INVALID_PARAMETERS",
            OperationFailed => "OPERATION_FAILED",
            ConnectionFailed => "CONNECTION_FAILED",
            ConnectionLost => "CONNECTION_LOST",
            ConnectionTimeout => "CONNECTION_TIMEOUT",
            AuthenticationFailed => "AUTHENTICATION_FAILED",
            AuthorizationFailed => "AUTHORIZATION_FAILED",
            ProtocolError => "PROTOCOL_ERROR",
            UnsupportedOperation => "UNSUPPORTED_OPERATION",
            MessageFormatError => "MESSAGE_FORMAT_ERROR",
            ProtocolVersionMismatch => "PROTOCOL_VERSION_MISMATCH",
            DeviceNotFound => "DEVICE_NOT_FOUND",
            DeviceBusy => "DEVICE_BUSY",
            DeviceError => "DEVICE_ERROR",
            DeviceDisconnected => "DEVICE_DISCONNECTED",
            DeviceTimeout => "DEVICE_TIMEOUT",
            ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            QuotaExceeded => "QUOTA_EXCEEDED",
            ValidationError => "VALIDATION_ERROR",
            MissingRequiredField => "MISSING_REQUIRED_FIELD",
            InvalidFieldValue => "INVALID_FIELD_VALUE",
            FieldOutOfRange => "FIELD_OUT_OF_RANGE",
        }
    }

    /// HTTP status mapping, spec.md §4.2 (subset is authoritative; total
    /// over the whole enum via the `else 500` default).
    pub fn to_http_status(self) -> u16 {
        use ProtocolErrorCode::*;
        match self {
            Success => 200,
            InvalidRequest | InvalidParameters | MessageFormatError => 400,
            AuthenticationFailed => 401,
            AuthorizationFailed => 403,
            DeviceNotFound => 404,
            UnsupportedOperation => 405,
            ConnectionTimeout | DeviceTimeout => 408,
            DeviceBusy => 409,
            ValidationError | MissingRequiredField | InvalidFieldValue | FieldOutOfRange => 422,
            QuotaExceeded => 429,
            InternalError | OperationFailed | DeviceError => 500,
            DeviceDisconnected | ConnectionFailed => 502,
            ResourceUnavailable | ResourceExhausted => 503,
            _ => 500,
        }
    }

    /// gRPC status code mapping, spec.md §4.2.
    pub fn to_grpc_status(self) -> i32 {
        use ProtocolErrorCode::*;
        match self {
            Success => 0,
            OperationFailed => 1,
            UnknownError => 2,
            InvalidRequest | InvalidParameters => 3,
            ConnectionTimeout | DeviceTimeout => 4,
            DeviceNotFound => 5,
            DeviceBusy => 6,
            AuthorizationFailed => 7,
            ResourceExhausted | QuotaExceeded => 8,
            ValidationError | MissingRequiredField => 9,
            FieldOutOfRange => 11,
            UnsupportedOperation => 12,
            InternalError | DeviceError => 13,
            ResourceUnavailable | DeviceDisconnected => 14,
            ConnectionLost => 15,
            AuthenticationFailed => 16,
            _ => 2,
        }
    }

    /// MQTT v5 reason-code mapping, spec.md §4.2.
    pub fn to_mqtt_reason_code(self) -> u8 {
        use ProtocolErrorCode::*;
        match self {
            Success => 0x00,
            ProtocolError | MessageFormatError => 0x81,
            ProtocolVersionMismatch => 0x84,
            AuthenticationFailed => 0x86,
            AuthorizationFailed => 0x87,
            ResourceUnavailable => 0x88,
            DeviceBusy => 0x89,
            QuotaExceeded => 0x97,
            InvalidParameters | ValidationError => 0x9C,
            UnsupportedOperation => 0x9E,
            ConnectionTimeout => 0xA0,
            _ => 0x80,
        }
    }

    /// spec.md §4.2 classification policy.
    pub fn is_recoverable(self) -> bool {
        use ProtocolErrorCode::*;
        matches!(
            self,
            ConnectionTimeout | DeviceTimeout | ConnectionLost | DeviceBusy | ResourceUnavailable
        )
    }

    pub fn requires_reconnection(self) -> bool {
        use ProtocolErrorCode::*;
        matches!(
            self,
            ConnectionFailed | ConnectionLost | DeviceDisconnected | ProtocolError
        )
    }

    pub fn should_retry(self) -> bool {
        use ProtocolErrorCode::*;
        matches!(self, ConnectionTimeout | DeviceTimeout | DeviceBusy | ResourceUnavailable)
    }
}

/// Internal error value (spec.md §3). Immutable after construction.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    pub code: ProtocolErrorCode,
    pub message: String,
    pub details: String,
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ProtocolError {
    pub fn new(
        code: ProtocolErrorCode,
        message: impl Into<String>,
        component: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: String::new(),
            component: component.into(),
            operation: operation.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code.name(),
            "message": self.message,
            "details": self.details,
            "component": self.component,
            "operation": self.operation,
            "metadata": self.metadata,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Target wire format for a formatted error (mirrors `MessageFormat` in the
/// original source — one entry per protocol this core fronts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFormat {
    Http,
    WebSocket,
    Grpc,
    Mqtt,
    Zmq,
}

type ExceptionHandler = Box<dyn Fn(&str) -> ProtocolError + Send + Sync>;

/// Stateless-once-constructed error mapper (C2).
pub struct ProtocolErrorMapper {
    exception_handlers: HashMap<String, ExceptionHandler>,
}

impl Default for ProtocolErrorMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolErrorMapper {
    pub fn new() -> Self {
        Self {
            exception_handlers: HashMap::new(),
        }
    }

    /// Register a handler keyed by a dynamic "exception type name" — in
    /// Rust this is typically the `Display` discriminant of a source error
    /// enum variant (e.g. `"sqlx::Error"` in the teacher, `"io::Error"`
    /// here).
    pub fn register_exception_handler(&mut self, type_name: impl Into<String>, handler: ExceptionHandler) {
        self.exception_handlers.insert(type_name.into(), handler);
    }

    /// Look up a handler by dynamic type name; on miss, produce a generic
    /// UNKNOWN_ERROR stamped with `component`/`operation`/`timestamp`.
    pub fn map_exception(&self, type_name: &str, message: &str, component: &str, operation: &str) -> ProtocolError {
        let mut err = match self.exception_handlers.get(type_name) {
            Some(handler) => handler(message),
            None => ProtocolError::new(ProtocolErrorCode::UnknownError, message, component, operation),
        };
        err.component = component.to_string();
        err.operation = operation.to_string();
        err.timestamp = Utc::now();
        err
    }

    /// Produce the wire-shape dictated by the target protocol.
    pub fn format_error_for_protocol(&self, error: &ProtocolError, format: MessageFormat) -> Value {
        match format {
            MessageFormat::Http => json!({
                "error": error.message,
                "status": error.code.to_http_status(),
                "timestamp": error.timestamp.timestamp(),
            }),
            MessageFormat::WebSocket => json!({
                "type": "error",
                "code": error.code.name(),
                "message": error.message,
                "timestamp": error.timestamp.timestamp(),
            }),
            MessageFormat::Grpc => json!({
                "code": error.code.to_grpc_status(),
                "message": error.message,
            }),
            MessageFormat::Mqtt => json!({
                "reasonCode": error.code.to_mqtt_reason_code(),
                "reasonString": error.message,
            }),
            MessageFormat::Zmq => json!({
                "error_code": error.code as i32,
                "error_message": error.message,
            }),
        }
    }

    /// Build an ERROR `Message` whose payload.details carries the full
    /// error context, per spec.md §4.1/§4.2.
    pub fn create_error_message(&self, error: &ProtocolError, original_message_id: Option<String>) -> Message {
        Message::from_protocol_error(error, original_message_id, None)
    }
}

/// Exception-to-error mapping utilities (spec.md §4.2 classification
/// policy), kept as free functions mirroring `ErrorMappingUtils` in
/// `original_source/.../protocol_error_mapper.h`.
pub struct ErrorMappingUtils;

impl ErrorMappingUtils {
    pub fn is_recoverable_error(code: ProtocolErrorCode) -> bool {
        code.is_recoverable()
    }

    pub fn requires_reconnection(code: ProtocolErrorCode) -> bool {
        code.requires_reconnection()
    }

    /// Open Question in spec.md §9: the source's `isRecoverableError` and
    /// `shouldRetry` diverged; the spec resolves this by making both
    /// default false, which `ProtocolErrorCode::should_retry` already does.
    pub fn should_retry(code: ProtocolErrorCode) -> bool {
        code.should_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping_is_total_and_matches_table() {
        assert_eq!(ProtocolErrorCode::Success.to_http_status(), 200);
        assert_eq!(ProtocolErrorCode::InvalidRequest.to_http_status(), 400);
        assert_eq!(ProtocolErrorCode::AuthenticationFailed.to_http_status(), 401);
        assert_eq!(ProtocolErrorCode::AuthorizationFailed.to_http_status(), 403);
        assert_eq!(ProtocolErrorCode::DeviceNotFound.to_http_status(), 404);
        assert_eq!(ProtocolErrorCode::UnsupportedOperation.to_http_status(), 405);
        assert_eq!(ProtocolErrorCode::DeviceTimeout.to_http_status(), 408);
        assert_eq!(ProtocolErrorCode::DeviceBusy.to_http_status(), 409);
        assert_eq!(ProtocolErrorCode::ValidationError.to_http_status(), 422);
        assert_eq!(ProtocolErrorCode::QuotaExceeded.to_http_status(), 429);
        assert_eq!(ProtocolErrorCode::InternalError.to_http_status(), 500);
        assert_eq!(ProtocolErrorCode::DeviceDisconnected.to_http_status(), 502);
        assert_eq!(ProtocolErrorCode::ResourceUnavailable.to_http_status(), 503);
        assert_eq!(ProtocolErrorCode::UnknownError.to_http_status(), 500);
    }

    #[test]
    fn grpc_mapping_matches_table() {
        assert_eq!(ProtocolErrorCode::Success.to_grpc_status(), 0);
        assert_eq!(ProtocolErrorCode::AuthenticationFailed.to_grpc_status(), 16);
        assert_eq!(ProtocolErrorCode::ConnectionLost.to_grpc_status(), 15);
        assert_eq!(ProtocolErrorCode::FieldOutOfRange.to_grpc_status(), 11);
        assert_eq!(ProtocolErrorCode::UnknownError.to_grpc_status(), 2);
    }

    #[test]
    fn mqtt_mapping_matches_table() {
        assert_eq!(ProtocolErrorCode::Success.to_mqtt_reason_code(), 0x00);
        assert_eq!(ProtocolErrorCode::AuthenticationFailed.to_mqtt_reason_code(), 0x86);
        assert_eq!(ProtocolErrorCode::ConnectionTimeout.to_mqtt_reason_code(), 0xA0);
        assert_eq!(ProtocolErrorCode::DeviceError.to_mqtt_reason_code(), 0x80);
    }

    #[test]
    fn classification_policy_defaults_false() {
        assert!(!ProtocolErrorCode::UnsupportedOperation.is_recoverable());
        assert!(ProtocolErrorCode::DeviceBusy.is_recoverable());
        assert!(!ProtocolErrorCode::ValidationError.should_retry());
        assert!(ProtocolErrorCode::DeviceTimeout.should_retry());
    }

    #[test]
    fn map_exception_falls_back_to_unknown_error() {
        let mapper = ProtocolErrorMapper::new();
        let err = mapper.map_exception("some::Unregistered", "boom", "auth", "login");
        assert_eq!(err.code, ProtocolErrorCode::UnknownError);
        assert_eq!(err.component, "auth");
        assert_eq!(err.operation, "login");
    }

    #[test]
    fn registered_handler_is_used() {
        let mut mapper = ProtocolErrorMapper::new();
        mapper.register_exception_handler(
            "io::Error",
            Box::new(|msg| ProtocolError::new(ProtocolErrorCode::ConnectionFailed, msg, "", "")),
        );
        let err = mapper.map_exception("io::Error", "refused", "net", "connect");
        assert_eq!(err.code, ProtocolErrorCode::ConnectionFailed);
    }
}
