//! Error types for the drpc runtime.
//!
//! One enum covers the whole request lifecycle. Errors raised by a remote
//! service implementation travel back inside a response as an [`RpcFault`]
//! and surface to the caller as [`RpcError::InvocationFailure`].
//!
//! [`RpcFault`]: crate::protocol::RpcFault

use std::time::Duration;
use thiserror::Error;

/// Main error type for drpc.
#[derive(Debug, Error)]
pub enum RpcError {
    // Wire errors
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("JSON error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Routing and transport errors
    #[error("No available connection for service {service}")]
    NoAvailableConnection { service: String },

    #[error("Request {request_id} timed out after {timeout:?}")]
    RequestTimeout {
        request_id: String,
        timeout: Duration,
    },

    #[error("Connection to {address} is closed")]
    ConnectionClosed { address: String },

    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Service binding errors
    #[error("{implementation} must implement exactly one service interface, found {found}")]
    AmbiguousServiceInterface { implementation: String, found: usize },

    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    #[error("Method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("Access denied to service {service}")]
    AccessDenied { service: String },

    // Remote failures
    #[error("Remote invocation failed ({code}): {message}")]
    InvocationFailure { code: i32, message: String },

    // Collaborators
    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Application-level failure raised by a service implementation.
    #[error("{0}")]
    Service(String),
}

/// Result type alias for drpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        RpcError::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC style error code for fault responses.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes (-32000 to -32099):
    /// - -32000: Service implementation error
    /// - -32001: Service not found
    /// - -32002: Access denied
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RpcError::ProtocolViolation { .. } => -32700,
            RpcError::MethodNotFound { .. } => -32601,
            RpcError::Serialization { .. } => -32602,
            RpcError::Service(_) => -32000,
            RpcError::ServiceNotFound { .. } => -32001,
            RpcError::AccessDenied { .. } => -32002,
            RpcError::InvocationFailure { code, .. } => *code,
            _ => -32603,
        }
    }

    /// Check if the caller may reasonably retry the call.
    ///
    /// The runtime never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::NoAvailableConnection { .. }
                | RpcError::RequestTimeout { .. }
                | RpcError::ConnectionClosed { .. }
                | RpcError::Connect { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::NoAvailableConnection {
            service: "Greeter".into(),
        };
        assert_eq!(err.to_string(), "No available connection for service Greeter");

        let err = RpcError::AmbiguousServiceInterface {
            implementation: "EchoImpl".into(),
            found: 2,
        };
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            RpcError::MethodNotFound {
                service: "Greeter".into(),
                method: "nope".into(),
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(RpcError::Service("boom".into()).to_rpc_error_code(), -32000);
        assert_eq!(
            RpcError::InvocationFailure {
                code: -32042,
                message: "x".into(),
            }
            .to_rpc_error_code(),
            -32042
        );
        assert_eq!(
            RpcError::Registry {
                message: "down".into()
            }
            .to_rpc_error_code(),
            -32603
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RpcError::RequestTimeout {
            request_id: "a".into(),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!RpcError::AmbiguousServiceInterface {
            implementation: "x".into(),
            found: 0,
        }
        .is_retryable());
    }
}
