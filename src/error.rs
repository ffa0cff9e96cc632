//! Error types for RPC client operations
//!
//! Two layers live here. [`RpcError`] is the public, serializable error
//! shape that crosses the API boundary: an open string code, a message and
//! optional details, matching what the host emits. [`ClientError`] is the
//! internal sum type the engines work with; every variant maps
//! deterministically onto a public error via [`ClientError::into_public`].
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc_client::{RpcError, codes};
//!
//! let error = RpcError::timeout("user.get", 5_000);
//! assert_eq!(error.code, codes::TIMEOUT);
//! ```

use crate::path::PathIssue;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::trace;

/// Well-known error codes.
///
/// The `code` field of [`RpcError`] is an open string because the host may
/// surface arbitrary codes; these constants cover the ones this crate
/// produces or treats specially.
pub mod codes {
    /// Input or path validation failed.
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    /// The call exceeded its effective timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// The call was cancelled through an abort signal.
    pub const CANCELLED: &str = "CANCELLED";
    /// The host rejected the request due to rate limiting.
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    /// A subscription exhausted its reconnect budget.
    pub const MAX_RECONNECTS_EXCEEDED: &str = "MAX_RECONNECTS_EXCEEDED";
    /// An unexpected internal error occurred.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    /// The error could not be classified.
    pub const UNKNOWN: &str = "UNKNOWN";
    /// The requested resource was not found.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// A middleware layer failed outside the normal error flow.
    pub const MIDDLEWARE_ERROR: &str = "MIDDLEWARE_ERROR";
}

/// RPC error with code and message.
///
/// This is the only error shape the public API surfaces. `code` is an open
/// string (e.g. `"NOT_FOUND"`, `"TIMEOUT"`) so host-defined codes pass
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Error code (e.g. "NOT_FOUND", "VALIDATION_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Optional cause string for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Add a cause string for debugging.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    // Common error constructors

    /// Create a VALIDATION_ERROR error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, message)
    }

    /// Create a TIMEOUT error carrying `{timeoutMs}` details.
    pub fn timeout(path: &str, timeout_ms: u64) -> Self {
        Self::new(
            codes::TIMEOUT,
            format!("Procedure '{}' timed out after {}ms", path, timeout_ms),
        )
        .with_details(json!({ "timeoutMs": timeout_ms }))
    }

    /// Create a CANCELLED error.
    pub fn cancelled(path: &str) -> Self {
        Self::new(codes::CANCELLED, format!("Procedure '{}' was cancelled", path))
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Create an UNKNOWN error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(codes::UNKNOWN, message)
    }

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(codes::NOT_FOUND, message)
    }

    /// Create a MIDDLEWARE_ERROR error carrying the failing layer's index.
    pub fn middleware(message: impl Into<String>, middleware_index: usize) -> Self {
        Self::new(codes::MIDDLEWARE_ERROR, message)
            .with_details(json!({ "middlewareIndex": middleware_index }))
    }

    /// Create a RATE_LIMITED error with the standard retry-after details.
    pub fn rate_limited(message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::new(codes::RATE_LIMITED, message).with_details(json!({
            "retry_after_ms": retry_after_ms,
            "retry_after_secs": retry_after_ms / 1000,
        }))
    }

    /// Create a MAX_RECONNECTS_EXCEEDED error for a subscription path.
    pub fn max_reconnects_exceeded(path: &str, attempts: u32, max_reconnects: u32) -> Self {
        Self::new(
            codes::MAX_RECONNECTS_EXCEEDED,
            format!(
                "Subscription '{}' gave up after {} reconnect attempts",
                path, attempts
            ),
        )
        .with_details(json!({
            "attempts": attempts,
            "maxReconnects": max_reconnects,
            "path": path,
        }))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

// =============================================================================
// Internal Error Model
// =============================================================================

/// Internal error sum type used by the call, batch and subscription engines.
///
/// Public APIs never leak this type; [`ClientError::into_public`] performs
/// the variant-to-code mapping before an error leaves the crate.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// An error with a host- or middleware-provided code.
    #[error(transparent)]
    Call(RpcError),

    /// The effective deadline for a unary call elapsed.
    #[error("procedure '{path}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Procedure path of the timed-out call
        path: String,
        /// Effective timeout in milliseconds
        timeout_ms: u64,
    },

    /// The call was aborted through an external signal.
    #[error("procedure '{path}' was cancelled")]
    Cancelled {
        /// Procedure path of the cancelled call
        path: String,
        /// Optional reason supplied by the signal
        reason: Option<String>,
    },

    /// The procedure path failed syntactic validation.
    #[error("invalid procedure path '{path}'")]
    Validation {
        /// The offending path
        path: String,
        /// Every violation found, never empty
        issues: Vec<PathIssue>,
    },

    /// The transport layer failed before the host produced a response.
    #[error("transport failure calling '{path}': {message}")]
    Network {
        /// Procedure path of the failed call
        path: String,
        /// Description of the transport failure
        message: String,
    },
}

impl ClientError {
    /// Map this internal error onto the public error shape.
    ///
    /// The mapping is deterministic: Validation becomes `VALIDATION_ERROR`
    /// with the issues in details, Timeout becomes `TIMEOUT` with
    /// `{timeoutMs}`, Cancelled becomes `CANCELLED`, Network becomes
    /// `INTERNAL_ERROR`, and Call passes its code through unchanged.
    pub fn into_public(self) -> RpcError {
        match self {
            Self::Call(err) => err,
            Self::Timeout { path, timeout_ms } => RpcError::timeout(&path, timeout_ms),
            Self::Cancelled { path, reason } => {
                let mut err = RpcError::cancelled(&path);
                if let Some(reason) = reason {
                    err = err.with_cause(reason);
                }
                err
            }
            Self::Validation { path, issues } => RpcError::validation(format!(
                "Invalid procedure path '{}': {}",
                path,
                issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ))
            .with_details(json!({ "path": path, "issues": issues })),
            Self::Network { path, message } => {
                RpcError::internal(format!("Transport failure calling '{}'", path))
                    .with_cause(message)
            }
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        Self::Call(err)
    }
}

// =============================================================================
// Error Normalization
// =============================================================================

/// Returns the error if the value matches the `{code, message}` shape.
fn from_error_shape(value: &serde_json::Value) -> Option<RpcError> {
    let obj = value.as_object()?;
    let code = obj.get("code")?.as_str()?;
    let message = obj.get("message")?.as_str()?;
    Some(RpcError {
        code: code.to_string(),
        message: message.to_string(),
        details: obj.get("details").cloned(),
        cause: obj.get("cause").and_then(|c| c.as_str()).map(String::from),
    })
}

/// Normalize an arbitrary transport rejection into an internal error.
///
/// Total over all inputs, tried in order: a structured rejection matching
/// the `{code, message}` shape passes through; a string payload is parsed
/// as JSON and matched against the same shape; anything else falls back to
/// an `UNKNOWN` error carrying the stringified value.
pub fn normalize_transport_error(path: &str, err: TransportError) -> ClientError {
    match err {
        TransportError::Rejected(value) => {
            if let Some(rpc) = from_error_shape(&value) {
                return ClientError::Call(rpc);
            }
            if let Some(rpc) = value
                .as_str()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
                .as_ref()
                .and_then(from_error_shape)
            {
                return ClientError::Call(rpc);
            }
            trace!(path = %path, "Unclassifiable transport rejection");
            ClientError::Call(RpcError::unknown(stringify_rejection(&value)))
        }
        TransportError::Message(message) => {
            if let Some(rpc) = serde_json::from_str::<serde_json::Value>(&message)
                .ok()
                .as_ref()
                .and_then(from_error_shape)
            {
                return ClientError::Call(rpc);
            }
            ClientError::Network { path: path.to_string(), message }
        }
    }
}

/// Render an unclassifiable rejection value as a message string.
fn stringify_rejection(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_error_display() {
        let err = RpcError::not_found("no such user");
        assert_eq!(err.to_string(), "[NOT_FOUND] no such user");
    }

    #[test]
    fn test_timeout_mapping_carries_timeout_ms() {
        let err = ClientError::Timeout {
            path: "slow".into(),
            timeout_ms: 50,
        }
        .into_public();
        assert_eq!(err.code, codes::TIMEOUT);
        assert_eq!(err.details.unwrap()["timeoutMs"], 50);
    }

    #[test]
    fn test_cancelled_mapping() {
        let err = ClientError::Cancelled {
            path: "x".into(),
            reason: Some("user navigated away".into()),
        }
        .into_public();
        assert_eq!(err.code, codes::CANCELLED);
        assert_eq!(err.cause.as_deref(), Some("user navigated away"));
    }

    #[test]
    fn test_network_maps_to_internal_error() {
        let err = ClientError::Network {
            path: "x".into(),
            message: "pipe closed".into(),
        }
        .into_public();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert_eq!(err.cause.as_deref(), Some("pipe closed"));
    }

    #[test]
    fn test_normalize_structured_rejection_passes_through() {
        let rejected = TransportError::Rejected(json!({
            "code": "FORBIDDEN",
            "message": "nope",
            "details": {"scope": "admin"},
        }));
        match normalize_transport_error("user.get", rejected) {
            ClientError::Call(err) => {
                assert_eq!(err.code, "FORBIDDEN");
                assert_eq!(err.message, "nope");
                assert_eq!(err.details.unwrap()["scope"], "admin");
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_json_string_rejection() {
        let rejected =
            TransportError::Message(r#"{"code":"RATE_LIMITED","message":"slow down"}"#.into());
        match normalize_transport_error("user.get", rejected) {
            ClientError::Call(err) => assert_eq!(err.code, "RATE_LIMITED"),
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_opaque_message_is_network_error() {
        let rejected = TransportError::Message("connection reset".into());
        match normalize_transport_error("user.get", rejected) {
            ClientError::Network { message, .. } => assert_eq!(message, "connection reset"),
            other => panic!("expected Network, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_unclassifiable_value_is_unknown() {
        let rejected = TransportError::Rejected(json!([1, 2, 3]));
        match normalize_transport_error("user.get", rejected) {
            ClientError::Call(err) => {
                assert_eq!(err.code, codes::UNKNOWN);
                assert_eq!(err.message, "[1,2,3]");
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limited_details_convention() {
        let err = RpcError::rate_limited("too many requests", 2500);
        let details = err.details.unwrap();
        assert_eq!(details["retry_after_ms"], 2500);
        assert_eq!(details["retry_after_secs"], 2);
    }

    #[test]
    fn test_error_serialization_skips_absent_fields() {
        let err = RpcError::not_found("gone");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("cause").is_none());
    }
}
