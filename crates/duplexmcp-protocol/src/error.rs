//! Protocol error taxonomy.
//!
//! Errors that cross the wire map to JSON-RPC numeric codes; local-only kinds
//! (timeouts, send failures, session expiry) never serialize into frames.

use serde_json::Value;
use std::time::Duration;

use crate::jsonrpc::JsonRpcError;

/// JSON-RPC and MCP domain error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// A requested resource was not found (drives template fallthrough).
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    /// The request was cancelled before a response was produced.
    pub const REQUEST_CANCELLED: i32 = -32001;
    /// A tool returned structured content that fails its output schema.
    pub const TOOL_OUTPUT_INVALID: i32 = -32000;
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-level errors.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid JSON on the wire (-32700).
    #[error("parse error: {0}")]
    Parse(String),

    /// Structurally invalid request, including methods issued before the
    /// initialization handshake completed (-32600).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method, or a method gated behind an undeclared capability
    /// (-32601).
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Parameters failed validation (-32602).
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Handler failure or other internal fault (-32603).
    #[error("internal error: {0}")]
    Internal(String),

    /// No static resource or template produced content for a URI (-32002).
    #[error("resource not found: {uri}")]
    ResourceNotFound {
        /// The URI that failed to resolve
        uri: String,
    },

    /// The request was cancelled locally or by the peer (-32001). Delivered
    /// to the local waiter only; cancellation travels as a notification, not
    /// a response.
    #[error("request cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason
        reason: String,
    },

    /// A tool's structured output failed its declared output schema
    /// (-32000).
    #[error("tool output does not match output schema")]
    ToolOutputInvalid {
        /// Path-qualified validation errors
        errors: Vec<SchemaViolation>,
    },

    /// An error frame received from the peer, preserved code and all.
    #[error("peer error {code}: {message}")]
    Peer {
        /// Error code from the peer
        code: i32,
        /// Error message from the peer
        message: String,
        /// Attached error data
        data: Option<Value>,
    },

    /// Local-only: no response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Local-only: the transport failed to deliver a frame.
    #[error("send failure: {0}")]
    SendFailure(String),

    /// Local-only: the server no longer recognizes our session (HTTP 404).
    /// The client restarts the handshake.
    #[error("session expired")]
    SessionExpired,

    /// Local-only: the transport was shut down with requests in flight.
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

/// One path-qualified schema validation error.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaViolation {
    /// Dotted path to the offending value (empty string for the root)
    pub path: String,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl Error {
    /// The JSON-RPC code for wire-visible kinds; `None` for local-only kinds.
    pub fn code(&self) -> Option<i32> {
        use error_codes::*;
        match self {
            Self::Parse(_) => Some(PARSE_ERROR),
            Self::InvalidRequest(_) => Some(INVALID_REQUEST),
            Self::MethodNotFound(_) => Some(METHOD_NOT_FOUND),
            Self::InvalidParams(_) => Some(INVALID_PARAMS),
            Self::Internal(_) => Some(INTERNAL_ERROR),
            Self::ResourceNotFound { .. } => Some(RESOURCE_NOT_FOUND),
            Self::Cancelled { .. } => Some(REQUEST_CANCELLED),
            Self::ToolOutputInvalid { .. } => Some(TOOL_OUTPUT_INVALID),
            Self::Peer { code, .. } => Some(*code),
            Self::Timeout(_)
            | Self::SendFailure(_)
            | Self::SessionExpired
            | Self::TransportClosed(_) => None,
        }
    }

    /// True when this error indicates cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Convert to a JSON-RPC error object for the wire.
    ///
    /// Local-only kinds degrade to `internal_error`; they are not expected to
    /// reach this path in practice.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            Self::InvalidParams(msg) => JsonRpcError::with_data(
                error_codes::INVALID_PARAMS,
                "Invalid params",
                serde_json::json!({ "message": msg }),
            ),
            Self::ToolOutputInvalid { errors } => JsonRpcError::with_data(
                error_codes::TOOL_OUTPUT_INVALID,
                "Tool output does not match output schema",
                serde_json::json!({ "errors": errors }),
            ),
            Self::Cancelled { reason } => JsonRpcError::with_data(
                error_codes::REQUEST_CANCELLED,
                "Request cancelled",
                serde_json::json!({ "reason": reason }),
            ),
            Self::Peer {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcError::new(
                other.code().unwrap_or(error_codes::INTERNAL_ERROR),
                other.to_string(),
            ),
        }
    }

    /// Reconstruct from a JSON-RPC error object received from the peer.
    pub fn from_json_rpc(err: JsonRpcError) -> Self {
        match err.code {
            error_codes::REQUEST_CANCELLED => {
                let reason = err
                    .data
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("cancelled")
                    .to_string();
                Self::Cancelled { reason }
            }
            _ => Self::Peer {
                code: err.code,
                message: err.message,
                data: err.data,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
