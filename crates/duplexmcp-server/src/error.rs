//! Server error types.

use duplexmcp_protocol::Error as ProtocolError;

use crate::store::StoreError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Server-side errors.
///
/// Handler failures that should reach the wire as specific JSON-RPC errors
/// use the [`ServerError::Protocol`] variant; everything else degrades to
/// `internal_error` at the engine boundary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// A protocol-level error carrying its own JSON-RPC code.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handler failure without protocol meaning.
    #[error("handler error: {message}")]
    Handler {
        /// Error message
        message: String,
    },

    /// Component registration failure.
    #[error("registry error: {0}")]
    Registry(String),

    /// Session store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// A `resource_not_found` protocol error, used by resource handlers to
    /// drive template fallthrough.
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::ResourceNotFound { uri: uri.into() })
    }

    /// Collapse into the protocol error that goes on the wire.
    pub fn into_protocol(self) -> ProtocolError {
        match self {
            Self::Protocol(e) => e,
            other => ProtocolError::Internal(other.to_string()),
        }
    }
}
