//! Client error types.

use duplexmcp_protocol::Error as ProtocolError;
use duplexmcp_transport::TransportError;

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client-side errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Protocol-level failure, including errors returned by the server.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An operation was attempted before `initialize` completed.
    #[error("client not initialized")]
    NotInitialized,

    /// `initialize` was called twice.
    #[error("client already initialized")]
    AlreadyInitialized,

    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ClientError {
    /// True when the session expired server-side and the handshake must be
    /// restarted.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::SessionExpired)
                | Self::Transport(TransportError::SessionExpired)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::from(e))
    }
}
