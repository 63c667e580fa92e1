//! The transport contract.

use std::time::Duration;

use async_trait::async_trait;

/// Default HTTP header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport-layer errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// The connection closed while in use.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be delivered.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be received.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The server no longer recognizes our session (HTTP 404); the caller
    /// discards the session id and restarts the handshake.
    #[error("session expired")]
    SessionExpired,

    /// A send did not complete within its timeout.
    #[error("send timed out")]
    Timeout,

    /// Transport misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for duplexmcp_protocol::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::SessionExpired => Self::SessionExpired,
            other => Self::SendFailure(other.to_string()),
        }
    }
}

/// Which binding a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Newline-delimited JSON over stdio
    Stdio,
    /// Streamable HTTP (single endpoint, optional SSE upgrade)
    StreamableHttp,
    /// Legacy HTTP+SSE (separate endpoints)
    HttpSse,
    /// WebSocket text frames
    WebSocket,
}

/// An inbound event surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One raw frame (undecoded JSON text)
    Frame(String),
    /// The peer closed the connection
    Closed {
        /// Close code, where the binding has one (WebSocket)
        code: Option<u16>,
        /// Close reason, where the binding has one
        reason: Option<String>,
    },
}

/// Client-side transport contract.
///
/// `send`/`recv` take `&self`: implementations use interior mutability so a
/// driver task can wait for inbound frames while another task sends.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which binding this is.
    fn kind(&self) -> TransportKind;

    /// Protocol versions this binding can carry.
    fn supported_protocol_versions(&self) -> &'static [&'static str];

    /// Establish the connection and start background I/O.
    async fn start(&mut self) -> TransportResult<()>;

    /// Deliver one frame to the peer.
    async fn send(&self, frame: String) -> TransportResult<()>;

    /// Deliver one frame to the peer, bounded by `timeout`.
    async fn send_timeout(&self, frame: String, timeout: Duration) -> TransportResult<()> {
        tokio::time::timeout(timeout, self.send(frame))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Wait for the next inbound event. `Ok(None)` means the transport has
    /// shut down cleanly.
    async fn recv(&self) -> TransportResult<Option<TransportEvent>>;

    /// Tear the connection down.
    async fn shutdown(&mut self) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expiry_maps_to_protocol_error() {
        let e: duplexmcp_protocol::Error = TransportError::SessionExpired.into();
        assert!(matches!(e, duplexmcp_protocol::Error::SessionExpired));

        let e: duplexmcp_protocol::Error = TransportError::SendFailed("pipe".into()).into();
        assert!(matches!(e, duplexmcp_protocol::Error::SendFailure(_)));
    }
}
