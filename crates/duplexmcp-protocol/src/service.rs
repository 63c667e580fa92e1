//! The service contract between transports and the protocol engine.
//!
//! Server-side transports (stdio, streamable HTTP, legacy SSE, WebSocket)
//! know framing only; everything protocol-shaped goes through an
//! [`McpService`]. The server crate implements this trait; transports hold
//! it as `Arc<dyn McpService>`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::jsonrpc::JsonRpcMessage;
use crate::types::Implementation;

/// Why a presented session id was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    /// The id is unknown or expired; HTTP transports answer 404 and the
    /// client restarts the handshake.
    #[error("unknown session")]
    Unknown,
    /// The connection was refused outright (e.g. authorization failure).
    #[error("session rejected: {0}")]
    Refused(String),
}

/// Protocol engine surface exposed to transports.
#[async_trait]
pub trait McpService: Send + Sync + 'static {
    /// Resolve the session an inbound connection or frame belongs to.
    ///
    /// `presented` is the session id the peer supplied (HTTP session header),
    /// or `None` for fresh connections; `transport_versions` is the protocol
    /// version set the calling transport supports, which bounds negotiation.
    /// A `None` presentation creates a new session.
    async fn resolve_session(
        &self,
        presented: Option<&str>,
        transport_versions: &'static [&'static str],
    ) -> Result<String, SessionRejection>;

    /// Handle one decoded message within a session.
    ///
    /// Requests produce `Some(response)`; notifications and responses
    /// produce `None`.
    async fn handle_message(
        &self,
        session_id: &str,
        message: JsonRpcMessage,
    ) -> Option<JsonRpcMessage>;

    /// Register the channel server-initiated frames for `session_id` are
    /// written to. A later registration replaces the earlier one.
    fn attach_outbound(&self, session_id: &str, sender: mpsc::UnboundedSender<JsonRpcMessage>);

    /// Drop the outbound channel for `session_id`.
    fn detach_outbound(&self, session_id: &str);

    /// Whether this session currently has an outbound channel attached.
    fn has_outbound(&self, session_id: &str) -> bool;

    /// Terminate a session. Returns `false` when the id is unknown.
    async fn terminate_session(&self, session_id: &str) -> bool;

    /// Server identity, for logs and transport banners.
    fn server_info(&self) -> Implementation;
}
