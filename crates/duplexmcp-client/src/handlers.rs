//! Callbacks for server-initiated traffic.

use async_trait::async_trait;

use duplexmcp_protocol::types::{CreateMessageParams, CreateMessageResult, LoggingMessageParams, ProgressParams};

/// Handles `sampling/createMessage` requests from the server.
///
/// When no handler is registered the client answers with error code `-1`
/// and the message `"No sampling callback registered"`.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    /// Produce a sampled message for the server.
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, String>;
}

/// Callback invoked for `notifications/progress` updates matching a
/// registered token.
pub type ProgressCallback = dyn Fn(ProgressParams) + Send + Sync;

/// Callback invoked for `notifications/message` log records.
pub type LogCallback = dyn Fn(LoggingMessageParams) + Send + Sync;
