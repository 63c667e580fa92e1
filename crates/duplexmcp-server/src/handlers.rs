//! Handler traits for MCP components.
//!
//! Handlers receive a [`RequestContext`] - the opaque session-scoped frame -
//! carrying the session identity, the request id, and a progress hook.
//! Anything a handler raises is caught at the engine boundary and converted
//! to `internal_error`; a [`ServerError::Protocol`] result keeps its code.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use duplexmcp_protocol::jsonrpc::{JsonRpcMessage, JsonRpcNotification, RequestId};
use duplexmcp_protocol::methods;
use duplexmcp_protocol::types::{
    CallToolResult, CompleteParams, CompleteResult, GetPromptResult, ProgressParams,
    ReadResourceResult,
};

use crate::error::ServerResult;

/// Session-scoped context passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Session the request belongs to
    pub session_id: String,
    /// Id of the request being served, when there is one
    pub request_id: Option<RequestId>,
    /// Progress token the caller supplied in `_meta.progressToken`
    pub progress_token: Option<String>,
    outbound: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
}

impl RequestContext {
    pub(crate) fn new(
        session_id: impl Into<String>,
        request_id: Option<RequestId>,
        progress_token: Option<String>,
        outbound: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id,
            progress_token,
            outbound,
        }
    }

    /// Emit a `notifications/progress` update correlated with this request's
    /// progress token. A no-op when the caller supplied no token or the
    /// session has no outbound channel.
    pub fn send_progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        let (Some(token), Some(outbound)) = (&self.progress_token, &self.outbound) else {
            return;
        };
        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message,
        };
        match JsonRpcNotification::with_params(methods::NOTIFICATION_PROGRESS, params) {
            Ok(notification) => {
                let _ = outbound.send(notification.into());
            }
            Err(e) => warn!(error = %e, "failed to encode progress notification"),
        }
    }
}

/// Handles `tools/call` for one registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with validated, coerced arguments.
    async fn call(&self, arguments: Value, ctx: RequestContext) -> ServerResult<CallToolResult>;
}

/// Handles `prompts/get` for one registered prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Render the prompt with the supplied arguments.
    async fn get(
        &self,
        arguments: HashMap<String, String>,
        ctx: RequestContext,
    ) -> ServerResult<GetPromptResult>;
}

/// Handles `resources/read` for one static resource or template.
///
/// Template handlers receive the full URI and return
/// [`ServerError::resource_not_found`](crate::ServerError::resource_not_found)
/// to pass the URI to the next matching template.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource at `uri`.
    async fn read(&self, uri: &str, ctx: RequestContext) -> ServerResult<ReadResourceResult>;
}

/// Handles `completion/complete`.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Produce completion suggestions.
    async fn complete(
        &self,
        params: CompleteParams,
        ctx: RequestContext,
    ) -> ServerResult<CompleteResult>;
}

struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ServerResult<CallToolResult>> + Send,
{
    async fn call(&self, arguments: Value, ctx: RequestContext) -> ServerResult<CallToolResult> {
        (self.0)(arguments, ctx).await
    }
}

/// Wrap an async closure as a [`ToolHandler`].
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<CallToolResult>> + Send + 'static,
{
    Arc::new(FnTool(f))
}

struct FnPrompt<F>(F);

#[async_trait]
impl<F, Fut> PromptHandler for FnPrompt<F>
where
    F: Fn(HashMap<String, String>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ServerResult<GetPromptResult>> + Send,
{
    async fn get(
        &self,
        arguments: HashMap<String, String>,
        ctx: RequestContext,
    ) -> ServerResult<GetPromptResult> {
        (self.0)(arguments, ctx).await
    }
}

/// Wrap an async closure as a [`PromptHandler`].
pub fn prompt_fn<F, Fut>(f: F) -> Arc<dyn PromptHandler>
where
    F: Fn(HashMap<String, String>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<GetPromptResult>> + Send + 'static,
{
    Arc::new(FnPrompt(f))
}

struct FnResource<F>(F);

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn(String, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ServerResult<ReadResourceResult>> + Send,
{
    async fn read(&self, uri: &str, ctx: RequestContext) -> ServerResult<ReadResourceResult> {
        (self.0)(uri.to_string(), ctx).await
    }
}

/// Wrap an async closure as a [`ResourceHandler`].
pub fn resource_fn<F, Fut>(f: F) -> Arc<dyn ResourceHandler>
where
    F: Fn(String, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<ReadResourceResult>> + Send + 'static,
{
    Arc::new(FnResource(f))
}

struct FnCompletion<F>(F);

#[async_trait]
impl<F, Fut> CompletionHandler for FnCompletion<F>
where
    F: Fn(CompleteParams, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ServerResult<CompleteResult>> + Send,
{
    async fn complete(
        &self,
        params: CompleteParams,
        ctx: RequestContext,
    ) -> ServerResult<CompleteResult> {
        (self.0)(params, ctx).await
    }
}

/// Wrap an async closure as a [`CompletionHandler`].
pub fn completion_fn<F, Fut>(f: F) -> Arc<dyn CompletionHandler>
where
    F: Fn(CompleteParams, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<CompleteResult>> + Send + 'static,
{
    Arc::new(FnCompletion(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with_channel() -> (RequestContext, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new(
            "s1",
            Some(RequestId::Number(1)),
            Some("progress_ab".to_string()),
            Some(tx),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn closure_tool_handler() {
        let handler = tool_fn(|args, _ctx| async move {
            Ok(CallToolResult::text(format!("echo {}", args["word"])))
        });
        let (ctx, _rx) = ctx_with_channel();
        let result = handler.call(json!({"word": "hi"}), ctx).await.unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn progress_rides_the_outbound_channel() {
        let (ctx, mut rx) = ctx_with_channel();
        ctx.send_progress(0.5, Some(1.0), None);

        let JsonRpcMessage::Notification(n) = rx.try_recv().unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n.method, methods::NOTIFICATION_PROGRESS);
        let params = n.params.unwrap();
        assert_eq!(params["progressToken"], "progress_ab");
        assert_eq!(params["progress"], 0.5);
    }

    #[tokio::test]
    async fn progress_without_token_is_a_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new("s1", None, None, Some(tx));
        ctx.send_progress(0.1, None, None);
        assert!(rx.try_recv().is_err());
    }
}
