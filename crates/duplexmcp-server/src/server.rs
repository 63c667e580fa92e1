//! The MCP server: configuration, builder, and the service implementation
//! transports bind to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use duplexmcp_protocol::correlator::RequestCorrelator;
use duplexmcp_protocol::error_codes;
use duplexmcp_protocol::ids::RequestIdGenerator;
use duplexmcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use duplexmcp_protocol::methods;
use duplexmcp_protocol::schema::Schema;
use duplexmcp_protocol::service::{McpService, SessionRejection};
use duplexmcp_protocol::types::{
    CancelledParams, CompletionsCapability, CreateMessageParams, CreateMessageResult,
    Implementation, ListRootsResult, LogLevel, LoggingCapability, LoggingMessageParams,
    ProgressParams, Prompt, PromptsCapability, Resource, ResourceTemplate, ResourcesCapability,
    ServerCapabilities, Tool, ToolsCapability, progress_token_of,
};

use crate::auth::TokenValidator;
use crate::error::{ServerError, ServerResult};
use crate::handlers::{
    CompletionHandler, PromptHandler, RequestContext, ResourceHandler, ToolHandler,
};
use crate::registry::ComponentRegistry;
use crate::routing;
use crate::session::{Session, SessionManager};
use crate::store::SessionStore;

/// Explicit runtime configuration threaded into the server constructor.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identity advertised in the `initialize` response
    pub server_info: Implementation,
    /// Operating instructions for the client's model
    pub instructions: Option<String>,
    /// Session TTL in the store, milliseconds
    pub session_ttl_ms: Option<u64>,
    /// Deadline for server-initiated requests (sampling, roots)
    pub request_timeout: Duration,
    /// Whether the `logging` capability is declared
    pub logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_info: Implementation::new("duplexmcp", env!("CARGO_PKG_VERSION")),
            instructions: None,
            session_ttl_ms: None,
            request_timeout: Duration::from_secs(30),
            logging: true,
        }
    }
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<ComponentRegistry>,
    sessions: SessionManager,
    completion: Option<Arc<dyn CompletionHandler>>,
    authorization: Option<Arc<dyn TokenValidator>>,
    /// Current outbound channel per session
    outbound: DashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>,
    /// Correlator per session for server-initiated requests
    correlators: DashMap<String, RequestCorrelator>,
    /// Forwarder task per correlator, routing its frames to the live channel
    forwarders: DashMap<String, tokio::task::JoinHandle<()>>,
    /// Abort handles for in-flight request tasks, by (session, request id)
    inflight: DashMap<(String, String), AbortHandle>,
    id_gen: RequestIdGenerator,
}

/// The MCP server protocol engine. Cheap to clone; transports hold it as an
/// `Arc<dyn McpService>`.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("server_info", &self.inner.config.server_info)
            .field("registry", &self.inner.registry)
            .field("sessions", &self.inner.sessions)
            .finish()
    }
}

impl McpServer {
    /// Start building a server.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name, version)
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    /// Look up a live session.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.get(session_id)
    }

    /// Ids of all live sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.sessions.ids()
    }

    /// The runtime configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Whether the `logging` capability is declared.
    pub fn logging_enabled(&self) -> bool {
        self.inner.config.logging
    }

    /// The registered completion handler, if any.
    pub fn completion_handler(&self) -> Option<Arc<dyn CompletionHandler>> {
        self.inner.completion.clone()
    }

    /// Validate a bearer token against the configured authorization policy.
    ///
    /// Returns the token claims, or an error when no policy is configured or
    /// the validator rejects the token.
    pub async fn authorize(&self, token: &str) -> ServerResult<crate::auth::TokenInfo> {
        let Some(validator) = &self.inner.authorization else {
            return Err(ServerError::handler("no authorization policy configured"));
        };
        validator
            .validate_token(token)
            .await
            .map_err(|e| ServerError::handler(e.to_string()))
    }

    /// Server capabilities derived from what is registered: each capability
    /// is present only if it is actually available.
    pub fn capabilities(&self) -> ServerCapabilities {
        let registry = &self.inner.registry;
        ServerCapabilities {
            experimental: None,
            logging: self.inner.config.logging.then(LoggingCapability::default),
            completions: self
                .inner
                .completion
                .is_some()
                .then(CompletionsCapability::default),
            prompts: (registry.prompt_count() > 0).then(PromptsCapability::default),
            resources: (registry.resource_count() > 0).then(ResourcesCapability::default),
            tools: (registry.tool_count() > 0).then(ToolsCapability::default),
        }
    }

    pub(crate) fn request_context(&self, session_id: &str, request: &JsonRpcRequest) -> RequestContext {
        RequestContext::new(
            session_id,
            Some(request.id.clone()),
            progress_token_of(request.params.as_ref()),
            self.inner
                .outbound
                .get(session_id)
                .map(|tx| tx.value().clone()),
        )
    }

    /// Send a notification to one session.
    pub fn notify_session(
        &self,
        session_id: &str,
        method: &str,
        params: impl serde::Serialize,
    ) -> ServerResult<()> {
        let Some(tx) = self.inner.outbound.get(session_id) else {
            return Err(ServerError::handler(format!(
                "session {session_id} has no outbound channel"
            )));
        };
        let notification = JsonRpcNotification::with_params(method, params)?;
        tx.send(notification.into())
            .map_err(|_| ServerError::handler("outbound channel closed"))
    }

    /// Stream a log record to every attached session whose level admits it.
    ///
    /// Levels order `debug < info < ... < emergency`; a session receives the
    /// record when its configured level is less than or equal to the
    /// record's.
    pub async fn log(&self, level: LogLevel, data: Value, logger: Option<String>) {
        let attached: Vec<String> = self
            .inner
            .outbound
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in attached {
            let Some(session) = self.inner.sessions.get(&session_id) else {
                continue;
            };
            if session.log_level().await > level {
                continue;
            }
            let params = LoggingMessageParams {
                level,
                data: data.clone(),
                logger: logger.clone(),
            };
            if let Err(e) = self.notify_session(&session_id, methods::NOTIFICATION_MESSAGE, params)
            {
                debug!(%session_id, error = %e, "log record not delivered");
            }
        }
    }

    /// Emit a progress update for a client-supplied progress token.
    pub fn progress(
        &self,
        session_id: &str,
        token: &str,
        progress: f64,
        total: Option<f64>,
    ) -> ServerResult<()> {
        self.notify_session(
            session_id,
            methods::NOTIFICATION_PROGRESS,
            ProgressParams {
                progress_token: token.to_string(),
                progress,
                total,
                message: None,
            },
        )
    }

    /// Ask a session's client for its root set.
    pub async fn list_roots(&self, session_id: &str) -> ServerResult<ListRootsResult> {
        let result = self
            .send_request(session_id, methods::ROOTS_LIST, None)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Route a sampling request through a session's client.
    pub async fn create_message(
        &self,
        session_id: &str,
        params: CreateMessageParams,
    ) -> ServerResult<CreateMessageResult> {
        let params = serde_json::to_value(params)?;
        let result = self
            .send_request(session_id, methods::SAMPLING_CREATE_MESSAGE, Some(params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issue a request to a session's client and await the response.
    pub async fn send_request(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> ServerResult<Value> {
        let Some(outbound) = self
            .inner
            .outbound
            .get(session_id)
            .map(|tx| tx.value().clone())
        else {
            return Err(ServerError::Protocol(
                duplexmcp_protocol::Error::SendFailure(format!(
                    "session {session_id} has no outbound channel"
                )),
            ));
        };

        let correlator = self.correlator_for(session_id);
        let id = self.inner.id_gen.next_id();
        let waiter = correlator.register(id.clone(), method, None, None);
        let request = JsonRpcRequest::new(method, params, id.clone());
        if outbound.send(request.into()).is_err() {
            correlator.fail(
                &id,
                duplexmcp_protocol::Error::SendFailure("outbound channel closed".to_string()),
            );
            return Err(ServerError::Protocol(
                duplexmcp_protocol::Error::SendFailure("outbound channel closed".to_string()),
            ));
        }
        waiter.await_result().await.map_err(ServerError::Protocol)
    }

    fn correlator_for(&self, session_id: &str) -> RequestCorrelator {
        self.inner
            .correlators
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
                let correlator = RequestCorrelator::new(tx, self.inner.config.request_timeout);

                // Correlator-originated frames (cancellations) chase the
                // session's current outbound channel, which may be replaced
                // across reconnects.
                let inner = Arc::clone(&self.inner);
                let session = session_id.to_string();
                let forwarder = tokio::spawn(async move {
                    while let Some(message) = rx.recv().await {
                        let delivered = inner
                            .outbound
                            .get(&session)
                            .is_some_and(|out| out.send(message).is_ok());
                        if !delivered {
                            debug!(session_id = %session, "dropping frame for detached session");
                        }
                    }
                });
                self.inner
                    .forwarders
                    .insert(session_id.to_string(), forwarder);
                correlator
            })
            .clone()
    }

    pub(crate) async fn cancel_inflight(&self, session: &Arc<Session>, params: &CancelledParams) {
        let key = (session.id().to_string(), params.request_id.to_string());
        if let Some((_, abort)) = self.inner.inflight.remove(&key) {
            abort.abort();
            session.complete_request(&params.request_id).await;
            debug!(
                session_id = %session.id(),
                request_id = %params.request_id,
                reason = params.reason.as_deref().unwrap_or(""),
                "in-flight request cancelled"
            );
            return;
        }
        // Not an in-flight inbound request; it may be one of ours.
        if let Some(correlator) = self.inner.correlators.get(session.id()) {
            correlator.handle_peer_cancelled(params);
        }
    }

    async fn run_request(
        &self,
        session: Arc<Session>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcMessage> {
        let id = request.id.clone();
        session.track_request(&id, &request.method).await;

        let key = (session.id().to_string(), id.to_string());
        let task = tokio::spawn(routing::dispatch_request(
            self.clone(),
            Arc::clone(&session),
            request,
        ));
        self.inner.inflight.insert(key.clone(), task.abort_handle());
        let outcome = task.await;
        self.inner.inflight.remove(&key);
        session.complete_request(&id).await;

        match outcome {
            Ok(response) => Some(response.into()),
            Err(e) if e.is_cancelled() => {
                // Cancelled requests get no response; the cancel was a
                // notification and those are fire-and-forget.
                None
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "request task panicked");
                let error = JsonRpcError::with_data(
                    error_codes::INTERNAL_ERROR,
                    "Internal error",
                    json!({ "reason": "handler crashed" }),
                );
                Some(JsonRpcResponse::error(error, id).into())
            }
        }
    }

    /// Cancel everything and drop all per-session machinery.
    pub async fn shutdown(&self) {
        for entry in self.inner.correlators.iter() {
            entry.value().cancel_all("client closed");
        }
        self.inner.correlators.clear();
        for entry in self.inner.inflight.iter() {
            entry.value().abort();
        }
        self.inner.inflight.clear();
        for entry in self.inner.forwarders.iter() {
            entry.value().abort();
        }
        self.inner.forwarders.clear();
        self.inner.outbound.clear();
    }
}

#[async_trait]
impl McpService for McpServer {
    async fn resolve_session(
        &self,
        presented: Option<&str>,
        transport_versions: &'static [&'static str],
    ) -> Result<String, SessionRejection> {
        match presented {
            None => {
                let session = self.inner.sessions.create(transport_versions).await;
                Ok(session.id().to_string())
            }
            Some(id) => self
                .inner
                .sessions
                .get_or_restore(id, transport_versions)
                .await
                .map(|s| s.id().to_string())
                .ok_or(SessionRejection::Unknown),
        }
    }

    async fn handle_message(
        &self,
        session_id: &str,
        message: JsonRpcMessage,
    ) -> Option<JsonRpcMessage> {
        let Some(session) = self.inner.sessions.get(session_id) else {
            warn!(%session_id, "message for unknown session");
            return match message {
                JsonRpcMessage::Request(request) => {
                    let error =
                        JsonRpcError::new(error_codes::INVALID_REQUEST, "Unknown session");
                    Some(JsonRpcResponse::error(error, request.id).into())
                }
                _ => None,
            };
        };

        match message {
            JsonRpcMessage::Request(request) => self.run_request(session, request).await,
            JsonRpcMessage::Notification(notification) => {
                routing::dispatch_notification(
                    self,
                    &session,
                    &notification.method,
                    notification.params,
                )
                .await;
                None
            }
            JsonRpcMessage::Response(response) => {
                match self.inner.correlators.get(session_id) {
                    Some(correlator) => {
                        correlator.dispatch_response(response);
                    }
                    None => {
                        debug!(%session_id, "response with no pending request, dropping");
                    }
                }
                None
            }
        }
    }

    fn attach_outbound(&self, session_id: &str, sender: mpsc::UnboundedSender<JsonRpcMessage>) {
        self.inner.outbound.insert(session_id.to_string(), sender);
        debug!(%session_id, "outbound channel attached");
    }

    fn detach_outbound(&self, session_id: &str) {
        self.inner.outbound.remove(session_id);
        debug!(%session_id, "outbound channel detached");
    }

    fn has_outbound(&self, session_id: &str) -> bool {
        self.inner.outbound.contains_key(session_id)
    }

    async fn terminate_session(&self, session_id: &str) -> bool {
        let existed = self.inner.sessions.remove(session_id).await;
        self.inner.outbound.remove(session_id);
        if let Some((_, correlator)) = self.inner.correlators.remove(session_id) {
            correlator.cancel_all("client closed");
        }
        if let Some((_, forwarder)) = self.inner.forwarders.remove(session_id) {
            forwarder.abort();
        }
        let stale: Vec<_> = self
            .inner
            .inflight
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            if let Some((_, abort)) = self.inner.inflight.remove(&key) {
                abort.abort();
            }
        }
        if existed {
            debug!(%session_id, "session terminated");
        }
        existed
    }

    fn server_info(&self) -> Implementation {
        self.inner.config.server_info.clone()
    }
}

enum PendingComponent {
    Tool {
        tool: Tool,
        input: Schema,
        handler: Arc<dyn ToolHandler>,
    },
    Prompt {
        prompt: Prompt,
        handler: Arc<dyn PromptHandler>,
    },
    Resource {
        resource: Resource,
        handler: Arc<dyn ResourceHandler>,
    },
    Template {
        template: ResourceTemplate,
        handler: Arc<dyn ResourceHandler>,
    },
}

/// Builder assembling an [`McpServer`].
pub struct McpServerBuilder {
    config: ServerConfig,
    components: Vec<PendingComponent>,
    completion: Option<Arc<dyn CompletionHandler>>,
    store: Option<Arc<dyn SessionStore>>,
    authorization: Option<Arc<dyn TokenValidator>>,
}

impl McpServerBuilder {
    /// Start a builder with the server identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            config: ServerConfig {
                server_info: Implementation::new(name, version),
                ..Default::default()
            },
            components: Vec::new(),
            completion: None,
            store: None,
            authorization: None,
        }
    }

    /// Set the model-facing instructions returned from `initialize`.
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    /// Bound sessions in the store by a TTL.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Deadline for server-initiated requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Declare (or suppress) the `logging` capability.
    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.logging = enabled;
        self
    }

    /// Register a tool.
    pub fn tool(mut self, tool: Tool, input: Schema, handler: Arc<dyn ToolHandler>) -> Self {
        self.components.push(PendingComponent::Tool {
            tool,
            input,
            handler,
        });
        self
    }

    /// Register a prompt.
    pub fn prompt(mut self, prompt: Prompt, handler: Arc<dyn PromptHandler>) -> Self {
        self.components
            .push(PendingComponent::Prompt { prompt, handler });
        self
    }

    /// Register a static resource.
    pub fn resource(mut self, resource: Resource, handler: Arc<dyn ResourceHandler>) -> Self {
        self.components
            .push(PendingComponent::Resource { resource, handler });
        self
    }

    /// Register a resource template.
    pub fn resource_template(
        mut self,
        template: ResourceTemplate,
        handler: Arc<dyn ResourceHandler>,
    ) -> Self {
        self.components
            .push(PendingComponent::Template { template, handler });
        self
    }

    /// Register the completion handler.
    pub fn completion(mut self, handler: Arc<dyn CompletionHandler>) -> Self {
        self.completion = Some(handler);
        self
    }

    /// Persist sessions to a store.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Require bearer-token authorization.
    pub fn authorization(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.authorization = Some(validator);
        self
    }

    /// Register everything and assemble the server.
    pub fn build(self) -> ServerResult<McpServer> {
        let registry = Arc::new(ComponentRegistry::new());
        for component in self.components {
            match component {
                PendingComponent::Tool {
                    tool,
                    input,
                    handler,
                } => registry.register_tool(tool, &input, handler)?,
                PendingComponent::Prompt { prompt, handler } => {
                    registry.register_prompt(prompt, handler)?;
                }
                PendingComponent::Resource { resource, handler } => {
                    registry.register_resource(resource, handler)?;
                }
                PendingComponent::Template { template, handler } => {
                    registry.register_resource_template(template, handler)?;
                }
            }
        }

        let sessions = SessionManager::new(self.store.clone(), self.config.session_ttl_ms);
        Ok(McpServer {
            inner: Arc::new(ServerInner {
                config: self.config,
                registry,
                sessions,
                completion: self.completion,
                authorization: self.authorization,
                outbound: DashMap::new(),
                correlators: DashMap::new(),
                forwarders: DashMap::new(),
                inflight: DashMap::new(),
                id_gen: RequestIdGenerator::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, TokenInfo};
    use crate::handlers::tool_fn;
    use duplexmcp_protocol::types::CallToolResult;

    fn echo_tool() -> Tool {
        Tool {
            name: "echo".to_string(),
            title: None,
            description: None,
            input_schema: serde_json::json!({}),
            output_schema: None,
            annotations: None,
        }
    }

    #[tokio::test]
    async fn capabilities_reflect_registered_components() {
        let bare = McpServer::builder("bare", "1.0").logging(false).build().unwrap();
        let caps = bare.capabilities();
        assert!(caps.tools.is_none());
        assert!(caps.prompts.is_none());
        assert!(caps.resources.is_none());
        assert!(caps.logging.is_none());
        assert!(caps.completions.is_none());

        let with_tool = McpServer::builder("tooled", "1.0")
            .tool(
                echo_tool(),
                Schema::new(),
                tool_fn(|_, _| async { Ok(CallToolResult::text("ok")) }),
            )
            .build()
            .unwrap();
        let caps = with_tool.capabilities();
        assert!(caps.tools.is_some());
        assert!(caps.logging.is_some());
    }

    struct AllowList;

    #[async_trait]
    impl TokenValidator for AllowList {
        async fn validate_token(&self, token: &str) -> Result<TokenInfo, AuthError> {
            if token == "sesame" {
                Ok(TokenInfo::default())
            } else {
                Err(AuthError::InvalidToken)
            }
        }
    }

    #[tokio::test]
    async fn authorization_policy_is_consulted() {
        let open = McpServer::builder("open", "1.0").build().unwrap();
        assert!(open.authorize("anything").await.is_err());

        let guarded = McpServer::builder("guarded", "1.0")
            .authorization(Arc::new(AllowList))
            .build()
            .unwrap();
        assert!(guarded.authorize("sesame").await.is_ok());
        assert!(guarded.authorize("wrong").await.is_err());
    }

    #[tokio::test]
    async fn notify_session_requires_an_attached_channel() {
        let server = McpServer::builder("s", "1.0").build().unwrap();
        let err = server
            .notify_session("nobody", methods::NOTIFICATION_MESSAGE, serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ServerError::Handler { .. }));
    }
}
