//! The MCP client engine.
//!
//! A [`Client`] drives one transport from a background task: outbound frames
//! flow through a command channel, inbound frames are decoded and routed to
//! the request correlator (responses), to registered callbacks (progress,
//! logs), or back out as replies (server-initiated `roots/list`,
//! `sampling/createMessage`, `ping`). Concurrent in-flight requests share
//! the single connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use duplexmcp_protocol::correlator::RequestCorrelator;
use duplexmcp_protocol::ids::{ProgressTokenGenerator, RequestIdGenerator};
use duplexmcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use duplexmcp_protocol::schema::OutputValidator;
use duplexmcp_protocol::types::{
    CallToolParams, CallToolResult, ClientCapabilities, CompleteParams, CompleteResult,
    CreateMessageParams, GetPromptParams, GetPromptResult, Implementation, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListRootsResult, ListToolsResult, LogLevel, LoggingMessageParams, ProgressParams,
    ReadResourceResult, Root, ServerCapabilities, SetLevelParams,
};
use duplexmcp_protocol::version::is_supported;
use duplexmcp_protocol::{Error as ProtocolError, codec, methods};
use duplexmcp_transport::{Transport, TransportEvent};

use crate::error::{ClientError, ClientResult};
use crate::handlers::{LogCallback, ProgressCallback, SamplingHandler};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in the `initialize` request
    pub client_info: Implementation,
    /// Capabilities declared to the server
    pub capabilities: ClientCapabilities,
    /// Default request deadline
    pub request_timeout: Duration,
    /// Protocol version asked for in `initialize`
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("duplexmcp-client", env!("CARGO_PKG_VERSION")),
            capabilities: ClientCapabilities::default(),
            request_timeout: Duration::from_secs(30),
            protocol_version: duplexmcp_protocol::LATEST_PROTOCOL_VERSION.to_string(),
        }
    }
}

enum DriverCommand {
    Frame(JsonRpcMessage),
    Shutdown,
}

struct ClientInner {
    config: ClientConfig,
    correlator: RequestCorrelator,
    commands: mpsc::UnboundedSender<DriverCommand>,
    id_gen: RequestIdGenerator,
    initialized: AtomicBool,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    server_info: RwLock<Option<Implementation>>,
    negotiated_version: RwLock<Option<String>>,
    roots: RwLock<Vec<Root>>,
    sampling: RwLock<Option<Arc<dyn SamplingHandler>>>,
    progress_callbacks: DashMap<String, Arc<ProgressCallback>>,
    log_callback: RwLock<Option<Arc<LogCallback>>>,
    /// Compiled output validators keyed by tool name, rebuilt on every
    /// `tools/list`.
    output_validators: DashMap<String, Arc<OutputValidator>>,
}

/// An MCP client bound to one transport.
pub struct Client {
    inner: Arc<ClientInner>,
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("initialized", &self.inner.initialized.load(Ordering::Relaxed))
            .field("negotiated_version", &*self.inner.negotiated_version.read())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect over a transport with default configuration.
    pub async fn connect<T: Transport + 'static>(transport: T) -> ClientResult<Self> {
        Self::connect_with(transport, ClientConfig::default()).await
    }

    /// Connect over a transport.
    ///
    /// Starts the transport and the driver task. The handshake is a
    /// separate step: call [`Client::initialize`] before anything else.
    pub async fn connect_with<T: Transport + 'static>(
        mut transport: T,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        transport.start().await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (correlator_tx, correlator_rx) = mpsc::unbounded_channel();
        let correlator = RequestCorrelator::new(correlator_tx, config.request_timeout);

        let inner = Arc::new(ClientInner {
            config,
            correlator,
            commands: command_tx,
            id_gen: RequestIdGenerator::new(),
            initialized: AtomicBool::new(false),
            server_capabilities: RwLock::new(None),
            server_info: RwLock::new(None),
            negotiated_version: RwLock::new(None),
            roots: RwLock::new(Vec::new()),
            sampling: RwLock::new(None),
            progress_callbacks: DashMap::new(),
            log_callback: RwLock::new(None),
            output_validators: DashMap::new(),
        });

        let driver = tokio::spawn(drive(
            transport,
            Arc::clone(&inner),
            command_rx,
            correlator_rx,
        ));

        Ok(Self {
            inner,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Run the initialization handshake.
    ///
    /// Sends `initialize`, checks the negotiated version, then sends
    /// `notifications/initialized` - in that order, as the protocol
    /// requires.
    pub async fn initialize(&self) -> ClientResult<InitializeResult> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            return Err(ClientError::AlreadyInitialized);
        }

        let params = InitializeParams {
            protocol_version: self.inner.config.protocol_version.clone(),
            capabilities: self.inner.config.capabilities.clone(),
            client_info: self.inner.config.client_info.clone(),
        };
        let result = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Handshake(format!("malformed initialize result: {e}")))?;

        if !is_supported(&result.protocol_version) {
            return Err(ClientError::Handshake(format!(
                "server negotiated unsupported protocol version {}",
                result.protocol_version
            )));
        }

        *self.inner.server_capabilities.write() = Some(result.capabilities.clone());
        *self.inner.server_info.write() = Some(result.server_info.clone());
        *self.inner.negotiated_version.write() = Some(result.protocol_version.clone());

        self.notify(methods::NOTIFICATION_INITIALIZED, None)?;
        self.inner.initialized.store(true, Ordering::SeqCst);
        debug!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "handshake complete"
        );
        Ok(result)
    }

    /// Re-run the handshake after a session expiry.
    ///
    /// Resets the handshake state and calls [`Client::initialize`] again;
    /// the transport mints a fresh session on the next exchange.
    pub async fn reinitialize(&self) -> ClientResult<InitializeResult> {
        self.inner.initialized.store(false, Ordering::SeqCst);
        *self.inner.server_capabilities.write() = None;
        *self.inner.negotiated_version.write() = None;
        self.initialize().await
    }

    /// True once the handshake completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// The server capabilities from the handshake.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.server_capabilities.read().clone()
    }

    /// The server identity from the handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.inner.server_info.read().clone()
    }

    /// The negotiated protocol version.
    pub fn negotiated_version(&self) -> Option<String> {
        self.inner.negotiated_version.read().clone()
    }

    /// Ping the server. Allowed at any time, before or after the handshake.
    pub async fn ping(&self) -> ClientResult<()> {
        self.request(methods::PING, None).await?;
        Ok(())
    }

    /// List tools, one page.
    ///
    /// Each call rebuilds the cached output validators from the returned
    /// definitions.
    pub async fn list_tools(&self, cursor: Option<String>) -> ClientResult<ListToolsResult> {
        self.require_capability("tools", |caps| caps.tools.is_some())?;
        let params = cursor.map(|c| json!({ "cursor": c }));
        let result: ListToolsResult =
            serde_json::from_value(self.request(methods::TOOLS_LIST, params).await?)
                .map_err(ProtocolError::from)?;

        self.inner.output_validators.clear();
        for tool in &result.tools {
            if let Some(schema) = &tool.output_schema {
                match OutputValidator::compile(schema) {
                    Ok(validator) => {
                        self.inner
                            .output_validators
                            .insert(tool.name.clone(), Arc::new(validator));
                    }
                    Err(e) => {
                        warn!(tool = %tool.name, error = %e, "unusable output schema")
                    }
                }
            }
        }
        Ok(result)
    }

    /// Call a tool.
    ///
    /// Structured content in the result is revalidated against the tool's
    /// cached output validator; a mismatch surfaces as
    /// [`ProtocolError::ToolOutputInvalid`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> ClientResult<CallToolResult> {
        self.call_tool_with_progress(name, arguments, None).await
    }

    /// Call a tool, receiving progress updates through `on_progress`.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Option<Value>,
        on_progress: Option<Arc<ProgressCallback>>,
    ) -> ClientResult<CallToolResult> {
        self.require_capability("tools", |caps| caps.tools.is_some())?;

        let progress_token = on_progress.map(|callback| {
            let token = ProgressTokenGenerator::next_token();
            self.inner.progress_callbacks.insert(token.clone(), callback);
            token
        });

        let mut params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
            meta: None,
        })?;
        if let (Some(token), Some(object)) = (&progress_token, params.as_object_mut()) {
            object.insert("_meta".to_string(), json!({ "progressToken": token }));
        }

        let outcome = self
            .request_with_token(methods::TOOLS_CALL, Some(params), progress_token.clone())
            .await;
        if let Some(token) = progress_token {
            self.inner.progress_callbacks.remove(&token);
        }

        let result: CallToolResult =
            serde_json::from_value(outcome?).map_err(ProtocolError::from)?;

        if let Some(structured) = &result.structured_content
            && let Some(validator) = self.inner.output_validators.get(name)
            && let Err(errors) = validator.validate(structured)
        {
            return Err(ProtocolError::ToolOutputInvalid { errors }.into());
        }
        Ok(result)
    }

    /// List prompts, one page.
    pub async fn list_prompts(&self, cursor: Option<String>) -> ClientResult<ListPromptsResult> {
        self.require_capability("prompts", |caps| caps.prompts.is_some())?;
        let params = cursor.map(|c| json!({ "cursor": c }));
        Ok(
            serde_json::from_value(self.request(methods::PROMPTS_LIST, params).await?)
                .map_err(ProtocolError::from)?,
        )
    }

    /// Fetch a prompt.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> ClientResult<GetPromptResult> {
        self.require_capability("prompts", |caps| caps.prompts.is_some())?;
        let params = serde_json::to_value(GetPromptParams {
            name: name.to_string(),
            arguments,
        })?;
        Ok(
            serde_json::from_value(self.request(methods::PROMPTS_GET, Some(params)).await?)
                .map_err(ProtocolError::from)?,
        )
    }

    /// List static resources, one page.
    pub async fn list_resources(
        &self,
        cursor: Option<String>,
    ) -> ClientResult<ListResourcesResult> {
        self.require_capability("resources", |caps| caps.resources.is_some())?;
        let params = cursor.map(|c| json!({ "cursor": c }));
        Ok(
            serde_json::from_value(self.request(methods::RESOURCES_LIST, params).await?)
                .map_err(ProtocolError::from)?,
        )
    }

    /// List resource templates, one page.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> ClientResult<ListResourceTemplatesResult> {
        self.require_capability("resources", |caps| caps.resources.is_some())?;
        let params = cursor.map(|c| json!({ "cursor": c }));
        Ok(serde_json::from_value(
            self.request(methods::RESOURCES_TEMPLATES_LIST, params).await?,
        )
        .map_err(ProtocolError::from)?)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult> {
        self.require_capability("resources", |caps| caps.resources.is_some())?;
        let params = json!({ "uri": uri });
        Ok(
            serde_json::from_value(self.request(methods::RESOURCES_READ, Some(params)).await?)
                .map_err(ProtocolError::from)?,
        )
    }

    /// Set the minimum log level the server streams to us.
    pub async fn set_log_level(&self, level: LogLevel) -> ClientResult<()> {
        self.require_capability("logging", |caps| caps.logging.is_some())?;
        let params = serde_json::to_value(SetLevelParams { level })?;
        self.request(methods::LOGGING_SET_LEVEL, Some(params)).await?;
        Ok(())
    }

    /// Ask the server for argument completions.
    pub async fn complete(&self, params: CompleteParams) -> ClientResult<CompleteResult> {
        self.require_capability("completions", |caps| caps.completions.is_some())?;
        let params = serde_json::to_value(params)?;
        Ok(serde_json::from_value(
            self.request(methods::COMPLETION_COMPLETE, Some(params)).await?,
        )
        .map_err(ProtocolError::from)?)
    }

    /// Cancel an in-flight request.
    ///
    /// The local waiter resolves with `request_cancelled` and a
    /// `notifications/cancelled` goes to the server.
    pub fn cancel(&self, request_id: &RequestId, reason: &str) -> bool {
        self.inner.correlator.cancel(request_id, reason).is_some()
    }

    /// Issue a raw request, returning its id alongside the waiter.
    ///
    /// This is the escape hatch for callers that need the id - to cancel a
    /// specific call, or to speak methods this client has no convenience
    /// wrapper for. No capability gating is applied.
    pub fn begin_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<(
        RequestId,
        duplexmcp_protocol::correlator::ResponseWaiter,
    )> {
        let id = self.inner.id_gen.next_id();
        let waiter = self
            .inner
            .correlator
            .register(id.clone(), method, None, None);
        let request = JsonRpcRequest::new(method, params, id.clone());
        self.inner
            .commands
            .send(DriverCommand::Frame(request.into()))
            .map_err(|_| {
                ClientError::Protocol(ProtocolError::TransportClosed("driver stopped".to_string()))
            })?;
        Ok((id, waiter))
    }

    /// Register the sampling handler for `sampling/createMessage`.
    pub fn set_sampling_handler(&self, handler: Arc<dyn SamplingHandler>) {
        *self.inner.sampling.write() = Some(handler);
    }

    /// Register a callback for `notifications/message` log records.
    pub fn on_log(&self, callback: Arc<LogCallback>) {
        *self.inner.log_callback.write() = Some(callback);
    }

    /// Register a progress callback under an explicit token.
    pub fn on_progress(&self, token: impl Into<String>, callback: Arc<ProgressCallback>) {
        self.inner.progress_callbacks.insert(token.into(), callback);
    }

    /// Add a root. Duplicates by URI are ignored - first write wins.
    pub fn add_root(&self, root: Root) {
        {
            let mut roots = self.inner.roots.write();
            if roots.iter().any(|r| r.uri == root.uri) {
                return;
            }
            roots.push(root);
        }
        self.notify_roots_changed();
    }

    /// Remove a root by URI.
    pub fn remove_root(&self, uri: &str) -> bool {
        let removed = {
            let mut roots = self.inner.roots.write();
            let before = roots.len();
            roots.retain(|r| r.uri != uri);
            roots.len() != before
        };
        if removed {
            self.notify_roots_changed();
        }
        removed
    }

    /// The current root set, in insertion order.
    pub fn roots(&self) -> Vec<Root> {
        self.inner.roots.read().clone()
    }

    fn notify_roots_changed(&self) {
        let declared = self
            .inner
            .config
            .capabilities
            .roots
            .as_ref()
            .is_some_and(|r| r.list_changed.unwrap_or(false));
        if declared && self.inner.initialized.load(Ordering::SeqCst) {
            let _ = self.notify(methods::NOTIFICATION_ROOTS_LIST_CHANGED, None);
        }
    }

    /// Number of requests currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Cancel all pending requests and tear the transport down.
    pub async fn shutdown(&self) {
        self.inner.correlator.cancel_all("client closed");
        let _ = self.inner.commands.send(DriverCommand::Shutdown);
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        self.request_with_token(method, params, None).await
    }

    async fn request_with_token(
        &self,
        method: &str,
        params: Option<Value>,
        progress_token: Option<String>,
    ) -> ClientResult<Value> {
        let id = self.inner.id_gen.next_id();
        let waiter = self
            .inner
            .correlator
            .register(id.clone(), method, None, progress_token);
        let request = JsonRpcRequest::new(method, params, id.clone());
        if self
            .inner
            .commands
            .send(DriverCommand::Frame(request.into()))
            .is_err()
        {
            self.inner.correlator.fail(
                &id,
                ProtocolError::TransportClosed("driver stopped".to_string()),
            );
        }
        waiter.await_result().await.map_err(ClientError::Protocol)
    }

    fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.inner
            .commands
            .send(DriverCommand::Frame(notification.into()))
            .map_err(|_| {
                ClientError::Protocol(ProtocolError::TransportClosed("driver stopped".to_string()))
            })
    }

    fn require_capability(
        &self,
        name: &str,
        check: impl Fn(&ServerCapabilities) -> bool,
    ) -> ClientResult<()> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(ClientError::NotInitialized);
        }
        let capabilities = self.inner.server_capabilities.read();
        match capabilities.as_ref() {
            Some(caps) if check(caps) => Ok(()),
            _ => Err(ClientError::Protocol(ProtocolError::MethodNotFound(
                format!("server did not declare the {name} capability"),
            ))),
        }
    }
}

/// The driver task: owns the transport, pumps frames both ways.
async fn drive<T: Transport>(
    mut transport: T,
    inner: Arc<ClientInner>,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
    mut correlator_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(DriverCommand::Frame(message)) => {
                        send_frame(&transport, &inner, message).await;
                    }
                    Some(DriverCommand::Shutdown) | None => break,
                }
            }
            // Correlator-originated frames: cancellation notifications.
            message = correlator_rx.recv() => {
                if let Some(message) = message {
                    send_frame(&transport, &inner, message).await;
                }
            }
            event = transport.recv() => {
                match event {
                    Ok(Some(TransportEvent::Frame(frame))) => {
                        handle_inbound(&inner, &frame);
                    }
                    Ok(Some(TransportEvent::Closed { code, reason })) => {
                        let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                        debug!(?code, %reason, "transport closed");
                        inner.correlator.cancel_all(&reason);
                        break;
                    }
                    Ok(None) => {
                        inner.correlator.cancel_all("client closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport receive failed");
                        inner.correlator.cancel_all("client closed");
                        break;
                    }
                }
            }
        }
    }
    let _ = transport.shutdown().await;
}

async fn send_frame<T: Transport>(transport: &T, inner: &Arc<ClientInner>, message: JsonRpcMessage) {
    let frame = match codec::encode(&message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to encode outbound frame");
            return;
        }
    };
    if let Err(e) = transport.send(frame).await {
        warn!(error = %e, "send failed");
        // A failed request send resolves its waiter instead of timing out.
        if let JsonRpcMessage::Request(request) = &message {
            if let Some(settled) = inner
                .correlator
                .fail(&request.id, duplexmcp_protocol::Error::from(e))
                && let Some(token) = settled.progress_token
            {
                inner.progress_callbacks.remove(&token);
            }
        }
    }
}

fn handle_inbound(inner: &Arc<ClientInner>, frame: &str) {
    let messages = match codec::decode_str(frame) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "undecodable inbound frame");
            return;
        }
    };
    for message in messages {
        match message {
            JsonRpcMessage::Response(response) => {
                if let Some(settled) = inner.correlator.dispatch_response(response)
                    && let Some(token) = settled.progress_token
                {
                    inner.progress_callbacks.remove(&token);
                }
            }
            JsonRpcMessage::Request(request) => {
                handle_server_request(inner, request);
            }
            JsonRpcMessage::Notification(notification) => {
                handle_server_notification(inner, notification);
            }
        }
    }
}

/// Answer a server-initiated request.
fn handle_server_request(inner: &Arc<ClientInner>, request: JsonRpcRequest) {
    let id = request.id.clone();
    match request.method.as_str() {
        methods::PING => {
            respond(inner, JsonRpcResponse::success(json!({}), id));
        }
        methods::ROOTS_LIST => {
            let roots = inner.roots.read().clone();
            match serde_json::to_value(ListRootsResult { roots }) {
                Ok(result) => respond(inner, JsonRpcResponse::success(result, id)),
                Err(e) => respond_error(inner, id, -32603, format!("roots failed: {e}")),
            }
        }
        methods::SAMPLING_CREATE_MESSAGE => {
            let Some(handler) = inner.sampling.read().clone() else {
                respond_error(inner, id, -1, "No sampling callback registered".to_string());
                return;
            };
            let params: CreateMessageParams = match serde_json::from_value(
                request.params.unwrap_or(Value::Null),
            ) {
                Ok(params) => params,
                Err(e) => {
                    respond_error(inner, id, -32602, format!("invalid sampling params: {e}"));
                    return;
                }
            };
            // Sampling can take a while; it must not block the driver.
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                match handler.create_message(params).await {
                    Ok(result) => match serde_json::to_value(result) {
                        Ok(result) => respond(&inner, JsonRpcResponse::success(result, id)),
                        Err(e) => {
                            respond_error(&inner, id, -32603, format!("sampling failed: {e}"));
                        }
                    },
                    Err(reason) => {
                        respond_error(&inner, id, -32603, format!("sampling failed: {reason}"));
                    }
                }
            });
        }
        other => {
            respond_error(inner, id, -32601, format!("method not found: {other}"));
        }
    }
}

fn handle_server_notification(inner: &Arc<ClientInner>, notification: JsonRpcNotification) {
    match notification.method.as_str() {
        methods::NOTIFICATION_PROGRESS => {
            let Ok(params) = serde_json::from_value::<ProgressParams>(
                notification.params.unwrap_or(Value::Null),
            ) else {
                warn!("malformed progress notification");
                return;
            };
            match inner.progress_callbacks.get(&params.progress_token) {
                Some(callback) => (callback.value().as_ref())(params),
                None => debug!(token = %params.progress_token, "progress for unknown token"),
            }
        }
        methods::NOTIFICATION_CANCELLED => {
            let Ok(params) = serde_json::from_value::<
                duplexmcp_protocol::types::CancelledParams,
            >(notification.params.unwrap_or(Value::Null)) else {
                warn!("malformed cancellation notification");
                return;
            };
            // The server abandoned one of its own requests, or is answering
            // a race we already settled; either way no response goes out.
            if inner.correlator.handle_peer_cancelled(&params).is_none() {
                debug!(request_id = %params.request_id, "cancel for unknown request");
            }
        }
        methods::NOTIFICATION_MESSAGE => {
            let Ok(params) = serde_json::from_value::<LoggingMessageParams>(
                notification.params.unwrap_or(Value::Null),
            ) else {
                warn!("malformed log notification");
                return;
            };
            match inner.log_callback.read().clone() {
                Some(callback) => (callback.as_ref())(params),
                None => debug!(level = ?params.level, "server log record"),
            }
        }
        other => {
            debug!(method = %other, "unhandled server notification");
        }
    }
}

fn respond(inner: &Arc<ClientInner>, response: JsonRpcResponse) {
    let _ = inner.commands.send(DriverCommand::Frame(response.into()));
}

fn respond_error(inner: &Arc<ClientInner>, id: RequestId, code: i32, message: String) {
    let response = JsonRpcResponse::error(JsonRpcError::new(code, message), id);
    respond(inner, response);
}
