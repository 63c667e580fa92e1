//! Method dispatch for the server protocol engine.
//!
//! Every inbound request lands in [`dispatch_request`], which enforces the
//! initialization gate and the capability gate before routing to the
//! per-method handlers. Handlers return `Result<Value, ProtocolError>`; the
//! error arm serializes to a JSON-RPC error response with the request's id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, warn};

use duplexmcp_protocol::Error as ProtocolError;
use duplexmcp_protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use duplexmcp_protocol::methods;
use duplexmcp_protocol::types::{
    CallToolParams, CompleteParams, GetPromptParams, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    ReadResourceParams, SetLevelParams,
};
use duplexmcp_protocol::version::negotiate_version;

use crate::registry::{ResourceEntry, page_params};
use crate::server::McpServer;
use crate::session::Session;

/// Route one request to its handler and build the response.
pub(crate) async fn dispatch_request(
    server: McpServer,
    session: Arc<Session>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let method = request.method.clone();
    let id = request.id.clone();

    // Initialization gate: until `notifications/initialized` lands, only
    // `initialize`, `ping`, and `notifications/*` may come in.
    let gate_open = session.is_initialized().await
        || matches!(method.as_str(), methods::INITIALIZE | methods::PING)
        || methods::is_notification_method(&method);
    let outcome = if gate_open {
        route(&server, &session, &request).await
    } else {
        Err(ProtocolError::InvalidRequest(format!(
            "{method} sent before initialization completed"
        )))
    };

    match outcome {
        Ok(result) => JsonRpcResponse::success(result, id),
        Err(e) => {
            debug!(session_id = %session.id(), %method, error = %e, "request failed");
            JsonRpcResponse::error(e.to_json_rpc(), id)
        }
    }
}

async fn route(
    server: &McpServer,
    session: &Arc<Session>,
    request: &JsonRpcRequest,
) -> Result<Value, ProtocolError> {
    match request.method.as_str() {
        methods::PING => Ok(json!({})),
        methods::INITIALIZE => initialize(server, session, request).await,
        methods::TOOLS_LIST => {
            require(server.registry().tool_count() > 0, &request.method)?;
            let (cursor, limit) = page_params(request.params.as_ref());
            let (tools, next_cursor) = server.registry().list_tools(cursor.as_deref(), limit)?;
            to_value(ListToolsResult { tools, next_cursor })
        }
        methods::TOOLS_CALL => {
            require(server.registry().tool_count() > 0, &request.method)?;
            call_tool(server, session, request).await
        }
        methods::PROMPTS_LIST => {
            require(server.registry().prompt_count() > 0, &request.method)?;
            let (cursor, limit) = page_params(request.params.as_ref());
            let (prompts, next_cursor) =
                server.registry().list_prompts(cursor.as_deref(), limit)?;
            to_value(ListPromptsResult {
                prompts,
                next_cursor,
            })
        }
        methods::PROMPTS_GET => {
            require(server.registry().prompt_count() > 0, &request.method)?;
            get_prompt(server, session, request).await
        }
        methods::RESOURCES_LIST => {
            require(server.registry().resource_count() > 0, &request.method)?;
            let (cursor, limit) = page_params(request.params.as_ref());
            let (resources, next_cursor) =
                server.registry().list_resources(cursor.as_deref(), limit)?;
            to_value(ListResourcesResult {
                resources,
                next_cursor,
            })
        }
        methods::RESOURCES_TEMPLATES_LIST => {
            require(server.registry().resource_count() > 0, &request.method)?;
            let (cursor, limit) = page_params(request.params.as_ref());
            let (resource_templates, next_cursor) = server
                .registry()
                .list_resource_templates(cursor.as_deref(), limit)?;
            to_value(ListResourceTemplatesResult {
                resource_templates,
                next_cursor,
            })
        }
        methods::RESOURCES_READ => {
            require(server.registry().resource_count() > 0, &request.method)?;
            read_resource(server, session, request).await
        }
        methods::LOGGING_SET_LEVEL => {
            require(server.logging_enabled(), &request.method)?;
            let params: SetLevelParams = parse_params(request.params.clone())?;
            session.set_log_level(params.level).await;
            Ok(json!({}))
        }
        methods::COMPLETION_COMPLETE => {
            let Some(handler) = server.completion_handler() else {
                return Err(method_not_found(&request.method));
            };
            let params: CompleteParams = parse_params(request.params.clone())?;
            let ctx = server.request_context(session.id(), request);
            let result = handler
                .complete(params, ctx)
                .await
                .map_err(crate::error::ServerError::into_protocol)?;
            to_value(result)
        }
        other => Err(method_not_found(other)),
    }
}

async fn initialize(
    server: &McpServer,
    session: &Arc<Session>,
    request: &JsonRpcRequest,
) -> Result<Value, ProtocolError> {
    if session.handshake_started().await {
        return Err(ProtocolError::InvalidRequest(
            "initialize may only be sent once per session".to_string(),
        ));
    }
    let params: InitializeParams = parse_params(request.params.clone())?;

    let version = negotiate_version(&params.protocol_version, session.transport_versions())
        .ok_or_else(|| {
            ProtocolError::Internal("transport supports no protocol version".to_string())
        })?;
    debug!(
        session_id = %session.id(),
        client = %params.client_info.name,
        requested = %params.protocol_version,
        negotiated = %version,
        "initialize"
    );

    session.set_protocol_version(&version).await;
    session
        .set_client(params.client_info, params.capabilities)
        .await;

    to_value(InitializeResult {
        protocol_version: version,
        capabilities: server.capabilities(),
        server_info: server.config().server_info.clone(),
        instructions: server.config().instructions.clone(),
    })
}

async fn call_tool(
    server: &McpServer,
    session: &Arc<Session>,
    request: &JsonRpcRequest,
) -> Result<Value, ProtocolError> {
    let params: CallToolParams = parse_params(request.params.clone())?;
    let Some(entry) = server.registry().find_tool(&params.name) else {
        return Err(ProtocolError::InvalidParams(format!(
            "unknown tool: {}",
            params.name
        )));
    };

    let arguments = params.arguments.unwrap_or_else(|| json!({}));
    let coerced = entry.input.validate(&arguments).map_err(|violations| {
        ProtocolError::InvalidParams(join_violations(&violations))
    })?;

    let ctx = server.request_context(session.id(), request);
    let result = entry
        .handler
        .call(coerced, ctx)
        .await
        .map_err(crate::error::ServerError::into_protocol)?;

    if let (Some(structured), Some(validator)) = (&result.structured_content, &entry.output)
        && let Err(violations) = validator.validate(structured)
    {
        error!(
            session_id = %session.id(),
            tool = %params.name,
            errors = %join_violations(&violations),
            "tool output failed its output schema"
        );
        return Err(ProtocolError::ToolOutputInvalid { errors: violations });
    }

    to_value(result)
}

async fn get_prompt(
    server: &McpServer,
    session: &Arc<Session>,
    request: &JsonRpcRequest,
) -> Result<Value, ProtocolError> {
    let params: GetPromptParams = parse_params(request.params.clone())?;
    let Some(entry) = server.registry().find_prompt(&params.name) else {
        return Err(ProtocolError::InvalidParams(format!(
            "unknown prompt: {}",
            params.name
        )));
    };

    let arguments = params.arguments.unwrap_or_default();
    if let Some(missing) = missing_required_argument(&entry.prompt.arguments, &arguments) {
        return Err(ProtocolError::InvalidParams(format!(
            "{missing}: is required"
        )));
    }

    let ctx = server.request_context(session.id(), request);
    let result = entry
        .handler
        .get(arguments, ctx)
        .await
        .map_err(crate::error::ServerError::into_protocol)?;
    to_value(result)
}

fn missing_required_argument(
    declared: &[duplexmcp_protocol::types::PromptArgument],
    supplied: &HashMap<String, String>,
) -> Option<String> {
    declared
        .iter()
        .find(|a| a.required.unwrap_or(false) && !supplied.contains_key(&a.name))
        .map(|a| a.name.clone())
}

/// Static match first, then templates in registration order. A template
/// answering `resource_not_found` passes the URI to the next template; any
/// other error short-circuits.
async fn read_resource(
    server: &McpServer,
    session: &Arc<Session>,
    request: &JsonRpcRequest,
) -> Result<Value, ProtocolError> {
    let params: ReadResourceParams = parse_params(request.params.clone())?;
    let ctx = server.request_context(session.id(), request);

    if let Some(entry) = server.registry().find_resource_by_uri(&params.uri) {
        let ResourceEntry::Static { handler, .. } = entry.as_ref() else {
            unreachable!("static lookup only returns static entries");
        };
        let result = handler
            .read(&params.uri, ctx)
            .await
            .map_err(crate::error::ServerError::into_protocol)?;
        return to_value(result);
    }

    for entry in server.registry().match_resource_templates(&params.uri) {
        let ResourceEntry::Template { handler, template, .. } = entry.as_ref() else {
            continue;
        };
        match handler.read(&params.uri, ctx.clone()).await {
            Ok(result) => return to_value(result),
            Err(e) => match e.into_protocol() {
                ProtocolError::ResourceNotFound { .. } => {
                    debug!(
                        uri = %params.uri,
                        template = %template.uri_template,
                        "template passed, trying next"
                    );
                }
                other => return Err(other),
            },
        }
    }

    Err(ProtocolError::ResourceNotFound { uri: params.uri })
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Internal(e.to_string()))
}

fn join_violations(violations: &[duplexmcp_protocol::error::SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn require(available: bool, method: &str) -> Result<(), ProtocolError> {
    if available {
        Ok(())
    } else {
        Err(method_not_found(method))
    }
}

fn method_not_found(method: &str) -> ProtocolError {
    ProtocolError::MethodNotFound(method.to_string())
}

/// Handle an inbound notification.
pub(crate) async fn dispatch_notification(
    server: &McpServer,
    session: &Arc<Session>,
    method: &str,
    params: Option<Value>,
) {
    match method {
        methods::NOTIFICATION_INITIALIZED => {
            if session.handshake_started().await {
                session.mark_initialized().await;
                debug!(session_id = %session.id(), "session initialized");
            } else {
                // Out of order: the handshake never started. Notifications
                // cannot be answered, so this is logged and ignored.
                warn!(
                    session_id = %session.id(),
                    "notifications/initialized before initialize, ignoring"
                );
            }
        }
        methods::NOTIFICATION_CANCELLED => {
            let Ok(params) = serde_json::from_value::<
                duplexmcp_protocol::types::CancelledParams,
            >(params.unwrap_or(Value::Null)) else {
                warn!(session_id = %session.id(), "malformed cancellation notification");
                return;
            };
            server.cancel_inflight(session, &params).await;
        }
        methods::NOTIFICATION_PROGRESS | methods::NOTIFICATION_ROOTS_LIST_CHANGED => {
            debug!(session_id = %session.id(), %method, "notification received");
        }
        other => {
            debug!(session_id = %session.id(), method = %other, "unhandled notification");
        }
    }
}
