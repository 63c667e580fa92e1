//! Streamable HTTP transport (server side).
//!
//! One endpoint (default `/mcp`) serves GET, POST, and DELETE:
//!
//! - **POST** with a notification or response body is acknowledged with
//!   `202 Accepted`. A request body runs on a supervised task with a
//!   per-request timeout; the response returns as `application/json`, or
//!   through the session's open SSE channel (the POST then answers `202`).
//! - **GET** upgrades to SSE and registers the caller as the session's
//!   handler. `last-event-id` is accepted and the live stream resumes from
//!   now; missed events are not replayed. Keepalive pings run only while a
//!   handler exists.
//! - **DELETE** terminates the session (`200`, or `405` when deletion is
//!   disabled).
//!
//! Session identity travels in a configurable header (default
//! `mcp-session-id`). An unknown session id answers `404`, which clients
//! interpret as expiry and restart the handshake.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use duplexmcp_protocol::codec;
use duplexmcp_protocol::error_codes;
use duplexmcp_protocol::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId};
use duplexmcp_protocol::methods;
use duplexmcp_protocol::service::{McpService, SessionRejection};

use crate::core::{SESSION_HEADER, TransportError, TransportResult};

/// Protocol versions the streamable HTTP binding carries.
pub const STREAMABLE_HTTP_VERSIONS: &[&str] = &["2025-03-26", "2025-06-18"];

/// Streamable HTTP server configuration.
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// Bind address
    pub bind_addr: String,
    /// MCP endpoint path
    pub endpoint_path: String,
    /// Header carrying the session id
    pub session_header: String,
    /// SSE keepalive interval
    pub keepalive: Duration,
    /// Per-request task timeout
    pub request_timeout: Duration,
    /// Cap on concurrently supervised request tasks; callers beyond it are
    /// answered `503` instead of queued
    pub max_concurrent_requests: usize,
    /// Whether DELETE is honored; when false DELETE answers 405
    pub allow_delete: bool,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            endpoint_path: "/mcp".to_string(),
            session_header: SESSION_HEADER.to_string(),
            keepalive: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_concurrent_requests: 256,
            allow_delete: true,
        }
    }
}

/// Streamable HTTP server binding.
pub struct StreamableHttpServer {
    config: StreamableHttpConfig,
    service: Arc<dyn McpService>,
}

struct AppState {
    config: StreamableHttpConfig,
    /// Session header, parsed once; falls back to the default on a
    /// malformed configured name.
    session_header: axum::http::HeaderName,
    service: Arc<dyn McpService>,
    /// Active SSE channel per session; replaced by a newer GET.
    channels: Arc<DashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>>,
    /// Bounds outstanding supervised request tasks.
    request_slots: Arc<tokio::sync::Semaphore>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            session_header: self.session_header.clone(),
            service: self.service.clone(),
            channels: self.channels.clone(),
            request_slots: self.request_slots.clone(),
        }
    }
}

impl StreamableHttpServer {
    /// Bind a server to a protocol engine.
    pub fn new(config: StreamableHttpConfig, service: Arc<dyn McpService>) -> Self {
        Self { config, service }
    }

    /// Build the axum router for the MCP endpoint.
    pub fn router(&self) -> Router {
        let session_header =
            axum::http::HeaderName::try_from(self.config.session_header.as_str())
                .unwrap_or(axum::http::HeaderName::from_static(SESSION_HEADER));
        let state = AppState {
            config: self.config.clone(),
            session_header,
            service: self.service.clone(),
            channels: Arc::new(DashMap::new()),
            request_slots: Arc::new(tokio::sync::Semaphore::new(
                self.config.max_concurrent_requests,
            )),
        };
        Router::new()
            .route(
                &self.config.endpoint_path,
                get(get_handler).post(post_handler).delete(delete_handler),
            )
            .with_state(state)
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> TransportResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let info = self.service.server_info();
        info!(
            server = %info.name,
            version = %info.version,
            addr = %self.config.bind_addr,
            endpoint = %self.config.endpoint_path,
            "streamable HTTP transport listening"
        );
        let app = self.router();
        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

fn session_of<'h>(headers: &'h HeaderMap, state: &AppState) -> Option<&'h str> {
    headers
        .get(&state.session_header)
        .and_then(|v| v.to_str().ok())
}

fn session_header_value(session_id: &str) -> HeaderValue {
    HeaderValue::from_str(session_id).unwrap_or(HeaderValue::from_static("invalid"))
}

async fn get_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.is_empty() && !accept.contains("text/event-stream") && !accept.contains("*/*") {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let Some(session_id) = session_of(&headers, &state) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let session_id = match state
        .service
        .resolve_session(Some(session_id), STREAMABLE_HTTP_VERSIONS)
        .await
    {
        Ok(id) => id,
        Err(SessionRejection::Unknown) => return StatusCode::NOT_FOUND.into_response(),
        Err(SessionRejection::Refused(reason)) => {
            warn!(%reason, "SSE handshake refused");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    // Resume point; replay is best-effort and this server resumes live.
    if let Some(last_event_id) = headers.get("last-event-id").and_then(|v| v.to_str().ok()) {
        debug!(%session_id, %last_event_id, "SSE reconnect, resuming live stream");
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
    state.service.attach_outbound(&session_id, tx.clone());
    state.channels.insert(session_id.clone(), tx.clone());
    debug!(%session_id, "SSE handler registered");

    let guard = HandlerGuard {
        service: state.service.clone(),
        channels: state.channels.clone(),
        session_id: session_id.clone(),
        tx,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(message) = rx.recv().await {
            match codec::encode(&message) {
                Ok(frame) => {
                    yield Ok::<Event, axum::Error>(
                        Event::default()
                            .event("message")
                            .data(frame)
                            .id(Uuid::new_v4().to_string()),
                    );
                }
                Err(e) => warn!(error = %e, "failed to encode SSE frame"),
            }
        }
    };

    let keepalive = KeepAlive::new().interval(state.config.keepalive);
    let mut response = Sse::new(stream).keep_alive(keepalive).into_response();
    response
        .headers_mut()
        .insert(state.session_header.clone(), session_header_value(&session_id));
    response
}

/// Detaches the SSE handler when the stream is dropped so keepalives and
/// outbound routing stop with the connection.
///
/// A reconnecting client replaces the registration before the old stream
/// drops, so the guard only detaches when the registration is still its own.
struct HandlerGuard {
    service: Arc<dyn McpService>,
    channels: Arc<DashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>>,
    session_id: String,
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let still_ours = self
            .channels
            .remove_if(&self.session_id, |_, current| current.same_channel(&self.tx))
            .is_some();
        if still_ours {
            self.service.detach_outbound(&self.session_id);
            debug!(session_id = %self.session_id, "SSE handler detached");
        }
    }
}

async fn post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let messages = match codec::decode_str(&body) {
        Ok(messages) if !messages.is_empty() => messages,
        Ok(_) => return StatusCode::BAD_REQUEST.into_response(),
        Err(e) => {
            let reply = JsonRpcResponse::parse_error(e.to_string());
            return (StatusCode::OK, axum::Json(serde_json::to_value(reply).ok())).into_response();
        }
    };

    let is_initialize = messages
        .iter()
        .any(|m| m.method() == Some(methods::INITIALIZE));
    let presented = session_of(&headers, &state);

    // initialize always mints a fresh session; everything else must present
    // a live one.
    let resolved = if is_initialize {
        state
            .service
            .resolve_session(None, STREAMABLE_HTTP_VERSIONS)
            .await
    } else {
        state
            .service
            .resolve_session(presented, STREAMABLE_HTTP_VERSIONS)
            .await
    };
    let session_id = match resolved {
        Ok(id) => id,
        Err(SessionRejection::Unknown) => return StatusCode::NOT_FOUND.into_response(),
        Err(SessionRejection::Refused(reason)) => {
            warn!(%reason, "POST refused");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let has_requests = messages.iter().any(JsonRpcMessage::is_request);
    let header_name = state.session_header.clone();
    let header_value = session_header_value(&session_id);

    if !has_requests {
        // Notifications and responses are fire-and-forget: dispatch and ack.
        for message in messages {
            state.service.handle_message(&session_id, message).await;
        }
        let mut response = StatusCode::ACCEPTED.into_response();
        response.headers_mut().insert(header_name, header_value);
        return response;
    }

    // Exhaustion answers new callers instead of queuing unbounded work.
    let Ok(slot) = state.request_slots.clone().try_acquire_owned() else {
        warn!(%session_id, "request capacity exhausted");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let replies = run_supervised(&state, &session_id, messages).await;
    drop(slot);

    // With an open SSE channel the response streams there and the POST is
    // just acknowledged.
    if let Some(channel) = state.channels.get(&session_id) {
        let mut streamed = true;
        for reply in &replies {
            if channel.send(reply.clone()).is_err() {
                streamed = false;
                break;
            }
        }
        if streamed {
            let mut response = StatusCode::ACCEPTED.into_response();
            response.headers_mut().insert(header_name, header_value);
            return response;
        }
    }

    let payload = if replies.len() == 1 {
        serde_json::to_value(&replies[0])
    } else {
        serde_json::to_value(&replies)
    };
    let mut response = (StatusCode::OK, axum::Json(payload.unwrap_or(json!(null)))).into_response();
    response.headers_mut().insert(header_name, header_value);
    response
}

/// Run one POST's messages on a supervised task with the configured
/// per-request timeout.
///
/// A timeout aborts the task and yields `internal_error` responses; a crash
/// is logged and reported the same way, and the transport stays alive.
async fn run_supervised(
    state: &AppState,
    session_id: &str,
    messages: Vec<JsonRpcMessage>,
) -> Vec<JsonRpcMessage> {
    let request_ids: Vec<RequestId> = messages
        .iter()
        .filter(|m| m.is_request())
        .filter_map(|m| m.request_id().cloned())
        .collect();

    let service = state.service.clone();
    let session = session_id.to_string();
    let task = tokio::spawn(async move {
        let mut replies = Vec::new();
        for message in messages {
            if let Some(reply) = service.handle_message(&session, message).await {
                replies.push(reply);
            }
        }
        replies
    });

    match tokio::time::timeout(state.config.request_timeout, task).await {
        Ok(Ok(replies)) => replies,
        Ok(Err(join_error)) => {
            error!(%session_id, error = %join_error, "request task crashed");
            error_replies(
                &request_ids,
                "Internal error",
                Some(json!({ "reason": join_error.to_string() })),
            )
        }
        Err(_) => {
            warn!(
                %session_id,
                timeout_ms = state.config.request_timeout.as_millis() as u64,
                "request task timed out"
            );
            error_replies(&request_ids, "Request timed out", None)
        }
    }
}

fn error_replies(
    request_ids: &[RequestId],
    message: &str,
    data: Option<serde_json::Value>,
) -> Vec<JsonRpcMessage> {
    request_ids
        .iter()
        .map(|id| {
            let error = JsonRpcError {
                code: error_codes::INTERNAL_ERROR,
                message: message.to_string(),
                data: data.clone(),
            };
            JsonRpcResponse::error(error, id.clone()).into()
        })
        .collect()
}

async fn delete_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.config.allow_delete {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(session_id) = session_of(&headers, &state) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.service.terminate_session(session_id).await {
        state.channels.remove(session_id);
        debug!(%session_id, "session deleted");
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StreamableHttpConfig::default();
        assert_eq!(config.endpoint_path, "/mcp");
        assert_eq!(config.session_header, SESSION_HEADER);
        assert_eq!(config.keepalive, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_requests, 256);
        assert!(config.allow_delete);
    }

    #[test]
    fn version_set_excludes_legacy() {
        assert!(!STREAMABLE_HTTP_VERSIONS.contains(&"2024-11-05"));
        assert!(STREAMABLE_HTTP_VERSIONS.contains(&"2025-06-18"));
    }

    #[test]
    fn error_replies_cover_every_request_id() {
        let ids = vec![RequestId::Number(1), RequestId::from("x")];
        let replies = error_replies(&ids, "Request timed out", None);
        assert_eq!(replies.len(), 2);
        for reply in replies {
            let JsonRpcMessage::Response(r) = reply else {
                panic!("expected responses");
            };
            assert_eq!(r.error_object().unwrap().code, error_codes::INTERNAL_ERROR);
        }
    }
}
