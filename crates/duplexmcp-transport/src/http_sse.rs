//! Legacy HTTP+SSE transport (server side), kept for `2024-11-05` clients.
//!
//! Two endpoints instead of one: a GET SSE endpoint whose first event is
//! `event: endpoint` advertising the POST URL (with the session id in the
//! query string), and a POST endpoint accepting client frames. Server frames
//! - including responses to POSTed requests - travel over the SSE stream as
//! `event: message`.
//!
//! This binding shares no state with the streamable HTTP transport; they are
//! parallel implementations of the same contract.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dashmap::DashMap;
use duplexmcp_protocol::codec;
use duplexmcp_protocol::jsonrpc::JsonRpcMessage;
use duplexmcp_protocol::service::McpService;

use crate::core::{TransportError, TransportResult};
use crate::stdio::dispatch_raw_frame;

/// The single protocol version the legacy binding carries.
pub const HTTP_SSE_VERSIONS: &[&str] = &["2024-11-05"];

/// Legacy HTTP+SSE server configuration.
#[derive(Debug, Clone)]
pub struct HttpSseServerConfig {
    /// Bind address
    pub bind_addr: String,
    /// GET endpoint upgraded to SSE
    pub sse_path: String,
    /// POST endpoint advertised through the `endpoint` event
    pub post_path: String,
    /// SSE keepalive interval
    pub keepalive: Duration,
}

impl Default for HttpSseServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            sse_path: "/sse".to_string(),
            post_path: "/messages".to_string(),
            keepalive: Duration::from_secs(5),
        }
    }
}

/// Legacy HTTP+SSE server binding.
pub struct HttpSseServer {
    config: HttpSseServerConfig,
    service: Arc<dyn McpService>,
}

#[derive(Clone)]
struct AppState {
    config: HttpSseServerConfig,
    service: Arc<dyn McpService>,
    /// SSE channel per session; POSTed requests route their replies here.
    channels: Arc<DashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl HttpSseServer {
    /// Bind a server to a protocol engine.
    pub fn new(config: HttpSseServerConfig, service: Arc<dyn McpService>) -> Self {
        Self { config, service }
    }

    /// Build the axum router with both endpoints.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            service: self.service.clone(),
            channels: Arc::new(DashMap::new()),
        };
        Router::new()
            .route(&self.config.sse_path, get(sse_handler))
            .route(&self.config.post_path, post(post_handler))
            .with_state(state)
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> TransportResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(
            addr = %self.config.bind_addr,
            sse = %self.config.sse_path,
            post = %self.config.post_path,
            "legacy HTTP+SSE transport listening"
        );
        let app = self.router();
        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

async fn sse_handler(State(state): State<AppState>) -> Response {
    let session_id = match state.service.resolve_session(None, HTTP_SSE_VERSIONS).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "SSE session rejected");
            return StatusCode::FORBIDDEN.into_response();
        }
    };
    debug!(%session_id, "legacy SSE stream open");

    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
    state.service.attach_outbound(&session_id, tx.clone());
    state.channels.insert(session_id.clone(), tx);

    let endpoint = format!("{}?sessionId={}", state.config.post_path, session_id);
    let guard = SessionGuard {
        service: state.service.clone(),
        channels: state.channels.clone(),
        session_id: session_id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        // Bootstrap: the first event names the POST endpoint.
        yield Ok::<Event, axum::Error>(
            Event::default()
                .event("endpoint")
                .data(endpoint)
                .id(Uuid::new_v4().to_string()),
        );
        while let Some(message) = rx.recv().await {
            match codec::encode(&message) {
                Ok(frame) => {
                    yield Ok(Event::default()
                        .event("message")
                        .data(frame)
                        .id(Uuid::new_v4().to_string()));
                }
                Err(e) => warn!(error = %e, "failed to encode SSE frame"),
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.config.keepalive))
        .into_response()
}

/// Detaches and terminates the session when the SSE stream drops; in the
/// legacy binding the stream *is* the session.
struct SessionGuard {
    service: Arc<dyn McpService>,
    channels: Arc<DashMap<String, mpsc::UnboundedSender<JsonRpcMessage>>>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.channels.remove(&self.session_id);
        self.service.detach_outbound(&self.session_id);
        let service = self.service.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            service.terminate_session(&session_id).await;
            debug!(%session_id, "legacy SSE session closed");
        });
    }
}

#[derive(Debug, Deserialize)]
struct PostQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn post_handler(
    State(state): State<AppState>,
    Query(query): Query<PostQuery>,
    body: String,
) -> Response {
    let session_id = match state
        .service
        .resolve_session(Some(&query.session_id), HTTP_SSE_VERSIONS)
        .await
    {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    // Replies travel back over the SSE stream, so the POST only
    // acknowledges receipt.
    let replies = dispatch_raw_frame(state.service.as_ref(), &session_id, &body).await;
    if !replies.is_empty() {
        let Some(channel) = state.channels.get(&session_id) else {
            warn!(%session_id, "no SSE stream to carry replies");
            return StatusCode::GONE.into_response();
        };
        for reply in replies {
            if channel.send(reply).is_err() {
                warn!(%session_id, "SSE stream closed while routing reply");
                return StatusCode::GONE.into_response();
            }
        }
    }
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_separate_endpoints() {
        let config = HttpSseServerConfig::default();
        assert_ne!(config.sse_path, config.post_path);
    }

    #[test]
    fn legacy_version_set() {
        assert_eq!(HTTP_SSE_VERSIONS, &["2024-11-05"]);
    }
}
