//! Streamable HTTP transport (client side).
//!
//! Frames go up as POSTs to the single MCP endpoint; the session id captured
//! from response headers is echoed on every subsequent request. A GET side
//! channel upgrades to SSE for server-initiated frames and reconnects with
//! `last-event-id` after drops. A `404` from the server means the session
//! expired: the transport surfaces [`TransportError::SessionExpired`] and the
//! client restarts the handshake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::StatusCode;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tracing::{debug, warn};

use crate::core::{
    SESSION_HEADER, Transport, TransportError, TransportEvent, TransportKind, TransportResult,
};
use crate::sse::SseParser;
use crate::streamable_http::STREAMABLE_HTTP_VERSIONS;

/// How long to wait between SSE reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Client-side streamable HTTP transport.
pub struct StreamableHttpTransport {
    endpoint: String,
    session_header: String,
    client: reqwest::Client,
    session_id: Arc<RwLock<Option<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_rx: Arc<TokioMutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    sse_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("endpoint", &self.endpoint)
            .field("session_id", &*self.session_id.read())
            .finish_non_exhaustive()
    }
}

impl StreamableHttpTransport {
    /// Create a transport for the given MCP endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_session_header(endpoint, SESSION_HEADER)
    }

    /// Create a transport with a non-default session header name.
    pub fn with_session_header(
        endpoint: impl Into<String>,
        session_header: impl Into<String>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            endpoint: endpoint.into(),
            session_header: session_header.into(),
            client: reqwest::Client::new(),
            session_id: Arc::new(RwLock::new(None)),
            last_event_id: Arc::new(RwLock::new(None)),
            inbound_tx,
            inbound_rx: Arc::new(TokioMutex::new(inbound_rx)),
            shutdown_tx,
            sse_task: parking_lot::Mutex::new(None),
        }
    }

    /// The session id currently in use, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Forget the session, forcing the next handshake to mint a new one.
    pub fn reset_session(&self) {
        *self.session_id.write() = None;
        *self.last_event_id.write() = None;
    }

    fn capture_session(&self, response: &reqwest::Response) {
        if let Some(id) = response
            .headers()
            .get(&self.session_header)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.write();
            if slot.as_deref() != Some(id) {
                debug!(session_id = %id, "session established");
                *slot = Some(id.to_string());
                drop(slot);
                self.ensure_sse_listener();
            }
        }
    }

    /// Open (or re-open) the GET side channel for server-initiated frames.
    fn ensure_sse_listener(&self) {
        let mut task = self.sse_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let endpoint = self.endpoint.clone();
        let session_header = self.session_header.clone();
        let client = self.client.clone();
        let session_id = self.session_id.clone();
        let last_event_id = self.last_event_id.clone();
        let inbound = self.inbound_tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    return;
                }
                let Some(current_session) = session_id.read().clone() else {
                    return;
                };

                let mut request = client
                    .get(&endpoint)
                    .header("accept", "text/event-stream")
                    .header(&session_header, &current_session);
                if let Some(last) = last_event_id.read().clone() {
                    request = request.header("last-event-id", last);
                }

                match request.send().await {
                    Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                        // Session gone. The POST path surfaces expiry to the
                        // caller; the side channel just stops until a new
                        // session is captured.
                        debug!("SSE channel rejected: session expired");
                        *session_id.write() = None;
                        return;
                    }
                    Ok(response) if response.status().is_success() => {
                        let mut parser = SseParser::new();
                        let mut stream = response.bytes_stream();
                        loop {
                            tokio::select! {
                                chunk = stream.next() => {
                                    let Some(Ok(chunk)) = chunk else { break };
                                    for event in parser.feed(&chunk) {
                                        if let Some(id) = &event.id {
                                            *last_event_id.write() = Some(id.clone());
                                        }
                                        if event.event == "message"
                                            && inbound.send(TransportEvent::Frame(event.data)).is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() {
                                        return;
                                    }
                                }
                            }
                        }
                        debug!("SSE channel dropped, reconnecting");
                    }
                    Ok(response) => {
                        warn!(status = %response.status(), "SSE channel refused");
                    }
                    Err(e) => {
                        warn!(error = %e, "SSE connect failed");
                    }
                }

                tokio::select! {
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn supported_protocol_versions(&self) -> &'static [&'static str] {
        STREAMABLE_HTTP_VERSIONS
    }

    async fn start(&mut self) -> TransportResult<()> {
        // Connections are per-request; the SSE side channel opens once a
        // session id is captured.
        Ok(())
    }

    async fn send(&self, frame: String) -> TransportResult<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .body(frame);
        if let Some(session) = self.session_id.read().clone() {
            request = request.header(&self.session_header, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            self.reset_session();
            return Err(TransportError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "server answered {}",
                response.status()
            )));
        }
        self.capture_session(&response);

        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            // The response rides an inline SSE body.
            let inbound = self.inbound_tx.clone();
            let last_event_id = self.last_event_id.clone();
            tokio::spawn(async move {
                let mut parser = SseParser::new();
                let mut stream = response.bytes_stream();
                while let Some(Ok(chunk)) = stream.next().await {
                    for event in parser.feed(&chunk) {
                        if let Some(id) = &event.id {
                            *last_event_id.write() = Some(id.clone());
                        }
                        if event.event == "message"
                            && inbound.send(TransportEvent::Frame(event.data)).is_err()
                        {
                            return;
                        }
                    }
                }
            });
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if !body.trim().is_empty() {
            let _ = self.inbound_tx.send(TransportEvent::Frame(body));
        }
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Option<TransportEvent>> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.sse_task.lock().take() {
            task.abort();
        }
        self.reset_session();
        Ok(())
    }
}
