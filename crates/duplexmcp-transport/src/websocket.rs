//! WebSocket transport: text-frame duplex.
//!
//! The server upgrades at `{base_path}/ws`; each connection is one session.
//! On close (or server-initiated close-with-code) the transport stops and
//! surfaces the code and reason.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::any,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

use duplexmcp_protocol::codec;
use duplexmcp_protocol::service::McpService;
use duplexmcp_protocol::version::SUPPORTED_PROTOCOL_VERSIONS;

use crate::core::{Transport, TransportError, TransportEvent, TransportKind, TransportResult};
use crate::stdio::dispatch_raw_frame;

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct WebSocketServerConfig {
    /// Bind address
    pub bind_addr: String,
    /// Base path; the upgrade endpoint is `{base_path}/ws`
    pub base_path: String,
}

impl Default for WebSocketServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            base_path: String::new(),
        }
    }
}

impl WebSocketServerConfig {
    /// The upgrade path derived from the base path.
    pub fn upgrade_path(&self) -> String {
        format!("{}/ws", self.base_path.trim_end_matches('/'))
    }
}

/// WebSocket server binding.
pub struct WebSocketServer {
    config: WebSocketServerConfig,
    service: Arc<dyn McpService>,
}

#[derive(Clone)]
struct AppState {
    service: Arc<dyn McpService>,
}

impl WebSocketServer {
    /// Bind a server to a protocol engine.
    pub fn new(config: WebSocketServerConfig, service: Arc<dyn McpService>) -> Self {
        Self { config, service }
    }

    /// Build the axum router with the upgrade endpoint.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
        };
        Router::new()
            .route(&self.config.upgrade_path(), any(upgrade_handler))
            .with_state(state)
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> TransportResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(
            addr = %self.config.bind_addr,
            path = %self.config.upgrade_path(),
            "WebSocket transport listening"
        );
        let app = self.router();
        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

async fn upgrade_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_connection(state.service, socket))
}

async fn serve_connection(service: Arc<dyn McpService>, socket: WebSocket) {
    let (mut sink, mut source) = socket.split();
    let session_id = match service
        .resolve_session(None, SUPPORTED_PROTOCOL_VERSIONS)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "WebSocket session rejected");
            let _ = sink.send(AxumMessage::Close(None)).await;
            return;
        }
    };
    debug!(%session_id, "WebSocket session open");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    service.attach_outbound(&session_id, outbound_tx);

    loop {
        tokio::select! {
            inbound = source.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    AxumMessage::Text(text) => {
                        for reply in dispatch_raw_frame(service.as_ref(), &session_id, text.as_str()).await {
                            match codec::encode(&reply) {
                                Ok(frame) => {
                                    if sink.send(AxumMessage::Text(frame.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "failed to encode reply"),
                            }
                        }
                    }
                    AxumMessage::Close(_) => break,
                    // Binary frames are outside the contract; pings are
                    // answered by axum itself.
                    _ => {}
                }
            }
            message = outbound_rx.recv() => {
                let Some(message) = message else { break };
                match codec::encode(&message) {
                    Ok(frame) => {
                        if sink.send(AxumMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outbound frame"),
                }
            }
        }
    }

    service.detach_outbound(&session_id);
    service.terminate_session(&session_id).await;
    debug!(%session_id, "WebSocket session closed");
}

type WsSink = futures::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    tungstenite::Message,
>;

/// Client-side WebSocket transport.
pub struct WebSocketTransport {
    url: String,
    sink: Arc<TokioMutex<Option<WsSink>>>,
    inbound: Arc<TokioMutex<Option<mpsc::Receiver<TransportEvent>>>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create a transport for the given `ws://` / `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: Arc::new(TokioMutex::new(None)),
            inbound: Arc::new(TokioMutex::new(None)),
            reader_task: None,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn supported_protocol_versions(&self) -> &'static [&'static str] {
        SUPPORTED_PROTOCOL_VERSIONS
    }

    async fn start(&mut self) -> TransportResult<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (sink, mut source) = stream.split();
        *self.sink.lock().await = Some(sink);

        let (tx, rx) = mpsc::channel(64);
        *self.inbound.lock().await = Some(rx);

        self.reader_task = Some(tokio::spawn(async move {
            while let Some(next) = source.next().await {
                match next {
                    Ok(tungstenite::Message::Text(text)) => {
                        if tx
                            .send(TransportEvent::Frame(text.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(tungstenite::Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), Some(f.reason.to_string())),
                            None => (None, None),
                        };
                        let _ = tx.send(TransportEvent::Closed { code, reason }).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            let _ = tx
                .send(TransportEvent::Closed {
                    code: None,
                    reason: None,
                })
                .await;
        }));
        Ok(())
    }

    async fn send(&self, frame: String) -> TransportResult<()> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        sink.send(tungstenite::Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> TransportResult<Option<TransportEvent>> {
        let mut inbound = self.inbound.lock().await;
        let Some(rx) = inbound.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        Ok(rx.recv().await)
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(tungstenite::Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        *self.inbound.lock().await = None;
        Ok(())
    }
}
