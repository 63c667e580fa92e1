//! Legacy HTTP+SSE transport (client side).
//!
//! Connects the GET SSE endpoint, waits for the bootstrap `event: endpoint`
//! naming the POST URL, then sends frames there and receives frames as
//! `event: message`.
//!
//! Endpoint resolution tolerates the quirks real servers exhibit: absolute
//! URLs are taken as-is, absolute-path URLs resolve against the origin
//! without re-appending the SSE base path, and a server-supplied duplicated
//! base-path prefix is deduplicated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tracing::{debug, warn};
use url::Url;

use crate::core::{Transport, TransportError, TransportEvent, TransportKind, TransportResult};
use crate::http_sse::HTTP_SSE_VERSIONS;
use crate::sse::SseParser;

/// How long to wait for the bootstrap `endpoint` event.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side legacy HTTP+SSE transport.
pub struct HttpSseTransport {
    sse_url: Url,
    client: reqwest::Client,
    endpoint: Arc<RwLock<Option<Url>>>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_rx: Arc<TokioMutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    listener: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for HttpSseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSseTransport")
            .field("sse_url", &self.sse_url.as_str())
            .field("endpoint", &self.endpoint.read().as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl HttpSseTransport {
    /// Create a transport for the given SSE endpoint URL.
    pub fn new(sse_url: impl AsRef<str>) -> TransportResult<Self> {
        let sse_url = Url::parse(sse_url.as_ref())
            .map_err(|e| TransportError::Configuration(format!("invalid SSE URL: {e}")))?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            sse_url,
            client: reqwest::Client::new(),
            endpoint: Arc::new(RwLock::new(None)),
            inbound_tx,
            inbound_rx: Arc::new(TokioMutex::new(inbound_rx)),
            listener: None,
        })
    }

    /// The POST endpoint advertised by the server, once bootstrapped.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.read().clone()
    }
}

/// Resolve the advertised endpoint against the SSE URL.
///
/// Handles the three shapes servers emit: absolute URLs, absolute paths
/// (resolved against the origin, deduplicating a doubled base-path prefix),
/// and bare relative paths (resolved against the SSE URL's directory).
pub fn resolve_endpoint(base: &Url, advertised: &str) -> TransportResult<Url> {
    if let Ok(absolute) = Url::parse(advertised) {
        return Ok(absolute);
    }

    if advertised.starts_with('/') {
        // Base directory is the SSE path minus its last segment.
        let base_dir = base
            .path()
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        let mut path = advertised.to_string();
        if !base_dir.is_empty() {
            let doubled = format!("{base_dir}{base_dir}");
            if let Some(rest) = path.strip_prefix(&doubled) {
                // The server prepended its base path to a URL that already
                // carried it.
                path = format!("{base_dir}{rest}");
            }
        }
        let mut resolved = base.clone();
        let (path_only, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        resolved.set_path(&path_only);
        resolved.set_query(query.as_deref());
        resolved.set_fragment(None);
        return Ok(resolved);
    }

    base.join(advertised)
        .map_err(|e| TransportError::Configuration(format!("unresolvable endpoint: {e}")))
}

#[async_trait]
impl Transport for HttpSseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpSse
    }

    fn supported_protocol_versions(&self) -> &'static [&'static str] {
        HTTP_SSE_VERSIONS
    }

    async fn start(&mut self) -> TransportResult<()> {
        let response = self
            .client
            .get(self.sse_url.clone())
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "SSE endpoint answered {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let inbound = self.inbound_tx.clone();

        let listener = tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut stream = response.bytes_stream();
            let mut endpoint_tx = Some(endpoint_tx);
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                for event in parser.feed(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        "message" => {
                            if inbound.send(TransportEvent::Frame(event.data)).is_err() {
                                return;
                            }
                        }
                        other => debug!(event = %other, "ignoring SSE event"),
                    }
                }
            }
            let _ = inbound.send(TransportEvent::Closed {
                code: None,
                reason: None,
            });
        });
        self.listener = Some(listener);

        let advertised = tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed("no endpoint event within timeout".into())
            })?
            .map_err(|_| TransportError::ConnectionFailed("SSE stream closed during bootstrap".into()))?;

        let endpoint = resolve_endpoint(&self.sse_url, &advertised)?;
        debug!(endpoint = %endpoint, "legacy SSE endpoint bootstrapped");
        *self.endpoint.write() = Some(endpoint);
        Ok(())
    }

    async fn send(&self, frame: String) -> TransportResult<()> {
        let Some(endpoint) = self.endpoint.read().clone() else {
            return Err(TransportError::NotConnected);
        };
        let response = self
            .client
            .post(endpoint)
            .header("content-type", "application/json")
            .body(frame)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "server answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Option<TransportEvent>> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        *self.endpoint.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://server.example/api/sse").unwrap()
    }

    #[test]
    fn absolute_endpoint_is_taken_verbatim() {
        let resolved = resolve_endpoint(&base(), "http://other.example/rpc").unwrap();
        assert_eq!(resolved.as_str(), "http://other.example/rpc");
    }

    #[test]
    fn absolute_path_resolves_against_origin_without_duplication() {
        let resolved = resolve_endpoint(&base(), "/api/messages?sessionId=1").unwrap();
        assert_eq!(
            resolved.as_str(),
            "http://server.example/api/messages?sessionId=1"
        );
    }

    #[test]
    fn duplicated_base_prefix_is_deduplicated() {
        let resolved = resolve_endpoint(&base(), "/api/api/messages?sessionId=1").unwrap();
        assert_eq!(
            resolved.as_str(),
            "http://server.example/api/messages?sessionId=1"
        );
    }

    #[test]
    fn bare_relative_path_resolves_against_sse_directory() {
        let resolved = resolve_endpoint(&base(), "messages?sessionId=1").unwrap();
        assert_eq!(
            resolved.as_str(),
            "http://server.example/api/messages?sessionId=1"
        );
    }

    #[test]
    fn root_based_sse_url() {
        let base = Url::parse("http://server.example/sse").unwrap();
        let resolved = resolve_endpoint(&base, "/messages?sessionId=9").unwrap();
        assert_eq!(
            resolved.as_str(),
            "http://server.example/messages?sessionId=9"
        );
    }
}
