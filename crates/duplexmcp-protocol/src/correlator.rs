//! Bidirectional request correlation.
//!
//! One [`RequestCorrelator`] exists per connection and matches inbound
//! responses to the requests that produced them. Every outbound request gets
//! a deadline; on expiry the waiter resolves with [`Error::Timeout`] and a
//! single `notifications/cancelled` (reason `"timeout"`) goes out. Exactly
//! one of response, error, cancellation, or timeout is ever delivered to a
//! waiter; any later frame bearing the same id is dropped.
//!
//! Recently-settled ids are kept as tombstones for a short grace window so a
//! response that loses the race against its own timeout is dropped quietly
//! instead of being reported as an unknown id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::Error;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, RequestId};
use crate::methods;
use crate::types::notifications::CancelledParams;

/// How long settled ids are remembered to absorb response/timeout races.
const TOMBSTONE_GRACE: Duration = Duration::from_secs(2);

/// The terminal outcome delivered to a request waiter.
pub type RequestOutcome = Result<Value, Error>;

struct PendingEntry {
    method: String,
    started_at: Instant,
    tx: oneshot::Sender<RequestOutcome>,
    progress_token: Option<String>,
}

/// A pending request snapshot, returned when an entry settles.
#[derive(Debug, Clone)]
pub struct SettledRequest {
    /// Method of the original request
    pub method: String,
    /// How long the request was in flight
    pub elapsed: Duration,
    /// Progress token attached to the request, if any
    pub progress_token: Option<String>,
}

struct Inner {
    pending: DashMap<RequestId, PendingEntry>,
    tombstones: DashMap<RequestId, Instant>,
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    default_timeout: Duration,
}

/// Per-connection map of in-flight requests.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl RequestCorrelator {
    /// Create a correlator writing cancellation notifications to `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<JsonRpcMessage>, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                tombstones: DashMap::new(),
                outbound,
                default_timeout,
            }),
        }
    }

    /// Register a waiter for an outbound request.
    ///
    /// The caller sends the frame itself, then awaits the returned waiter.
    pub fn register(
        &self,
        id: RequestId,
        method: impl Into<String>,
        timeout: Option<Duration>,
        progress_token: Option<String>,
    ) -> ResponseWaiter {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            id.clone(),
            PendingEntry {
                method: method.into(),
                started_at: Instant::now(),
                tx,
                progress_token,
            },
        );
        ResponseWaiter {
            id,
            rx,
            timeout: timeout.unwrap_or(self.inner.default_timeout),
            correlator: self.clone(),
        }
    }

    /// Deliver an inbound response or error frame to its waiter.
    ///
    /// Unknown ids are logged and dropped; ids settled within the grace
    /// window are dropped at debug level.
    pub fn dispatch_response(&self, response: JsonRpcResponse) -> Option<SettledRequest> {
        let Some(id) = response.id.clone() else {
            debug!("dropping response frame with null id");
            return None;
        };
        let Some((_, entry)) = self.inner.pending.remove(&id) else {
            if self.inner.tombstones.contains_key(&id) {
                debug!(%id, "dropping frame for a settled request");
            } else {
                warn!(%id, "dropping response for unknown request id");
            }
            return None;
        };
        self.bury(&id);

        let outcome = match response.payload {
            crate::jsonrpc::JsonRpcResponsePayload::Success { result } => Ok(result),
            crate::jsonrpc::JsonRpcResponsePayload::Error { error } => {
                Err(Error::from_json_rpc(error))
            }
        };
        let settled = SettledRequest {
            method: entry.method,
            elapsed: entry.started_at.elapsed(),
            progress_token: entry.progress_token,
        };
        // The waiter may have gone away; that is not an error.
        let _ = entry.tx.send(outcome);
        Some(settled)
    }

    /// Cancel a pending request locally and notify the peer.
    ///
    /// Returns the settled entry if the id was pending; `None` when the
    /// request already settled (the cancel is then a no-op).
    pub fn cancel(&self, id: &RequestId, reason: &str) -> Option<SettledRequest> {
        let settled = self.settle(id, || Error::Cancelled {
            reason: reason.to_string(),
        })?;
        self.emit_cancelled(id, reason);
        Some(settled)
    }

    /// Handle an inbound `notifications/cancelled` from the peer.
    ///
    /// Resolves the local waiter with [`Error::Cancelled`]; no frame goes
    /// back (cancellation is fire-and-forget). Cancels for already-settled
    /// requests are silently dropped.
    pub fn handle_peer_cancelled(&self, params: &CancelledParams) -> Option<SettledRequest> {
        let reason = params.reason.as_deref().unwrap_or("cancelled by peer");
        self.settle(&params.request_id, || Error::Cancelled {
            reason: reason.to_string(),
        })
    }

    /// Settle a pending request with an arbitrary local error, such as a
    /// transport send failure. No cancellation notification is emitted.
    pub fn fail(&self, id: &RequestId, error: Error) -> Option<SettledRequest> {
        self.settle(id, || error)
    }

    /// Cancel every pending request, e.g. on transport shutdown.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self
            .inner
            .pending
            .iter()
            .map(|e| e.key().clone())
            .collect();
        let mut settled = 0;
        for id in ids {
            if self.cancel(&id, reason).is_some() {
                settled += 1;
            }
        }
        settled
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// True when the given id is still pending.
    pub fn has_pending(&self, id: &RequestId) -> bool {
        self.inner.pending.contains_key(id)
    }

    fn settle(&self, id: &RequestId, error: impl FnOnce() -> Error) -> Option<SettledRequest> {
        let (_, entry) = self.inner.pending.remove(id)?;
        self.bury(id);
        let settled = SettledRequest {
            method: entry.method,
            elapsed: entry.started_at.elapsed(),
            progress_token: entry.progress_token,
        };
        let _ = entry.tx.send(Err(error()));
        Some(settled)
    }

    fn expire(&self, id: &RequestId) -> bool {
        let Some((_, entry)) = self.inner.pending.remove(id) else {
            return false;
        };
        self.bury(id);
        debug!(%id, method = %entry.method, "request deadline elapsed");
        drop(entry.tx);
        self.emit_cancelled(id, "timeout");
        true
    }

    fn emit_cancelled(&self, id: &RequestId, reason: &str) {
        let params = CancelledParams::new(id.clone(), reason);
        match JsonRpcNotification::with_params(methods::NOTIFICATION_CANCELLED, params) {
            Ok(notification) => {
                let _ = self.inner.outbound.send(notification.into());
            }
            Err(e) => warn!(%id, error = %e, "failed to encode cancellation notification"),
        }
    }

    fn bury(&self, id: &RequestId) {
        let now = Instant::now();
        self.inner.tombstones.insert(id.clone(), now);
        // Opportunistic pruning keeps the tombstone set bounded.
        self.inner
            .tombstones
            .retain(|_, settled_at| now.duration_since(*settled_at) < TOMBSTONE_GRACE);
    }
}

/// Awaits the outcome of one registered request.
#[derive(Debug)]
pub struct ResponseWaiter {
    id: RequestId,
    rx: oneshot::Receiver<RequestOutcome>,
    timeout: Duration,
    correlator: RequestCorrelator,
}

impl ResponseWaiter {
    /// The id this waiter is registered under.
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    /// Await the response, the deadline, or cancellation, whichever comes
    /// first.
    pub async fn await_result(mut self) -> RequestOutcome {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // The entry was removed without a verdict: that is the timeout
            // path dropping the sender.
            Ok(Err(_)) => Err(Error::Timeout(self.timeout)),
            Err(_elapsed) => {
                if self.correlator.expire(&self.id) {
                    Err(Error::Timeout(self.timeout))
                } else {
                    // The response won the race; it is already in the
                    // channel (or about to be).
                    match self.rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(Error::Timeout(self.timeout)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::JsonRpcResponsePayload;
    use serde_json::json;

    fn correlator() -> (RequestCorrelator, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RequestCorrelator::new(tx, Duration::from_secs(30)), rx)
    }

    fn response(id: RequestId, value: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(value, id)
    }

    #[tokio::test]
    async fn response_resolves_waiter() {
        let (c, _rx) = correlator();
        let id = RequestId::from("r1");
        let waiter = c.register(id.clone(), "tools/list", None, None);

        c.dispatch_response(response(id, json!({"tools": []})));
        let out = waiter.await_result().await.unwrap();
        assert_eq!(out["tools"], json!([]));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_is_dropped() {
        let (c, _rx) = correlator();
        let id = RequestId::from("r1");
        let waiter = c.register(id.clone(), "ping", None, None);

        assert!(c.dispatch_response(response(id.clone(), json!({}))).is_some());
        assert!(c.dispatch_response(response(id, json!({"late": true}))).is_none());
        assert!(waiter.await_result().await.is_ok());
    }

    #[tokio::test]
    async fn error_frame_maps_to_peer_error() {
        let (c, _rx) = correlator();
        let id = RequestId::Number(4);
        let waiter = c.register(id.clone(), "tools/call", None, None);

        let err = crate::jsonrpc::JsonRpcError::new(-32601, "Method not found");
        c.dispatch_response(JsonRpcResponse::error(err, id));
        let out = waiter.await_result().await.unwrap_err();
        assert!(matches!(out, Error::Peer { code: -32601, .. }));
    }

    #[tokio::test]
    async fn cancel_resolves_and_notifies() {
        let (c, mut rx) = correlator();
        let id = RequestId::from("slow");
        let waiter = c.register(id.clone(), "tools/call", None, None);

        assert!(c.cancel(&id, "user abort").is_some());
        let out = waiter.await_result().await.unwrap_err();
        assert!(matches!(out, Error::Cancelled { reason } if reason == "user abort"));

        let JsonRpcMessage::Notification(n) = rx.recv().await.unwrap() else {
            panic!("expected cancellation notification");
        };
        assert_eq!(n.method, methods::NOTIFICATION_CANCELLED);
        assert_eq!(n.params.unwrap()["reason"], "user abort");

        // A late response for the cancelled id is dropped.
        assert!(c.dispatch_response(response(id, json!({}))).is_none());
    }

    #[tokio::test]
    async fn peer_cancel_does_not_echo() {
        let (c, mut rx) = correlator();
        let id = RequestId::from("r");
        let waiter = c.register(id.clone(), "tools/call", None, None);

        c.handle_peer_cancelled(&CancelledParams::new(id, "peer gave up"));
        assert!(waiter.await_result().await.is_err());
        assert!(rx.try_recv().is_err(), "peer cancels are not echoed");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_emits_exactly_one_cancel() {
        let (c, mut rx) = correlator();
        let id = RequestId::from("t");
        let waiter = c.register(id.clone(), "tools/call", Some(Duration::from_secs(5)), None);

        let out = waiter.await_result().await.unwrap_err();
        assert!(matches!(out, Error::Timeout(_)));

        let JsonRpcMessage::Notification(n) = rx.try_recv().unwrap() else {
            panic!("expected cancellation notification");
        };
        assert_eq!(n.params.unwrap()["reason"], "timeout");
        assert!(rx.try_recv().is_err(), "exactly one cancel per timeout");
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_sweeps_pending() {
        let (c, _rx) = correlator();
        let w1 = c.register(RequestId::from("a"), "x", None, None);
        let w2 = c.register(RequestId::from("b"), "y", None, None);

        assert_eq!(c.cancel_all("client closed"), 2);
        for w in [w1, w2] {
            let out = w.await_result().await.unwrap_err();
            assert!(matches!(out, Error::Cancelled { reason } if reason == "client closed"));
        }
    }

    #[tokio::test]
    async fn cancel_after_settle_is_noop() {
        let (c, mut rx) = correlator();
        let id = RequestId::from("done");
        let waiter = c.register(id.clone(), "ping", None, None);
        c.dispatch_response(response(id.clone(), json!({})));
        waiter.await_result().await.unwrap();

        assert!(c.cancel(&id, "too late").is_none());
        assert!(rx.try_recv().is_err());
    }
}
