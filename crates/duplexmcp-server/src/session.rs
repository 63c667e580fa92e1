//! Per-session state and the session table.
//!
//! A [`Session`] owns its [`SessionState`] behind an async lock; every
//! transition persists to the configured store. Persistence is
//! fire-and-forget: a failed save is logged and never fails the session
//! operation. Dispatch for one session is serialized by its transport's
//! inbound order, which keeps the state single-writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use duplexmcp_protocol::jsonrpc::RequestId;
use duplexmcp_protocol::types::{ClientCapabilities, Implementation, LogLevel};

use crate::store::{PendingRequest, SessionState, SessionStore, StoreError};

/// One live session.
pub struct Session {
    id: String,
    /// Protocol versions the session's transport can carry
    transport_versions: &'static [&'static str],
    state: RwLock<SessionState>,
    store: Option<Arc<dyn SessionStore>>,
    ttl_ms: Option<u64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    fn new(
        state: SessionState,
        transport_versions: &'static [&'static str],
        store: Option<Arc<dyn SessionStore>>,
        ttl_ms: Option<u64>,
    ) -> Self {
        Self {
            id: state.id.clone(),
            transport_versions,
            state: RwLock::new(state),
            store,
            ttl_ms,
        }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol versions the owning transport supports.
    pub fn transport_versions(&self) -> &'static [&'static str] {
        self.transport_versions
    }

    /// A point-in-time copy of the state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// True once `notifications/initialized` arrived.
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    /// True once `initialize` was received (response sent, handshake not
    /// necessarily complete).
    pub async fn handshake_started(&self) -> bool {
        self.state.read().await.client_info.is_some()
    }

    /// The negotiated protocol version.
    pub async fn protocol_version(&self) -> Option<String> {
        self.state.read().await.protocol_version.clone()
    }

    /// The session's minimum streamed log level.
    pub async fn log_level(&self) -> LogLevel {
        self.state.read().await.log_level
    }

    /// Record the negotiated protocol version.
    pub async fn set_protocol_version(&self, version: impl Into<String>) {
        {
            let mut state = self.state.write().await;
            state.protocol_version = Some(version.into());
        }
        self.persist().await;
    }

    /// Record the client identity and capabilities from `initialize`.
    pub async fn set_client(&self, info: Implementation, capabilities: ClientCapabilities) {
        {
            let mut state = self.state.write().await;
            state.client_info = Some(info);
            state.client_capabilities = Some(capabilities);
        }
        self.persist().await;
    }

    /// Mark the handshake complete.
    pub async fn mark_initialized(&self) {
        {
            let mut state = self.state.write().await;
            state.initialized = true;
        }
        self.persist().await;
    }

    /// Update the streamed log level.
    pub async fn set_log_level(&self, level: LogLevel) {
        {
            let mut state = self.state.write().await;
            state.log_level = level;
        }
        self.persist().await;
    }

    /// Track an in-flight request.
    pub async fn track_request(&self, id: &RequestId, method: &str) {
        {
            let mut state = self.state.write().await;
            state.pending_requests.insert(
                id.to_string(),
                PendingRequest {
                    method: method.to_string(),
                    started_at_ms: now_ms(),
                },
            );
        }
        self.persist().await;
    }

    /// Stop tracking a request.
    pub async fn complete_request(&self, id: &RequestId) {
        {
            let mut state = self.state.write().await;
            state.pending_requests.remove(&id.to_string());
        }
        self.persist().await;
    }

    /// Whether a request id is currently tracked.
    pub async fn has_pending(&self, id: &RequestId) -> bool {
        self.state
            .read()
            .await
            .pending_requests
            .contains_key(&id.to_string())
    }

    /// All tracked requests.
    pub async fn pending(&self) -> HashMap<String, PendingRequest> {
        self.state.read().await.pending_requests.clone()
    }

    async fn persist(&self) {
        let Some(store) = &self.store else { return };
        let state = self.state.read().await.clone();
        if let Err(e) = store.save(&self.id, &state, self.ttl_ms).await {
            warn!(session_id = %self.id, error = %e, "session save failed");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The table of live sessions, with store-backed restore.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    store: Option<Arc<dyn SessionStore>>,
    ttl_ms: Option<u64>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Create a session table, optionally backed by a store.
    pub fn new(store: Option<Arc<dyn SessionStore>>, ttl_ms: Option<u64>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            ttl_ms,
        }
    }

    /// Create a fresh session bound to a transport's version set.
    pub async fn create(&self, transport_versions: &'static [&'static str]) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            SessionState::new(&id),
            transport_versions,
            self.store.clone(),
            self.ttl_ms,
        ));
        // First transition: the fresh state reaches the store immediately.
        session.persist().await;
        self.sessions.insert(id, Arc::clone(&session));
        debug!(session_id = %session.id(), "session created");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Look up a session, restoring it from the store after a restart.
    ///
    /// Restored fields overwrite defaults; a load failure of any kind is
    /// treated as not-found so the caller creates a fresh session.
    pub async fn get_or_restore(
        &self,
        id: &str,
        transport_versions: &'static [&'static str],
    ) -> Option<Arc<Session>> {
        if let Some(session) = self.get(id) {
            return Some(session);
        }
        let store = self.store.as_ref()?;
        match store.load(id).await {
            Ok(state) => {
                debug!(session_id = %id, "session restored from store");
                let session = Arc::new(Session::new(
                    state,
                    transport_versions,
                    self.store.clone(),
                    self.ttl_ms,
                ));
                self.sessions.insert(id.to_string(), Arc::clone(&session));
                Some(session)
            }
            Err(StoreError::NotFound) => None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "session restore failed");
                None
            }
        }
    }

    /// Remove a session from the table and the store.
    pub async fn remove(&self, id: &str) -> bool {
        let existed = self.sessions.remove(id).is_some();
        if let Some(store) = &self.store
            && let Err(e) = store.delete(id).await
        {
            warn!(session_id = %id, error = %e, "session delete failed");
        }
        existed
    }

    /// Ids of all live sessions.
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use duplexmcp_protocol::version::SUPPORTED_PROTOCOL_VERSIONS;

    fn manager_with_store() -> (SessionManager, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = SessionManager::new(Some(store.clone()), None);
        (manager, store)
    }

    #[tokio::test]
    async fn transitions_persist_to_store() {
        let (manager, store) = manager_with_store();
        let session = manager.create(SUPPORTED_PROTOCOL_VERSIONS).await;

        session.set_protocol_version("2025-06-18").await;
        session
            .set_client(
                Implementation::new("client", "1.0"),
                ClientCapabilities::default(),
            )
            .await;
        session.mark_initialized().await;
        session.set_log_level(LogLevel::Debug).await;

        let stored = store.load(session.id()).await.unwrap();
        assert!(stored.initialized);
        assert_eq!(stored.protocol_version.as_deref(), Some("2025-06-18"));
        assert_eq!(stored.log_level, LogLevel::Debug);
        assert_eq!(stored.client_info.unwrap().name, "client");
    }

    #[tokio::test]
    async fn restore_overwrites_defaults() {
        let (manager, store) = manager_with_store();
        let session = manager.create(SUPPORTED_PROTOCOL_VERSIONS).await;
        session.mark_initialized().await;
        let id = session.id().to_string();

        // Simulate a restart: a new table over the same store.
        let fresh = SessionManager::new(Some(store), None);
        let restored = fresh
            .get_or_restore(&id, SUPPORTED_PROTOCOL_VERSIONS)
            .await
            .unwrap();
        assert!(restored.is_initialized().await);
    }

    #[tokio::test]
    async fn missing_session_restores_to_none() {
        let (manager, _store) = manager_with_store();
        assert!(
            manager
                .get_or_restore("ghost", SUPPORTED_PROTOCOL_VERSIONS)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn pending_request_tracking() {
        let (manager, _store) = manager_with_store();
        let session = manager.create(SUPPORTED_PROTOCOL_VERSIONS).await;
        let id = RequestId::Number(9);

        session.track_request(&id, "tools/call").await;
        assert!(session.has_pending(&id).await);
        assert_eq!(session.pending().await["9"].method, "tools/call");

        session.complete_request(&id).await;
        assert!(!session.has_pending(&id).await);
    }

    #[tokio::test]
    async fn remove_deletes_from_store() {
        let (manager, store) = manager_with_store();
        let session = manager.create(SUPPORTED_PROTOCOL_VERSIONS).await;
        let id = session.id().to_string();

        assert!(manager.remove(&id).await);
        assert!(!manager.remove(&id).await);
        assert!(store.load(&id).await.is_err());
    }
}
