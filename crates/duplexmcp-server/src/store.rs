//! Session persistence.
//!
//! The [`SessionStore`] trait is the only thing the engine knows about
//! persistence; the in-memory implementation ships here, and external
//! backends (Redis and friends) implement the same contract. **All TTLs are
//! milliseconds.** Stores guarantee per-key atomic replace; sessions are
//! single-writer in practice, so `update` is a last-write-wins merge with no
//! compare-and-swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Expiry follows the tokio runtime clock.
use tokio::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use duplexmcp_protocol::types::{ClientCapabilities, Implementation, LogLevel};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No entry for the id (or the entry expired).
    #[error("session not found")]
    NotFound,
    /// The stored payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One tracked in-flight request inside a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Request method
    pub method: String,
    /// Wall-clock start, milliseconds since the Unix epoch
    pub started_at_ms: u64,
}

/// The persisted state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session id
    pub id: String,
    /// Negotiated protocol version, set by `initialize`
    pub protocol_version: Option<String>,
    /// True once `notifications/initialized` arrived
    pub initialized: bool,
    /// Client implementation info from the handshake
    pub client_info: Option<Implementation>,
    /// Client capabilities from the handshake
    pub client_capabilities: Option<ClientCapabilities>,
    /// Minimum log level the client wants streamed
    pub log_level: LogLevel,
    /// In-flight requests, by stringified request id
    pub pending_requests: HashMap<String, PendingRequest>,
}

impl SessionState {
    /// Fresh state for a new session.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol_version: None,
            initialized: false,
            client_info: None,
            client_capabilities: None,
            log_level: LogLevel::default(),
            pending_requests: HashMap::new(),
        }
    }
}

/// Pluggable session persistence. TTLs are milliseconds.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Persist a full session state, optionally bounded by a TTL.
    async fn save(&self, id: &str, state: &SessionState, ttl_ms: Option<u64>) -> StoreResult<()>;

    /// Load a session state.
    async fn load(&self, id: &str) -> StoreResult<SessionState>;

    /// Delete a session.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Merge top-level fields into a stored session, last write wins.
    async fn update(
        &self,
        id: &str,
        updates: Map<String, Value>,
        ttl_ms: Option<u64>,
    ) -> StoreResult<()>;

    /// Ids of all live sessions.
    async fn list_active(&self) -> StoreResult<Vec<String>>;

    /// Reset a session's TTL.
    async fn update_ttl(&self, id: &str, ttl_ms: u64) -> StoreResult<()>;

    /// Evict expired entries, returning how many were removed. Stores with
    /// intrinsic expiry may return `0` and do nothing.
    async fn cleanup_expired(&self) -> StoreResult<usize>;
}

struct StoredEntry {
    state: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local session store with per-entry expiry.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background sweep evicting expired entries every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Ok(evicted) = store.cleanup_expired().await
                    && evicted > 0
                {
                    debug!(evicted, "session store sweep");
                }
            }
        })
    }

    fn deadline(ttl_ms: Option<u64>) -> Option<Instant> {
        ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, id: &str, state: &SessionState, ttl_ms: Option<u64>) -> StoreResult<()> {
        let value = serde_json::to_value(state).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.entries.insert(
            id.to_string(),
            StoredEntry {
                state: value,
                expires_at: Self::deadline(ttl_ms),
            },
        );
        Ok(())
    }

    async fn load(&self, id: &str) -> StoreResult<SessionState> {
        let Some(entry) = self.entries.get(id) else {
            return Err(StoreError::NotFound);
        };
        if entry.expired() {
            drop(entry);
            self.entries.remove(id);
            return Err(StoreError::NotFound);
        }
        serde_json::from_value(entry.state.clone()).map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.entries.remove(id);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        updates: Map<String, Value>,
        ttl_ms: Option<u64>,
    ) -> StoreResult<()> {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return Err(StoreError::NotFound);
        };
        if entry.expired() {
            drop(entry);
            self.entries.remove(id);
            return Err(StoreError::NotFound);
        }
        if let Value::Object(existing) = &mut entry.state {
            for (key, value) in updates {
                existing.insert(key, value);
            }
        }
        if ttl_ms.is_some() {
            entry.expires_at = Self::deadline(ttl_ms);
        }
        Ok(())
    }

    async fn list_active(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().expired())
            .map(|e| e.key().clone())
            .collect())
    }

    async fn update_ttl(&self, id: &str, ttl_ms: u64) -> StoreResult<()> {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return Err(StoreError::NotFound);
        };
        entry.expires_at = Self::deadline(Some(ttl_ms));
        Ok(())
    }

    async fn cleanup_expired(&self) -> StoreResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired());
        Ok(before - self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(id: &str) -> SessionState {
        SessionState::new(id)
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = InMemorySessionStore::new();
        let mut s = state("s1");
        s.protocol_version = Some("2025-06-18".to_string());
        s.initialized = true;
        store.save("s1", &s, None).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), s);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = InMemorySessionStore::new();
        let mut s1 = state("s1");
        s1.log_level = LogLevel::Debug;
        let mut s2 = state("s1");
        s2.log_level = LogLevel::Error;

        store.save("s1", &s1, None).await.unwrap();
        store.save("s1", &s2, None).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), s2);
    }

    #[tokio::test]
    async fn update_merges_into_prior_state() {
        let store = InMemorySessionStore::new();
        store.save("s1", &state("s1"), None).await.unwrap();

        let mut updates = Map::new();
        updates.insert("initialized".to_string(), json!(true));
        updates.insert("protocol_version".to_string(), json!("2025-03-26"));
        store.update("s1", updates, None).await.unwrap();

        let loaded = store.load("s1").await.unwrap();
        assert!(loaded.initialized);
        assert_eq!(loaded.protocol_version.as_deref(), Some("2025-03-26"));
        // Untouched fields survive the merge.
        assert_eq!(loaded.log_level, LogLevel::Info);
    }

    #[tokio::test]
    async fn update_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        assert_eq!(
            store.update("ghost", Map::new(), None).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_hides_sessions() {
        let store = InMemorySessionStore::new();
        store.save("s1", &state("s1"), Some(1_000)).await.unwrap();
        assert!(store.load("s1").await.is_ok());

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(store.load("s1").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_evicts_only_expired() {
        let store = InMemorySessionStore::new();
        store.save("keep", &state("keep"), None).await.unwrap();
        store.save("drop", &state("drop"), Some(500)).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.list_active().await.unwrap(), vec!["keep".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn update_ttl_extends_life() {
        let store = InMemorySessionStore::new();
        store.save("s1", &state("s1"), Some(500)).await.unwrap();
        store.update_ttl("s1", 5_000).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.load("s1").await.is_ok());
    }
}
