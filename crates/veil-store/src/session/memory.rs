//! In-memory session store.
//!
//! A single `RwLock`'d map plus a low-frequency sweep task. The sweep only
//! reclaims memory; `get` and `claim` self-check freshness so correctness
//! never depends on sweep timing.

use crate::error::StoreResult;
use crate::session::{SessionEntry, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use veil_core::{Clock, SESSION_SWEEP_INTERVAL_SECONDS};

type SessionMap = HashMap<String, SessionEntry>;

/// Single-process session store.
#[derive(Clone)]
pub struct MemorySessionStore {
    data: Arc<RwLock<SessionMap>>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
}

impl MemorySessionStore {
    /// Create a store and spawn its background sweep.
    ///
    /// The sweep holds only a weak handle to the map, so dropping the last
    /// store handle ends the task on its next wakeup.
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
        assert!(ttl_ms > 0, "ttl must be positive");

        let store = Self::without_sweep(clock, ttl_ms);
        store.spawn_sweep(Duration::from_secs(SESSION_SWEEP_INTERVAL_SECONDS));
        store
    }

    /// Create a store with no background sweep. Reads still enforce TTL;
    /// used by tests that drive the clock manually.
    pub fn without_sweep(clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl_ms,
        }
    }

    fn spawn_sweep(&self, interval: Duration) {
        let data: Weak<RwLock<SessionMap>> = Arc::downgrade(&self.data);
        let clock = Arc::clone(&self.clock);
        let ttl_ms = self.ttl_ms;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(data) = data.upgrade() else {
                    break;
                };
                let now_ms = clock.now_ms();
                let mut map = data.write().await;
                let before = map.len();
                map.retain(|_, entry| !entry.is_expired(ttl_ms, now_ms));
                let removed = before - map.len();
                if removed > 0 {
                    debug!(removed, remaining = map.len(), "swept expired sessions");
                }
            }
        });
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    #[instrument(skip(self, entry), fields(session_id = %entry.id, scope_id = %entry.scope_id))]
    async fn put(&self, entry: SessionEntry) -> StoreResult<()> {
        let mut map = self.data.write().await;
        map.insert(entry.id.clone(), entry);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> StoreResult<Option<SessionEntry>> {
        let now_ms = self.clock.now_ms();
        let map = self.data.read().await;
        Ok(map
            .get(id)
            .filter(|entry| !entry.is_expired(self.ttl_ms, now_ms))
            .cloned())
    }

    #[instrument(skip(self))]
    async fn claim(&self, id: &str) -> StoreResult<Option<SessionEntry>> {
        let now_ms = self.clock.now_ms();
        // Remove under the write lock: the single winner is whoever holds
        // the lock when the entry is still present.
        let mut map = self.data.write().await;
        match map.remove(id) {
            Some(entry) if entry.is_expired(self.ttl_ms, now_ms) => Ok(None),
            other => Ok(other),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut map = self.data.write().await;
        Ok(map.remove(id).is_some())
    }

    async fn approximate_size(&self) -> StoreResult<usize> {
        Ok(self.data.read().await.len())
    }
}
