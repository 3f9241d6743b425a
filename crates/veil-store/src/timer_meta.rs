//! Shared timer metadata.
//!
//! Timer execution is always local to the creating process; this store
//! only carries the metadata other instances need: id assignment, timer
//! records for `get`/`list` fallback, and advisory stop markers that the
//! owning driver polls on each tick.
//!
//! Key layout on the shared backend:
//!
//! ```text
//! {prefix}:timer:{id}          timer record, JSON, removed on stop/finish
//! {prefix}:timer:scope:{scope} set of live timer ids in the scope
//! {prefix}:timer:nextid        monotonic id counter
//! {prefix}:timer:stop:{id}     stop marker, ~60s expiry
//! ```

use crate::error::{StoreError, StoreResult};
use crate::scheduler::ScheduledTimer;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::instrument;
use veil_core::TIMER_STOP_MARKER_TTL_SECONDS;

/// Metadata operations backing the scheduler. Each write touches a single
/// key; correctness relies on per-key atomicity, never on a transaction
/// spanning metadata and driver state.
#[async_trait]
pub trait TimerMetaStore: Send + Sync {
    /// Assign the next timer id. Monotonic per deployment.
    async fn next_id(&self) -> StoreResult<u64>;

    /// Record or refresh a timer.
    async fn put(&self, timer: &ScheduledTimer) -> StoreResult<()>;

    /// Remove a timer record and its scope membership.
    async fn remove(&self, id: u64, scope_id: &str) -> StoreResult<()>;

    /// Fetch a timer record.
    async fn get(&self, id: u64) -> StoreResult<Option<ScheduledTimer>>;

    /// All live timer records in a scope.
    async fn list_by_scope(&self, scope_id: &str) -> StoreResult<Vec<ScheduledTimer>>;

    /// Set the advisory stop marker for a timer.
    async fn set_stop_marker(&self, id: u64) -> StoreResult<()>;

    /// Whether a stop marker is currently set.
    async fn stop_marker_set(&self, id: u64) -> StoreResult<bool>;
}

// =============================================================================
// Local (single-process) implementation
// =============================================================================

/// In-process metadata, for the memory backend and tests. Stop markers
/// never expire here; the local driver observes them within one tick and
/// removes the record.
#[derive(Default)]
pub struct LocalTimerMeta {
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, ScheduledTimer>>,
    stop_markers: Mutex<HashSet<u64>>,
}

impl LocalTimerMeta {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            timers: Mutex::new(HashMap::new()),
            stop_markers: Mutex::new(HashSet::new()),
        }
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ScheduledTimer>> {
        // A poisoned lock means a panic mid-insert; the maps hold owned
        // data only, so continuing with the inner value is sound.
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn markers(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.stop_markers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TimerMetaStore for LocalTimerMeta {
    async fn next_id(&self) -> StoreResult<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn put(&self, timer: &ScheduledTimer) -> StoreResult<()> {
        self.timers().insert(timer.id, timer.clone());
        Ok(())
    }

    async fn remove(&self, id: u64, _scope_id: &str) -> StoreResult<()> {
        self.timers().remove(&id);
        self.markers().remove(&id);
        Ok(())
    }

    async fn get(&self, id: u64) -> StoreResult<Option<ScheduledTimer>> {
        Ok(self.timers().get(&id).cloned())
    }

    async fn list_by_scope(&self, scope_id: &str) -> StoreResult<Vec<ScheduledTimer>> {
        let mut timers: Vec<_> = self
            .timers()
            .values()
            .filter(|t| t.scope_id == scope_id)
            .cloned()
            .collect();
        timers.sort_by_key(|t| t.id);
        Ok(timers)
    }

    async fn set_stop_marker(&self, id: u64) -> StoreResult<()> {
        self.markers().insert(id);
        Ok(())
    }

    async fn stop_marker_set(&self, id: u64) -> StoreResult<bool> {
        Ok(self.markers().contains(&id))
    }
}

// =============================================================================
// Redis implementation
// =============================================================================

/// Shared metadata over Redis.
#[derive(Clone)]
pub struct RedisTimerMeta {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisTimerMeta {
    pub fn new(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn timer_key(&self, id: u64) -> String {
        format!("{}:timer:{}", self.key_prefix, id)
    }

    fn scope_key(&self, scope_id: &str) -> String {
        format!("{}:timer:scope:{}", self.key_prefix, scope_id)
    }

    fn nextid_key(&self) -> String {
        format!("{}:timer:nextid", self.key_prefix)
    }

    fn stop_key(&self, id: u64) -> String {
        format!("{}:timer:stop:{}", self.key_prefix, id)
    }

    fn encode(timer: &ScheduledTimer) -> StoreResult<String> {
        serde_json::to_string(timer).map_err(|e| StoreError::SerializationFailed {
            reason: format!("timer encode: {}", e),
        })
    }

    fn decode(json: &str) -> StoreResult<ScheduledTimer> {
        serde_json::from_str(json).map_err(|e| StoreError::SerializationFailed {
            reason: format!("timer decode: {}", e),
        })
    }
}

#[async_trait]
impl TimerMetaStore for RedisTimerMeta {
    #[instrument(skip(self))]
    async fn next_id(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn
            .incr(self.nextid_key(), 1)
            .await
            .map_err(StoreError::from)?;
        Ok(id)
    }

    #[instrument(skip(self, timer), fields(timer_id = timer.id, scope_id = %timer.scope_id))]
    async fn put(&self, timer: &ScheduledTimer) -> StoreResult<()> {
        let json = Self::encode(timer)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.timer_key(timer.id), json)
            .await
            .map_err(StoreError::from)?;
        conn.sadd::<_, _, ()>(self.scope_key(&timer.scope_id), timer.id)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: u64, scope_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.timer_key(id))
            .await
            .map_err(StoreError::from)?;
        conn.srem::<_, _, ()>(self.scope_key(scope_id), id)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: u64) -> StoreResult<Option<ScheduledTimer>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.timer_key(id))
            .await
            .map_err(StoreError::from)?;
        raw.map(|json| Self::decode(&json)).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_scope(&self, scope_id: &str) -> StoreResult<Vec<ScheduledTimer>> {
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn
            .smembers(self.scope_key(scope_id))
            .await
            .map_err(StoreError::from)?;

        let mut timers = Vec::with_capacity(ids.len());
        for id in ids {
            // A member without a record is a timer that finished between
            // the two reads; skip it.
            if let Some(timer) = self.get(id).await? {
                timers.push(timer);
            }
        }
        timers.sort_by_key(|t| t.id);
        Ok(timers)
    }

    #[instrument(skip(self))]
    async fn set_stop_marker(&self, id: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.stop_key(id), 1u8, TIMER_STOP_MARKER_TTL_SECONDS)
            .await
            .map_err(StoreError::from)
    }

    #[instrument(skip(self))]
    async fn stop_marker_set(&self, id: u64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn
            .exists(self.stop_key(id))
            .await
            .map_err(StoreError::from)?;
        Ok(set)
    }
}
