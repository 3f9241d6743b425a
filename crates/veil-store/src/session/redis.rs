//! Redis-backed session store.
//!
//! Entries live under `{prefix}:session:{id}` with native expiry set at
//! write time, so no sweep is needed. `claim` runs a single Lua script
//! (GET then DEL in one atomic round trip): no two concurrent callers,
//! even across processes, can both receive the entry.

use crate::error::{StoreError, StoreResult};
use crate::session::{SessionEntry, SessionStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::instrument;

/// GET and DEL the key in one server-side step. Returns the value or nil.
const CLAIM_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
    redis.call('DEL', KEYS[1])
end
return value
"#;

/// Open a managed connection to `url`. Callers that run several Redis
/// stores share one manager; it reconnects on its own.
pub async fn redis_connect(url: &str) -> StoreResult<ConnectionManager> {
    let client = redis::Client::open(url).map_err(StoreError::from)?;
    client
        .get_connection_manager()
        .await
        .map_err(StoreError::from)
}

/// Shared session store over Redis.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
    claim_script: Script,
}

impl RedisSessionStore {
    /// Connect to `url` and namespace all keys under `key_prefix`.
    pub async fn connect(url: &str, key_prefix: &str, ttl_seconds: u64) -> StoreResult<Self> {
        assert!(ttl_seconds > 0, "ttl must be positive");
        assert!(!key_prefix.contains(':'), "prefix must not contain ':'");

        let conn = redis_connect(url).await?;
        Ok(Self::with_connection(conn, key_prefix, ttl_seconds))
    }

    /// Build a store over an existing connection. Used by tests and by
    /// callers that share one manager across stores.
    pub fn with_connection(conn: ConnectionManager, key_prefix: &str, ttl_seconds: u64) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
            ttl_seconds,
            claim_script: Script::new(CLAIM_SCRIPT),
        }
    }

    fn key(&self, id: &str) -> String {
        session_key(&self.key_prefix, id)
    }

    fn decode(&self, raw: Option<String>) -> StoreResult<Option<SessionEntry>> {
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::SerializationFailed {
                    reason: format!("session entry decode: {}", e),
                }),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip(self, entry), fields(session_id = %entry.id, scope_id = %entry.scope_id))]
    async fn put(&self, entry: SessionEntry) -> StoreResult<()> {
        let json = serde_json::to_string(&entry).map_err(|e| StoreError::SerializationFailed {
            reason: format!("session entry encode: {}", e),
        })?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(&entry.id), json, self.ttl_seconds)
            .await
            .map_err(StoreError::from)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> StoreResult<Option<SessionEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(id)).await.map_err(StoreError::from)?;
        self.decode(raw)
    }

    #[instrument(skip(self))]
    async fn claim(&self, id: &str) -> StoreResult<Option<SessionEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .claim_script
            .key(self.key(id))
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        self.decode(raw)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.key(id)).await.map_err(StoreError::from)?;
        Ok(removed > 0)
    }

    /// Whole-namespace key count. An estimate by design: the DB may hold
    /// timer metadata and other deployments' keys.
    async fn approximate_size(&self) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        Ok(count as usize)
    }
}

/// Namespaced key for a session entry.
fn session_key(prefix: &str, id: &str) -> String {
    format!("{}:session:{}", prefix, id)
}
