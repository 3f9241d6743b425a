//! Session entries and the `SessionStore` trait.
//!
//! A session is a hidden result awaiting disclosure: created on the
//! originating action, readable until its TTL elapses, and claimable by
//! exactly one caller ever. The payload is an opaque blob owned by the
//! caller; the store never inspects or mutates it.

pub mod memory;
pub mod redis;

use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A hidden result awaiting disclosure.
///
/// `id` is immutable once created and `payload` is frozen: disclosure
/// reveals what was committed, never a recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Opaque, globally unique id assigned at creation.
    pub id: String,
    /// The actor who may disclose this entry.
    pub owner_id: String,
    /// The channel/context the disclosure must remain inside.
    pub scope_id: String,
    /// Opaque blob owned by the caller.
    pub payload: Vec<u8>,
    /// Creation time in milliseconds since epoch.
    pub created_at_ms: u64,
    /// Id of the public placeholder message edited on disclosure.
    pub external_ref: String,
}

impl SessionEntry {
    /// Create a new entry with a freshly generated id.
    pub fn new(
        owner_id: impl Into<String>,
        scope_id: impl Into<String>,
        payload: Vec<u8>,
        external_ref: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            scope_id: scope_id.into(),
            payload,
            created_at_ms: now_ms,
            external_ref: external_ref.into(),
        }
    }

    /// Whether the entry has outlived `ttl_ms` as of `now_ms`.
    pub fn is_expired(&self, ttl_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= ttl_ms
    }
}

/// TTL-bound key→value store with atomic claim.
///
/// Expiry is enforced per-read: an entry past its TTL is indistinguishable
/// from one that never existed, whether or not any sweep has run.
/// Backend failures surface as `Err`, never as `Ok(None)`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite by id. Never fails on valid input.
    async fn put(&self, entry: SessionEntry) -> StoreResult<()>;

    /// Non-destructive read. `None` once the TTL has elapsed.
    async fn get(&self, id: &str) -> StoreResult<Option<SessionEntry>>;

    /// Atomic get-and-delete. Among concurrent callers on the same id,
    /// exactly one receives the entry; all others receive `None`. Once
    /// claimed, subsequent `get` sees absent.
    async fn claim(&self, id: &str) -> StoreResult<Option<SessionEntry>>;

    /// Explicit removal. Idempotent; returns whether an entry existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Diagnostic only. For a shared backend this may be a whole-namespace
    /// estimate; never used for correctness decisions.
    async fn approximate_size(&self) -> StoreResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_get_distinct_ids() {
        let a = SessionEntry::new("owner", "scope", vec![1], "msg-1", 1_000);
        let b = SessionEntry::new("owner", "scope", vec![1], "msg-1", 1_000);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let entry = SessionEntry::new("owner", "scope", vec![], "msg", 1_000);
        assert!(!entry.is_expired(600_000, 1_000));
        assert!(!entry.is_expired(600_000, 600_999));
        assert!(entry.is_expired(600_000, 601_000));
    }
}
