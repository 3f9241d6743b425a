//! Veil Store
//!
//! The three stateful components of Veil:
//!
//! - [`SessionStore`]: TTL-bound key→value map with atomic claim
//!   (get-and-delete, single winner). In-memory and Redis backends.
//! - [`SchedulerStore`]: recurring-timer entities with a local interval
//!   driver per timer and shared metadata for cross-instance visibility
//!   and advisory stop markers.
//! - [`RateLimiter`]: per-actor sliding-window admission control.
//!
//! Backends are trait-based so the same dispatcher code runs against a
//! single process or a shared Redis deployment.

pub mod error;
pub mod ratelimit;
pub mod scheduler;
pub mod session;
pub mod timer_meta;

pub use error::{StoreError, StoreResult};
pub use ratelimit::RateLimiter;
pub use scheduler::{
    FinishReason, ScheduledTimer, SchedulerConfig, SchedulerStore, TimerConfig, TimerHandler,
};
pub use session::memory::MemorySessionStore;
pub use session::redis::{redis_connect, RedisSessionStore};
pub use session::{SessionEntry, SessionStore};
pub use timer_meta::{LocalTimerMeta, RedisTimerMeta, TimerMetaStore};
