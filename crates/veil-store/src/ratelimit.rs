//! Per-actor sliding-window rate limiter.
//!
//! Purely in-memory and per-process: under a multi-instance deployment
//! each instance enforces only its local view. That is an accepted
//! trade-off for an admission check, not a correctness dependency;
//! losing the state merely resets the limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::instrument;
use veil_core::Clock;

/// Sliding-window admission control keyed by actor id.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<u64>>>>,
    clock: Arc<dyn Clock>,
    actions_max: u32,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, actions_max: u32, window_ms: u64) -> Self {
        assert!(actions_max > 0, "actions max must be positive");
        assert!(window_ms > 0, "window must be positive");

        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            clock,
            actions_max,
            window_ms,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<u64>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to admit one action for `actor_id`. Prunes timestamps older
    /// than the window; on admission the new timestamp is recorded, on
    /// rejection the record is left pruned but unmodified.
    #[instrument(skip(self), fields(actor_id = %actor_id))]
    pub fn consume(&self, actor_id: &str) -> bool {
        let now_ms = self.clock.now_ms();
        let mut map = self.lock();
        let window = map.entry(actor_id.to_string()).or_default();

        Self::prune(window, now_ms, self.window_ms);
        if window.len() < self.actions_max as usize {
            window.push_back(now_ms);
            true
        } else {
            false
        }
    }

    /// Seconds until the actor's oldest in-window action falls out of the
    /// window. `0` when the actor is not currently limited.
    pub fn retry_after_secs(&self, actor_id: &str) -> u64 {
        let now_ms = self.clock.now_ms();
        let mut map = self.lock();
        let Some(window) = map.get_mut(actor_id) else {
            return 0;
        };

        Self::prune(window, now_ms, self.window_ms);
        if window.len() < self.actions_max as usize {
            return 0;
        }
        match window.front() {
            // Round up so callers never retry a moment too early.
            Some(&oldest_ms) => {
                let expires_at_ms = oldest_ms + self.window_ms;
                expires_at_ms.saturating_sub(now_ms).div_ceil(1_000)
            }
            None => 0,
        }
    }

    fn prune(window: &mut VecDeque<u64>, now_ms: u64, window_ms: u64) {
        while let Some(&oldest_ms) = window.front() {
            if now_ms.saturating_sub(oldest_ms) >= window_ms {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::TestClock;

    fn limiter(actions_max: u32, window_ms: u64) -> (RateLimiter, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        (
            RateLimiter::new(clock.clone(), actions_max, window_ms),
            clock,
        )
    }

    #[test]
    fn admits_up_to_max_then_rejects_then_recovers() {
        let (limiter, clock) = limiter(2, 10_000);

        assert!(limiter.consume("actor-1"));
        assert!(limiter.consume("actor-1"));
        assert!(!limiter.consume("actor-1"));

        clock.advance_ms(10_000);
        assert!(limiter.consume("actor-1"));
    }

    #[test]
    fn actors_are_limited_independently() {
        let (limiter, _clock) = limiter(1, 10_000);

        assert!(limiter.consume("actor-1"));
        assert!(!limiter.consume("actor-1"));
        assert!(limiter.consume("actor-2"));
    }

    #[test]
    fn retry_after_tracks_oldest_in_window() {
        let (limiter, clock) = limiter(2, 10_000);

        assert!(limiter.consume("actor-1"));
        clock.advance_ms(4_000);
        assert!(limiter.consume("actor-1"));
        assert!(!limiter.consume("actor-1"));

        // Oldest action is 4s old in a 10s window: 6s to go.
        assert_eq!(limiter.retry_after_secs("actor-1"), 6);

        clock.advance_ms(6_000);
        assert_eq!(limiter.retry_after_secs("actor-1"), 0);
        assert!(limiter.consume("actor-1"));
    }

    #[test]
    fn rejection_leaves_window_unmodified() {
        let (limiter, clock) = limiter(1, 10_000);

        assert!(limiter.consume("actor-1"));
        // Rejected attempts must not extend the limited period.
        for _ in 0..5 {
            assert!(!limiter.consume("actor-1"));
        }
        clock.advance_ms(10_000);
        assert!(limiter.consume("actor-1"));
    }

    #[test]
    fn unknown_actor_is_not_limited() {
        let (limiter, _clock) = limiter(1, 10_000);
        assert_eq!(limiter.retry_after_secs("nobody"), 0);
    }
}
