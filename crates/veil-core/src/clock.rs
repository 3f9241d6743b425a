//! Clock abstraction.
//!
//! All code that needs the current time goes through `Clock`. Business
//! logic never calls `SystemTime::now()` directly; tests inject a
//! manually-advanced clock so TTL and rate-window behavior is exercised
//! without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source. Implementations must be cheap to call; `now_ms` sits on
/// every store read.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl WallClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for WallClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually-advanced clock for tests.
///
/// Starts at a fixed non-zero instant so subtraction underflows surface
/// as test failures rather than wrapping.
#[derive(Debug, Default)]
pub struct TestClock {
    now_ms: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now_ms: AtomicU64::new(1_000_000),
        }
    }

    pub fn at(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let clock = TestClock::new();
        let start = clock.now_ms();
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), start + 250);
    }

    #[test]
    fn wall_clock_returns_nonzero() {
        assert!(WallClock::new().now_ms() > 0);
    }
}
