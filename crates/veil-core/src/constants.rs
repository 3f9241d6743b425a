//! Explicit limits and defaults.
//!
//! Every constant carries its unit in the name. Nothing here is tunable at
//! runtime unless `config.rs` exposes it.

/// Default time-to-live for a hidden session, in seconds.
pub const SESSION_TTL_SECONDS_DEFAULT: u64 = 600;

/// Interval between background sweeps of the in-memory session store,
/// in seconds. Correctness never depends on the sweep; reads self-check
/// freshness.
pub const SESSION_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Minimum timer interval, in minutes.
pub const TIMER_INTERVAL_MINUTES_MIN: u64 = 1;

/// Maximum timer interval, in minutes.
pub const TIMER_INTERVAL_MINUTES_MAX: u64 = 480;

/// Minimum occurrence cap for a bounded timer.
pub const TIMER_OCCURRENCES_MIN: u32 = 1;

/// Maximum occurrence cap for a bounded timer.
pub const TIMER_OCCURRENCES_MAX: u32 = 100;

/// Maximum live timers per scope.
pub const TIMERS_PER_SCOPE_MAX_DEFAULT: usize = 5;

/// Default hard lifetime cap for a timer, in hours. Applies even to
/// timers with no occurrence cap.
pub const TIMER_LIFETIME_HOURS_DEFAULT: u64 = 2;

/// Minimum configurable timer lifetime cap, in hours.
pub const TIMER_LIFETIME_HOURS_MIN: u64 = 1;

/// Maximum configurable timer lifetime cap, in hours.
pub const TIMER_LIFETIME_HOURS_MAX: u64 = 24;

/// Maximum timer name length in bytes.
pub const TIMER_NAME_LENGTH_BYTES_MAX: usize = 64;

/// Expiry of a cross-instance stop marker, in seconds. Long enough for
/// the owning driver to observe it on its next tick, short enough not to
/// shadow a future timer reusing the id space.
pub const TIMER_STOP_MARKER_TTL_SECONDS: u64 = 60;

/// Default rate limit: maximum actions per actor per window.
pub const RATE_LIMIT_ACTIONS_MAX_DEFAULT: u32 = 5;

/// Default rate limit window, in seconds.
pub const RATE_LIMIT_WINDOW_SECONDS_DEFAULT: u64 = 10;

/// Platform acknowledgment deadline, in milliseconds. Imposed by the
/// calling platform, not tunable. The dispatcher must emit its
/// acknowledgment before any blocking work to satisfy this structurally.
pub const ACK_DEADLINE_MS: u64 = 3_000;

/// Default key prefix for the shared backend, so independent deployments
/// can share one server without collision.
pub const KEY_PREFIX_DEFAULT: &str = "veil";

/// Maximum opaque payload size in bytes for a session entry.
pub const SESSION_PAYLOAD_BYTES_MAX: usize = 65_536;
