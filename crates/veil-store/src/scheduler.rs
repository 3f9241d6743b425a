//! Recurring-timer store.
//!
//! Each live timer owns a local interval driver in the process that
//! created it; drivers are never resumed on restart. Cross-instance
//! cancellation is advisory: a short-lived stop marker in the shared
//! metadata that the owning driver polls on each tick, so one extra tick
//! may fire before a remote stop is observed.
//!
//! Tick algorithm per firing: increment the occurrence count; if a stop
//! marker is set, halt without firing; else fire `on_tick`; then
//! terminate with `OccurrencesExhausted` when the cap is reached, or with
//! `LifetimeExceeded` when the *next* tick would overrun the lifetime cap
//! (forward-looking, so a timer never fires past its declared cap).
//! Handler failures are logged and never disturb the bookkeeping.

use crate::error::{StoreError, StoreResult};
use crate::timer_meta::TimerMetaStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};
use veil_core::{
    Clock, TIMERS_PER_SCOPE_MAX_DEFAULT, TIMER_INTERVAL_MINUTES_MAX, TIMER_INTERVAL_MINUTES_MIN,
    TIMER_LIFETIME_HOURS_DEFAULT, TIMER_NAME_LENGTH_BYTES_MAX, TIMER_OCCURRENCES_MAX,
    TIMER_OCCURRENCES_MIN,
};

/// Why a timer self-terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The occurrence cap was reached.
    OccurrencesExhausted,
    /// The next tick would overrun the lifetime cap.
    LifetimeExceeded,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::OccurrencesExhausted => "occurrences-exhausted",
            FinishReason::LifetimeExceeded => "lifetime-exceeded",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested timer parameters, validated before admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub name: String,
    pub scope_id: String,
    pub owner_id: String,
    /// Interval between firings in milliseconds.
    pub interval_ms: u64,
    /// Occurrence cap; `None` means unbounded (the lifetime cap still
    /// applies).
    pub max_occurrences: Option<u32>,
}

/// A live (or recorded) recurring timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTimer {
    /// Monotonically assigned, deployment-scoped id.
    pub id: u64,
    pub name: String,
    pub scope_id: String,
    pub owner_id: String,
    pub interval_ms: u64,
    pub max_occurrences: Option<u32>,
    /// Number of times the timer has fired. Only increases.
    pub occurrence_count: u32,
    pub started_at_ms: u64,
    /// Hard cap even when `max_occurrences` is `None`.
    pub max_lifetime_ms: u64,
}

impl ScheduledTimer {
    /// Whether a further tick is permitted. Elapsed time is derived from
    /// the tick schedule (count x interval), which keeps the check
    /// deterministic and forward-looking.
    pub fn next_tick_allowed(&self) -> bool {
        if let Some(max) = self.max_occurrences {
            if self.occurrence_count >= max {
                return false;
            }
        }
        let elapsed_ms = self.occurrence_count as u64 * self.interval_ms;
        elapsed_ms + self.interval_ms <= self.max_lifetime_ms
    }

    /// The termination reason once `next_tick_allowed` is false.
    fn finish_reason(&self) -> FinishReason {
        match self.max_occurrences {
            Some(max) if self.occurrence_count >= max => FinishReason::OccurrencesExhausted,
            _ => FinishReason::LifetimeExceeded,
        }
    }
}

/// Callbacks fired by a timer's local driver.
#[async_trait]
pub trait TimerHandler: Send + Sync {
    /// Fired on each occurrence. Errors are logged by the driver and do
    /// not stop the timer or corrupt its occurrence count.
    async fn on_tick(&self, timer: &ScheduledTimer) -> veil_core::Result<()>;

    /// Fired exactly once when the timer self-terminates. Not fired on
    /// explicit stop.
    async fn on_finish(&self, timer: &ScheduledTimer, reason: FinishReason)
        -> veil_core::Result<()>;
}

/// Scheduler admission limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum live timers per scope.
    pub timers_per_scope_max: usize,
    /// Hard lifetime cap applied to every timer, in milliseconds.
    pub max_lifetime_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timers_per_scope_max: TIMERS_PER_SCOPE_MAX_DEFAULT,
            max_lifetime_ms: TIMER_LIFETIME_HOURS_DEFAULT * 3_600_000,
        }
    }
}

/// A locally executing timer: shared snapshot state plus the stop signal
/// for its driver task.
struct LocalDriver {
    timer: Arc<Mutex<ScheduledTimer>>,
    stop_tx: watch::Sender<bool>,
}

/// Manages recurring timers: local drivers plus shared metadata.
#[derive(Clone)]
pub struct SchedulerStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    meta: Arc<dyn TimerMetaStore>,
    local: Mutex<HashMap<u64, LocalDriver>>,
}

impl SchedulerStore {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        meta: Arc<dyn TimerMetaStore>,
    ) -> Self {
        assert!(config.timers_per_scope_max > 0, "scope cap must be positive");
        assert!(config.max_lifetime_ms > 0, "lifetime cap must be positive");

        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                meta,
                local: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Check a config against name/interval/occurrence bounds and the
    /// current live count in its scope. Every rejection carries a
    /// human-actionable reason.
    pub async fn validate(&self, config: &TimerConfig) -> StoreResult<()> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation {
                field: "name".to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        if name.len() > TIMER_NAME_LENGTH_BYTES_MAX {
            return Err(StoreError::Validation {
                field: "name".to_string(),
                reason: format!("name longer than {} bytes", TIMER_NAME_LENGTH_BYTES_MAX),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
        {
            return Err(StoreError::Validation {
                field: "name".to_string(),
                reason: "name may only contain letters, digits, spaces, '-' and '_'".to_string(),
            });
        }

        let interval_minutes = config.interval_ms / 60_000;
        if config.interval_ms % 60_000 != 0
            || !(TIMER_INTERVAL_MINUTES_MIN..=TIMER_INTERVAL_MINUTES_MAX)
                .contains(&interval_minutes)
        {
            return Err(StoreError::Validation {
                field: "interval".to_string(),
                reason: format!(
                    "interval must be whole minutes within [{}, {}]",
                    TIMER_INTERVAL_MINUTES_MIN, TIMER_INTERVAL_MINUTES_MAX
                ),
            });
        }
        if config.interval_ms > self.inner.config.max_lifetime_ms {
            return Err(StoreError::Validation {
                field: "interval".to_string(),
                reason: "interval exceeds the lifetime cap; the timer would never fire"
                    .to_string(),
            });
        }

        if let Some(occurrences) = config.max_occurrences {
            if !(TIMER_OCCURRENCES_MIN..=TIMER_OCCURRENCES_MAX).contains(&occurrences) {
                return Err(StoreError::Validation {
                    field: "occurrences".to_string(),
                    reason: format!(
                        "occurrences must be within [{}, {}]",
                        TIMER_OCCURRENCES_MIN, TIMER_OCCURRENCES_MAX
                    ),
                });
            }
        }

        let live = self.count_by_scope(&config.scope_id).await?;
        if live >= self.inner.config.timers_per_scope_max {
            return Err(StoreError::LimitExceeded {
                resource: "timers per scope",
                limit: self.inner.config.timers_per_scope_max,
            });
        }
        Ok(())
    }

    /// Validate, assign an id, record metadata and start the local driver.
    #[instrument(skip(self, config, handler), fields(scope_id = %config.scope_id, name = %config.name))]
    pub async fn create(
        &self,
        config: TimerConfig,
        handler: Arc<dyn TimerHandler>,
    ) -> StoreResult<ScheduledTimer> {
        self.validate(&config).await?;

        let id = self.inner.meta.next_id().await?;
        let timer = ScheduledTimer {
            id,
            name: config.name.trim().to_string(),
            scope_id: config.scope_id,
            owner_id: config.owner_id,
            interval_ms: config.interval_ms,
            max_occurrences: config.max_occurrences,
            occurrence_count: 0,
            started_at_ms: self.inner.clock.now_ms(),
            max_lifetime_ms: self.inner.config.max_lifetime_ms,
        };
        self.inner.meta.put(&timer).await?;

        let shared = Arc::new(Mutex::new(timer.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);
        {
            let mut local = self.inner.local.lock().await;
            local.insert(
                id,
                LocalDriver {
                    timer: Arc::clone(&shared),
                    stop_tx,
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_driver(inner, shared, handler, stop_rx));

        info!(timer_id = id, interval_ms = timer.interval_ms, "timer started");
        Ok(timer)
    }

    /// Halt a timer. Idempotent: stopping an already-stopped timer
    /// returns `None` and is not an error.
    ///
    /// A timer created by another process gets an advisory stop marker
    /// instead; its own driver observes the marker on its next tick, so
    /// at most one further tick may fire before it halts.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: u64) -> StoreResult<Option<ScheduledTimer>> {
        let driver = {
            let mut local = self.inner.local.lock().await;
            local.remove(&id)
        };

        if let Some(driver) = driver {
            // The driver exits at its next select point; no finish
            // callback fires for an explicit stop.
            let _ = driver.stop_tx.send(true);
            let snapshot = driver.timer.lock().await.clone();
            self.inner.meta.remove(id, &snapshot.scope_id).await?;
            info!(timer_id = id, "timer stopped locally");
            return Ok(Some(snapshot));
        }

        match self.inner.meta.get(id).await? {
            Some(timer) => {
                self.inner.meta.set_stop_marker(id).await?;
                info!(timer_id = id, "stop marker set for remote timer");
                Ok(Some(timer))
            }
            None => Ok(None),
        }
    }

    /// Stop every live timer in a scope. Returns how many were stopped.
    #[instrument(skip(self))]
    pub async fn stop_all_in_scope(&self, scope_id: &str) -> StoreResult<usize> {
        let timers = self.list_by_scope(scope_id).await?;
        let mut stopped = 0;
        for timer in timers {
            if self.stop(timer.id).await?.is_some() {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Graceful shutdown: halt every locally executing driver. Remote
    /// timers are left to their owning processes.
    pub async fn stop_all(&self) {
        let drivers: Vec<(u64, LocalDriver)> = {
            let mut local = self.inner.local.lock().await;
            local.drain().collect()
        };
        for (id, driver) in drivers {
            let _ = driver.stop_tx.send(true);
            let snapshot = driver.timer.lock().await.clone();
            if let Err(err) = self.inner.meta.remove(id, &snapshot.scope_id).await {
                warn!(timer_id = id, error = %err, "failed to remove timer metadata on shutdown");
            }
        }
    }

    /// Fetch a timer: live local state first, shared metadata second.
    pub async fn get(&self, id: u64) -> StoreResult<Option<ScheduledTimer>> {
        {
            let local = self.inner.local.lock().await;
            if let Some(driver) = local.get(&id) {
                return Ok(Some(driver.timer.lock().await.clone()));
            }
        }
        self.inner.meta.get(id).await
    }

    /// All live timers in a scope, with local snapshots taking precedence
    /// over possibly stale shared metadata.
    pub async fn list_by_scope(&self, scope_id: &str) -> StoreResult<Vec<ScheduledTimer>> {
        let mut timers = self.inner.meta.list_by_scope(scope_id).await?;
        let local = self.inner.local.lock().await;
        for timer in timers.iter_mut() {
            if let Some(driver) = local.get(&timer.id) {
                *timer = driver.timer.lock().await.clone();
            }
        }
        Ok(timers)
    }

    /// Number of live timers in a scope.
    pub async fn count_by_scope(&self, scope_id: &str) -> StoreResult<usize> {
        Ok(self.list_by_scope(scope_id).await?.len())
    }
}

/// The per-timer driver task.
async fn run_driver(
    inner: Arc<Inner>,
    shared: Arc<Mutex<ScheduledTimer>>,
    handler: Arc<dyn TimerHandler>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let (id, scope_id, interval_ms) = {
        let timer = shared.lock().await;
        (timer.id, timer.scope_id.clone(), timer.interval_ms)
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // An interval yields immediately on its first tick; consume it so the
    // first firing lands one full interval after creation.
    ticker.tick().await;

    let finish: Option<FinishReason> = loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // Explicit local stop (or store dropped). No finish callback.
                let _ = changed;
                break None;
            }
            _ = ticker.tick() => {}
        }

        let snapshot = {
            let mut timer = shared.lock().await;
            timer.occurrence_count += 1;
            timer.clone()
        };

        // Advisory cross-instance stop: halt without firing. The count
        // was already advanced; the record is removed below either way.
        match inner.meta.stop_marker_set(id).await {
            Ok(true) => {
                debug!(timer_id = id, "stop marker observed, halting");
                break None;
            }
            Ok(false) => {}
            Err(err) => {
                // Metadata unreachable: keep ticking, the marker will be
                // seen once the backend recovers.
                warn!(timer_id = id, error = %err, "stop marker check failed");
            }
        }

        if let Err(err) = handler.on_tick(&snapshot).await {
            warn!(
                timer_id = id,
                occurrence = snapshot.occurrence_count,
                error = %err,
                "tick delivery failed"
            );
        }

        if let Err(err) = inner.meta.put(&snapshot).await {
            warn!(timer_id = id, error = %err, "timer metadata refresh failed");
        }

        if !snapshot.next_tick_allowed() {
            break Some(snapshot.finish_reason());
        }
    };

    // Driver-owned cleanup. `remove` is idempotent, so racing an explicit
    // stop is harmless.
    {
        let mut local = inner.local.lock().await;
        local.remove(&id);
    }
    if let Err(err) = inner.meta.remove(id, &scope_id).await {
        warn!(timer_id = id, error = %err, "failed to remove timer metadata");
    }

    if let Some(reason) = finish {
        let snapshot = shared.lock().await.clone();
        info!(timer_id = id, reason = %reason, occurrences = snapshot.occurrence_count, "timer finished");
        if let Err(err) = handler.on_finish(&snapshot, reason).await {
            warn!(timer_id = id, error = %err, "finish delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer_meta::LocalTimerMeta;
    use veil_core::TestClock;

    fn store() -> SchedulerStore {
        SchedulerStore::new(
            SchedulerConfig::default(),
            Arc::new(TestClock::new()),
            Arc::new(LocalTimerMeta::new()),
        )
    }

    fn config(name: &str, interval_ms: u64, max_occurrences: Option<u32>) -> TimerConfig {
        TimerConfig {
            name: name.to_string(),
            scope_id: "scope-1".to_string(),
            owner_id: "owner-1".to_string(),
            interval_ms,
            max_occurrences,
        }
    }

    #[tokio::test]
    async fn validate_rejects_bad_names() {
        let store = store();
        for name in ["", "   ", "bad!name", &"x".repeat(65)] {
            let err = store.validate(&config(name, 60_000, Some(3))).await;
            assert!(
                matches!(err, Err(StoreError::Validation { ref field, .. }) if field == "name"),
                "expected name rejection for {:?}",
                name
            );
        }
        assert!(store.validate(&config("daily stand-up_2", 60_000, Some(3))).await.is_ok());
    }

    #[tokio::test]
    async fn validate_enforces_interval_bounds() {
        let store = store();
        // 30 seconds: below the 1 minute floor.
        assert!(store.validate(&config("t", 30_000, None)).await.is_err());
        // 481 minutes: above the ceiling.
        assert!(store.validate(&config("t", 481 * 60_000, None)).await.is_err());
        // Not whole minutes.
        assert!(store.validate(&config("t", 90_000, None)).await.is_err());
        // 120 minutes with the default 2h lifetime cap: exactly fits.
        assert!(store.validate(&config("t", 120 * 60_000, None)).await.is_ok());
        // 121 minutes could never fire within the 2h cap.
        assert!(store.validate(&config("t", 121 * 60_000, None)).await.is_err());
    }

    #[tokio::test]
    async fn validate_enforces_occurrence_bounds() {
        let store = store();
        assert!(store.validate(&config("t", 60_000, Some(0))).await.is_err());
        assert!(store.validate(&config("t", 60_000, Some(101))).await.is_err());
        assert!(store.validate(&config("t", 60_000, Some(100))).await.is_ok());
        assert!(store.validate(&config("t", 60_000, None)).await.is_ok());
    }

    #[test]
    fn forward_looking_lifetime_check_never_overruns() {
        let mut timer = ScheduledTimer {
            id: 1,
            name: "t".to_string(),
            scope_id: "s".to_string(),
            owner_id: "o".to_string(),
            interval_ms: 60_000,
            max_occurrences: None,
            occurrence_count: 0,
            started_at_ms: 0,
            max_lifetime_ms: 5 * 60_000,
        };
        // Ticks 1..=5 are allowed, the 6th is not.
        for fired in 0..5 {
            timer.occurrence_count = fired;
            assert!(timer.next_tick_allowed(), "tick {} should be allowed", fired + 1);
        }
        timer.occurrence_count = 5;
        assert!(!timer.next_tick_allowed());
        assert_eq!(timer.finish_reason(), FinishReason::LifetimeExceeded);
    }

    #[test]
    fn occurrence_cap_takes_priority_in_reason() {
        let timer = ScheduledTimer {
            id: 1,
            name: "t".to_string(),
            scope_id: "s".to_string(),
            owner_id: "o".to_string(),
            interval_ms: 60_000,
            max_occurrences: Some(3),
            occurrence_count: 3,
            started_at_ms: 0,
            max_lifetime_ms: 7_200_000,
        };
        assert!(!timer.next_tick_allowed());
        assert_eq!(timer.finish_reason(), FinishReason::OccurrencesExhausted);
    }

    #[test]
    fn finish_reason_serializes_kebab_case() {
        assert_eq!(FinishReason::OccurrencesExhausted.as_str(), "occurrences-exhausted");
        assert_eq!(
            serde_json::to_string(&FinishReason::LifetimeExceeded).unwrap(),
            "\"lifetime-exceeded\""
        );
    }
}
