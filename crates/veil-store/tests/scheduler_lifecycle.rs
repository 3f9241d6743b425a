//! Timer lifecycle: occurrence caps, lifetime caps, idempotent stop and
//! advisory stop markers.
//!
//! All tests run under paused tokio time, so a "minute" of interval
//! elapses instantly and deterministically.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::mpsc;
use veil_core::TestClock;
use veil_store::{
    FinishReason, LocalTimerMeta, ScheduledTimer, SchedulerConfig, SchedulerStore, TimerConfig,
    TimerHandler, TimerMetaStore,
};

const MINUTE_MS: u64 = 60_000;

struct RecordingHandler {
    ticks: StdMutex<Vec<u32>>,
    finishes: StdMutex<Vec<FinishReason>>,
    finished_tx: mpsc::UnboundedSender<FinishReason>,
    fail_ticks: bool,
}

impl RecordingHandler {
    fn new(fail_ticks: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<FinishReason>) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                ticks: StdMutex::new(Vec::new()),
                finishes: StdMutex::new(Vec::new()),
                finished_tx,
                fail_ticks,
            }),
            finished_rx,
        )
    }

    fn ticks(&self) -> Vec<u32> {
        self.ticks.lock().unwrap().clone()
    }

    fn finishes(&self) -> Vec<FinishReason> {
        self.finishes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimerHandler for RecordingHandler {
    async fn on_tick(&self, timer: &ScheduledTimer) -> veil_core::Result<()> {
        self.ticks.lock().unwrap().push(timer.occurrence_count);
        if self.fail_ticks {
            return Err(veil_core::Error::backend(
                "delivery",
                "channel is gone",
            ));
        }
        Ok(())
    }

    async fn on_finish(
        &self,
        _timer: &ScheduledTimer,
        reason: FinishReason,
    ) -> veil_core::Result<()> {
        self.finishes.lock().unwrap().push(reason);
        let _ = self.finished_tx.send(reason);
        Ok(())
    }
}

fn store_with(meta: Arc<dyn TimerMetaStore>, max_lifetime_ms: u64) -> SchedulerStore {
    SchedulerStore::new(
        SchedulerConfig {
            timers_per_scope_max: 5,
            max_lifetime_ms,
        },
        Arc::new(TestClock::new()),
        meta,
    )
}

fn config(name: &str, max_occurrences: Option<u32>) -> TimerConfig {
    TimerConfig {
        name: name.to_string(),
        scope_id: "scope-1".to_string(),
        owner_id: "owner-1".to_string(),
        interval_ms: MINUTE_MS,
        max_occurrences,
    }
}

#[tokio::test(start_paused = true)]
async fn bounded_timer_fires_exactly_then_finishes_once() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, mut finished_rx) = RecordingHandler::new(false);

    let timer = store
        .create(config("countdown", Some(3)), handler.clone())
        .await
        .unwrap();

    let reason = finished_rx.recv().await.unwrap();
    assert_eq!(reason, FinishReason::OccurrencesExhausted);
    assert_eq!(handler.ticks(), vec![1, 2, 3]);
    assert_eq!(handler.finishes(), vec![FinishReason::OccurrencesExhausted]);

    // Give the driver's cleanup a chance to run, then the timer is gone.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.get(timer.id).await.unwrap().is_none());
    assert_eq!(store.count_by_scope("scope-1").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn unbounded_timer_hits_lifetime_cap_at_or_before_fifth_tick() {
    // Lifetime of exactly five intervals.
    let store = store_with(Arc::new(LocalTimerMeta::new()), 5 * MINUTE_MS);
    let (handler, mut finished_rx) = RecordingHandler::new(false);

    store
        .create(config("heartbeat", None), handler.clone())
        .await
        .unwrap();

    let reason = finished_rx.recv().await.unwrap();
    assert_eq!(reason, FinishReason::LifetimeExceeded);

    let ticks = handler.ticks();
    assert!(ticks.len() <= 5, "fired past the lifetime cap: {:?}", ticks);
    assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
    assert_eq!(handler.finishes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn tick_delivery_failure_does_not_stop_the_timer() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, mut finished_rx) = RecordingHandler::new(true);

    store
        .create(config("flaky", Some(3)), handler.clone())
        .await
        .unwrap();

    // Every on_tick errors, yet the count advances and the timer
    // self-terminates normally.
    let reason = finished_rx.recv().await.unwrap();
    assert_eq!(reason, FinishReason::OccurrencesExhausted);
    assert_eq!(handler.ticks(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_never_double_finishes() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, _finished_rx) = RecordingHandler::new(false);

    let timer = store
        .create(config("stoppable", Some(100)), handler.clone())
        .await
        .unwrap();

    let first = store.stop(timer.id).await.unwrap();
    assert_eq!(first.map(|t| t.id), Some(timer.id));

    let second = store.stop(timer.id).await.unwrap();
    assert!(second.is_none(), "second stop must be a no-op");

    // An explicitly stopped timer fires no finish callback.
    tokio::time::sleep(Duration::from_millis(5 * MINUTE_MS)).await;
    assert!(handler.finishes().is_empty());
    assert!(store.get(timer.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_marker_halts_the_owning_driver_without_firing() {
    let meta: Arc<LocalTimerMeta> = Arc::new(LocalTimerMeta::new());
    let store = store_with(meta.clone(), 2 * 3_600_000);
    let (handler, _finished_rx) = RecordingHandler::new(false);

    let timer = store
        .create(config("remote-stopped", Some(100)), handler.clone())
        .await
        .unwrap();

    // Another instance would set this through its own SchedulerStore; we
    // write the marker directly to simulate it.
    meta.set_stop_marker(timer.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2 * MINUTE_MS)).await;
    assert!(handler.ticks().is_empty(), "driver fired past a stop marker");
    assert!(handler.finishes().is_empty());
    assert!(store.get(timer.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn scope_capacity_is_enforced_and_freed_on_stop() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, _finished_rx) = RecordingHandler::new(false);

    let mut ids = Vec::new();
    for i in 0..5 {
        let timer = store
            .create(config(&format!("timer-{}", i), Some(100)), handler.clone())
            .await
            .unwrap();
        ids.push(timer.id);
    }

    let err = store
        .create(config("one-too-many", Some(100)), handler.clone())
        .await;
    assert!(err.is_err(), "sixth timer in scope must be rejected");
    assert_eq!(store.count_by_scope("scope-1").await.unwrap(), 5);

    store.stop(ids[0]).await.unwrap();
    assert!(store
        .create(config("fits-now", Some(100)), handler.clone())
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn stop_all_in_scope_reports_count_and_spares_other_scopes() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, _finished_rx) = RecordingHandler::new(false);

    for i in 0..3 {
        store
            .create(config(&format!("a-{}", i), Some(100)), handler.clone())
            .await
            .unwrap();
    }
    let other = TimerConfig {
        scope_id: "scope-2".to_string(),
        ..config("b-0", Some(100))
    };
    store.create(other, handler.clone()).await.unwrap();

    assert_eq!(store.stop_all_in_scope("scope-1").await.unwrap(), 3);
    assert_eq!(store.count_by_scope("scope-1").await.unwrap(), 0);
    assert_eq!(store.count_by_scope("scope-2").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn occurrence_counts_are_monotonic_in_snapshots() {
    let store = store_with(Arc::new(LocalTimerMeta::new()), 2 * 3_600_000);
    let (handler, mut finished_rx) = RecordingHandler::new(false);

    store
        .create(config("monotonic", Some(5)), handler.clone())
        .await
        .unwrap();
    finished_rx.recv().await.unwrap();

    let ticks = handler.ticks();
    assert!(ticks.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", ticks);
}
