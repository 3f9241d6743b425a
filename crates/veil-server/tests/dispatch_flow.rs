//! End-to-end dispatch flows over in-memory stores and a recording
//! delivery client: commit then disclose, authorization, expiry, rate
//! limiting and the timer commands.

use std::sync::Arc;
use veil_core::{Clock, TestClock};
use veil_server::context::DeliveryContext;
use veil_server::delivery::{Delivered, RecordingDelivery};
use veil_server::{Action, Command, Dispatcher, EchoPayload, Interaction};
use veil_store::{
    LocalTimerMeta, MemorySessionStore, RateLimiter, SchedulerConfig, SchedulerStore,
};

const SESSION_TTL_MS: u64 = 600_000;

struct Harness {
    dispatcher: Dispatcher,
    delivery: Arc<RecordingDelivery>,
    clock: Arc<TestClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_rate_limit(100)
    }

    fn with_rate_limit(actions_max: u32) -> Self {
        let clock = Arc::new(TestClock::new());
        let shared: Arc<dyn Clock> = clock.clone();
        let delivery = Arc::new(RecordingDelivery::new());
        let sessions = Arc::new(MemorySessionStore::without_sweep(
            Arc::clone(&shared),
            SESSION_TTL_MS,
        ));
        let scheduler = SchedulerStore::new(
            SchedulerConfig::default(),
            Arc::clone(&shared),
            Arc::new(LocalTimerMeta::new()),
        );
        let limiter = RateLimiter::new(Arc::clone(&shared), actions_max, 10_000);
        let dispatcher = Dispatcher::new(
            sessions,
            scheduler,
            limiter,
            Arc::new(EchoPayload),
            delivery.clone(),
            shared,
            SESSION_TTL_MS,
        );
        Self {
            dispatcher,
            delivery,
            clock,
        }
    }

    fn ctx(&self, actor_id: &str, scope_id: &str) -> DeliveryContext {
        DeliveryContext::new(
            self.delivery.clone(),
            format!("tok-{}", actor_id),
            actor_id,
            scope_id,
        )
    }

    async fn run(&self, actor_id: &str, scope_id: &str, action: Action) {
        let interaction = Interaction {
            id: "req".to_string(),
            token: format!("tok-{}", actor_id),
            actor_id: actor_id.to_string(),
            scope_id: scope_id.to_string(),
            action,
        };
        let ctx = self.ctx(actor_id, scope_id);
        self.dispatcher.process(&interaction, &ctx).await;
    }

    async fn commit(&self, actor_id: &str, scope_id: &str, input: &str) -> String {
        let calls_before = self.delivery.calls().len();
        self.run(
            actor_id,
            scope_id,
            Action::Command(Command::Commit {
                input: input.to_string(),
                hidden: false,
            }),
        )
        .await;
        // The placeholder is the first new published message; its text
        // carries the disclosure control id.
        let calls = self.delivery.calls();
        let Some(Delivered::Published { text, .. }) = calls.get(calls_before) else {
            panic!("commit did not publish a placeholder: {:?}", calls);
        };
        let start = text.find("[disclose:").expect("no disclose control") + "[disclose:".len();
        let end = text[start..].find(']').unwrap() + start;
        text[start..end].to_string()
    }

    async fn disclose(&self, actor_id: &str, scope_id: &str, session_id: &str) {
        self.run(
            actor_id,
            scope_id,
            Action::Disclose {
                session_id: session_id.to_string(),
            },
        )
        .await;
    }

    fn last_call(&self) -> Delivered {
        self.delivery.calls().last().expect("no calls").clone()
    }
}

#[tokio::test]
async fn commit_then_disclose_edits_the_placeholder() {
    let h = Harness::new();

    let session_id = h.commit("alice", "scope-1", "2d6+1").await;
    // Commit reports back through the deferred reply.
    assert!(matches!(
        h.last_call(),
        Delivered::OriginalEdited { text, .. } if text.starts_with("Committed.")
    ));

    h.disclose("alice", "scope-1", &session_id).await;
    match h.last_call() {
        Delivered::Edited {
            scope_id,
            message_id,
            text,
        } => {
            assert_eq!(scope_id, "scope-1");
            assert_eq!(message_id, "msg-1");
            assert_eq!(text, "Disclosed: 2d6+1");
        }
        other => panic!("expected placeholder edit, got {:?}", other),
    }
}

#[tokio::test]
async fn second_disclosure_loses() {
    let h = Harness::new();
    let session_id = h.commit("alice", "scope-1", "secret").await;

    h.disclose("alice", "scope-1", &session_id).await;
    h.disclose("alice", "scope-1", &session_id).await;

    match h.last_call() {
        Delivered::FollowUp { text, private, .. } => {
            assert!(private);
            assert!(
                text.contains("expired") || text.contains("already"),
                "unexpected wording: {}",
                text
            );
        }
        other => panic!("expected a private follow-up, got {:?}", other),
    }
    // Exactly one placeholder edit ever happened.
    let edits = h
        .delivery
        .calls()
        .iter()
        .filter(|c| matches!(c, Delivered::Edited { .. }))
        .count();
    assert_eq!(edits, 1);
}

#[tokio::test]
async fn wrong_actor_cannot_disclose_and_does_not_consume_the_claim() {
    let h = Harness::new();
    let session_id = h.commit("alice", "scope-1", "secret").await;

    h.disclose("mallory", "scope-1", &session_id).await;
    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text == "You are not permitted to do that."
    ));

    // Same wording for a cross-scope attempt by the owner.
    h.disclose("alice", "scope-2", &session_id).await;
    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, .. } if text == "You are not permitted to do that."
    ));

    // The rightful owner still holds the claim.
    h.disclose("alice", "scope-1", &session_id).await;
    assert!(matches!(
        h.last_call(),
        Delivered::Edited { text, .. } if text == "Disclosed: secret"
    ));
}

#[tokio::test]
async fn expired_session_reads_as_never_existed() {
    let h = Harness::new();
    let session_id = h.commit("alice", "scope-1", "secret").await;

    h.clock.advance_ms(SESSION_TTL_MS);
    h.disclose("alice", "scope-1", &session_id).await;

    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text == "Nothing to act on. It may have expired or already been used."
    ));
}

#[tokio::test]
async fn deleted_placeholder_falls_back_to_a_fresh_message() {
    let h = Harness::new();
    let session_id = h.commit("alice", "scope-1", "secret").await;

    h.delivery.mark_gone("msg-1");
    h.disclose("alice", "scope-1", &session_id).await;

    assert!(matches!(
        h.last_call(),
        Delivered::Published { text, .. } if text == "Disclosed: secret"
    ));
}

#[tokio::test]
async fn rate_limited_actor_gets_a_private_notice_and_no_processing() {
    let h = Harness::with_rate_limit(2);

    let session_id = h.commit("alice", "scope-1", "one").await;
    h.commit("alice", "scope-1", "two").await;

    // Third action in the window: rejected before the claim is touched.
    h.disclose("alice", "scope-1", &session_id).await;
    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text.contains("too often")
    ));

    // A different actor is unaffected.
    h.commit("bob", "scope-1", "three").await;

    // Once the window passes, the claim is still intact.
    h.clock.advance_ms(10_000);
    h.disclose("alice", "scope-1", &session_id).await;
    assert!(matches!(
        h.last_call(),
        Delivered::Edited { text, .. } if text == "Disclosed: one"
    ));
}

#[tokio::test]
async fn empty_commit_input_is_rejected_with_the_reason() {
    let h = Harness::new();
    h.run(
        "alice",
        "scope-1",
        Action::Command(Command::Commit {
            input: "   ".to_string(),
            hidden: false,
        }),
    )
    .await;

    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text == "input must not be empty"
    ));
}

#[tokio::test(start_paused = true)]
async fn timer_commands_start_list_and_stop() {
    let h = Harness::new();

    h.run(
        "alice",
        "scope-1",
        Action::Command(Command::TimerStart {
            name: "standup".to_string(),
            interval_minutes: 1,
            occurrences: Some(2),
        }),
    )
    .await;
    let Delivered::OriginalEdited { text, .. } = h.last_call() else {
        panic!("expected timer-start confirmation");
    };
    assert!(text.contains("'standup' started"), "got: {}", text);

    h.run("bob", "scope-1", Action::Command(Command::TimerList)).await;
    let Delivered::OriginalEdited { text, .. } = h.last_call() else {
        panic!("expected timer list");
    };
    assert!(text.contains("'standup'"), "got: {}", text);

    // One tick fires into the scope.
    tokio::time::sleep(std::time::Duration::from_millis(61_000)).await;
    assert!(h.delivery.calls().iter().any(|c| matches!(
        c,
        Delivered::Published { text, .. } if text.contains("Reminder: standup (1/2)")
    )));

    // Extract the id from the listing ("#N 'name' ...").
    let id: u64 = text
        .split('#')
        .nth(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .expect("listing carries the timer id");

    h.run(
        "bob",
        "scope-1",
        Action::Command(Command::TimerStop { id }),
    )
    .await;
    let Delivered::OriginalEdited { text, .. } = h.last_call() else {
        panic!("expected timer-stop confirmation");
    };
    assert!(text.contains("stopped") || text.contains("finished"), "got: {}", text);

    h.run("alice", "scope-1", Action::Command(Command::TimerList)).await;
    let Delivered::OriginalEdited { text, .. } = h.last_call() else {
        panic!("expected timer list");
    };
    assert_eq!(text, "No timers running in this scope.");
}

#[tokio::test]
async fn timer_stop_is_scope_bound() {
    let h = Harness::new();

    h.run(
        "alice",
        "scope-1",
        Action::Command(Command::TimerStart {
            name: "mine".to_string(),
            interval_minutes: 5,
            occurrences: None,
        }),
    )
    .await;

    // Stopping from another scope is refused without leaking existence.
    h.run("eve", "scope-2", Action::Command(Command::TimerStop { id: 1 })).await;
    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text == "You are not permitted to do that."
    ));

    // Stopping a timer that never existed reads the same as expired.
    h.run("alice", "scope-1", Action::Command(Command::TimerStop { id: 99 })).await;
    assert!(matches!(
        h.last_call(),
        Delivered::FollowUp { text, private: true, .. }
            if text == "Nothing to act on. It may have expired or already been used."
    ));
}

#[tokio::test]
async fn probe_produces_no_outbound_traffic() {
    let h = Harness::new();
    h.run("", "", Action::Probe).await;
    assert!(h.delivery.calls().is_empty());
}
