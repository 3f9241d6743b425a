//! The interaction dispatcher.
//!
//! Runs strictly after the transport has acknowledged: rate limiting
//! first, then domain logic against the stores, then outbound delivery.
//! Errors are resolved to user-facing wording here and never propagate
//! past this boundary; `StaleRequest` (the platform already gave up) is
//! logged and swallowed, never retried.

use crate::context::InteractionContext;
use crate::delivery::DeliveryClient;
use crate::model::{Action, Command, Interaction, DISCLOSE_PREFIX};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use veil_core::{Clock, Error};
use veil_store::{
    FinishReason, RateLimiter, ScheduledTimer, SchedulerStore, SessionEntry, SessionStore,
    TimerConfig, TimerHandler,
};

// =============================================================================
// Payload collaborator
// =============================================================================

/// Result of committing an action: the frozen opaque payload plus the
/// public placeholder line shown until disclosure.
pub struct CommitOutcome {
    pub payload: Vec<u8>,
    pub placeholder: String,
}

/// The domain payload collaborator. The dispatcher never inspects the
/// payload bytes; it stores what `commit` returns and shows what
/// `render` produces.
pub trait PayloadSource: Send + Sync {
    /// Build the hidden payload from the actor's input. Validation
    /// failures are reported to the actor verbatim.
    fn commit(&self, input: &str) -> veil_core::Result<CommitOutcome>;

    /// Render the disclosure text for a committed payload.
    fn render(&self, payload: &[u8]) -> String;
}

/// Pass-through payload source: stores the input, reveals it unchanged.
/// Stands in wherever the real domain grammar is supplied externally.
#[derive(Debug, Default, Clone)]
pub struct EchoPayload;

impl PayloadSource for EchoPayload {
    fn commit(&self, input: &str) -> veil_core::Result<CommitOutcome> {
        if input.trim().is_empty() {
            return Err(Error::validation("input", "input must not be empty"));
        }
        Ok(CommitOutcome {
            payload: input.as_bytes().to_vec(),
            placeholder: "A hidden action was committed.".to_string(),
        })
    }

    fn render(&self, payload: &[u8]) -> String {
        format!("Disclosed: {}", String::from_utf8_lossy(payload))
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Transport-agnostic request processor. Constructed once at startup and
/// shared by every transport; all collaborators are injected explicitly.
pub struct Dispatcher {
    sessions: Arc<dyn SessionStore>,
    scheduler: SchedulerStore,
    limiter: RateLimiter,
    payload: Arc<dyn PayloadSource>,
    delivery: Arc<dyn DeliveryClient>,
    clock: Arc<dyn Clock>,
    session_ttl_ms: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        scheduler: SchedulerStore,
        limiter: RateLimiter,
        payload: Arc<dyn PayloadSource>,
        delivery: Arc<dyn DeliveryClient>,
        clock: Arc<dyn Clock>,
        session_ttl_ms: u64,
    ) -> Self {
        assert!(session_ttl_ms > 0, "session ttl must be positive");
        Self {
            sessions,
            scheduler,
            limiter,
            payload,
            delivery,
            clock,
            session_ttl_ms,
        }
    }

    /// The scheduler, exposed for graceful shutdown.
    pub fn scheduler(&self) -> &SchedulerStore {
        &self.scheduler
    }

    /// Process a fully parsed request. The acknowledgment has already
    /// been sent by the transport; nothing here is deadline-bound.
    #[instrument(skip(self, interaction, ctx), fields(request_id = %interaction.id, actor_id = %interaction.actor_id, scope_id = %interaction.scope_id))]
    pub async fn process(&self, interaction: &Interaction, ctx: &dyn InteractionContext) {
        if matches!(interaction.action, Action::Probe) {
            // The pong acknowledgment was the whole response.
            return;
        }

        if !self.limiter.consume(&interaction.actor_id) {
            let retry_secs = self.limiter.retry_after_secs(&interaction.actor_id);
            let text = format!(
                "You are doing that too often. Try again in {} second{}.",
                retry_secs,
                if retry_secs == 1 { "" } else { "s" }
            );
            // Already decided private: rate-limit notices never go public.
            self.deliver_or_log(ctx.follow_up(&text, true).await, "rate limit notice");
            return;
        }

        let result = match &interaction.action {
            Action::Probe => Ok(()),
            Action::Command(Command::Commit { input, hidden }) => {
                self.handle_commit(interaction, ctx, input, *hidden).await
            }
            Action::Disclose { session_id } => {
                self.handle_disclose(interaction, ctx, session_id).await
            }
            Action::Command(Command::TimerStart {
                name,
                interval_minutes,
                occurrences,
            }) => {
                self.handle_timer_start(interaction, ctx, name, *interval_minutes, *occurrences)
                    .await
            }
            Action::Command(Command::TimerStop { id }) => {
                self.handle_timer_stop(interaction, ctx, *id).await
            }
            Action::Command(Command::TimerList) => self.handle_timer_list(ctx).await,
        };

        if let Err(err) = result {
            if err.is_stale() {
                warn!(error = %err, "platform gave up on this request, dropping reply");
                return;
            }
            // Resolve to user wording at the boundary; a failed error
            // notice is itself only logged.
            self.deliver_or_log(ctx.follow_up(&err.user_message(), true).await, "error notice");
        }
    }

    fn deliver_or_log(&self, result: veil_core::Result<()>, what: &str) {
        if let Err(err) = result {
            warn!(error = %err, "failed to deliver {}", what);
        }
    }

    // =========================================================================
    // Commit / disclose
    // =========================================================================

    async fn handle_commit(
        &self,
        interaction: &Interaction,
        ctx: &dyn InteractionContext,
        input: &str,
        _hidden: bool,
    ) -> veil_core::Result<()> {
        let outcome = self.payload.commit(input)?;
        if outcome.payload.len() > veil_core::SESSION_PAYLOAD_BYTES_MAX {
            return Err(Error::validation("input", "committed payload is too large"));
        }

        let mut entry = SessionEntry::new(
            &interaction.actor_id,
            &interaction.scope_id,
            outcome.payload,
            "",
            self.clock.now_ms(),
        );

        // The placeholder carries the disclosure control; it is edited in
        // place when the owner discloses.
        let placeholder = format!(
            "{} [{}{}]",
            outcome.placeholder, DISCLOSE_PREFIX, entry.id
        );
        entry.external_ref = ctx.publish(&placeholder).await?;
        self.sessions.put(entry.clone()).await.map_err(Error::from)?;

        info!(session_id = %entry.id, "session committed");
        let ttl_minutes = self.session_ttl_ms / 60_000;
        ctx.edit_original(&format!(
            "Committed. You may disclose it once within {} minutes.",
            ttl_minutes
        ))
        .await
    }

    async fn handle_disclose(
        &self,
        interaction: &Interaction,
        ctx: &dyn InteractionContext,
        session_id: &str,
    ) -> veil_core::Result<()> {
        // Authorization runs on a non-destructive read so an unauthorized
        // attempt cannot consume the single claim.
        let entry = self
            .sessions
            .get(session_id)
            .await
            .map_err(Error::from)?
            .ok_or(Error::NotFoundOrExpired)?;
        if entry.owner_id != interaction.actor_id || entry.scope_id != interaction.scope_id {
            return Err(Error::NotPermitted);
        }

        // The claim decides the single winner among concurrent attempts.
        let Some(entry) = self.sessions.claim(session_id).await.map_err(Error::from)? else {
            return ctx
                .follow_up("Already disclosed or expired.", true)
                .await;
        };

        let revealed = self.payload.render(&entry.payload);
        match ctx.edit_published(&entry.external_ref, &revealed).await {
            Ok(()) => {
                info!(session_id = %entry.id, "session disclosed");
                Ok(())
            }
            Err(err) if err.is_stale() => {
                // Placeholder deleted from under us: the disclosure still
                // happened, publish it fresh.
                warn!(session_id = %entry.id, "placeholder gone, publishing disclosure");
                ctx.publish(&revealed).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    async fn handle_timer_start(
        &self,
        interaction: &Interaction,
        ctx: &dyn InteractionContext,
        name: &str,
        interval_minutes: u64,
        occurrences: Option<u32>,
    ) -> veil_core::Result<()> {
        let interval_ms = interval_minutes
            .checked_mul(60_000)
            .ok_or_else(|| Error::validation("interval_minutes", "interval out of range"))?;

        let config = TimerConfig {
            name: name.to_string(),
            scope_id: interaction.scope_id.clone(),
            owner_id: interaction.actor_id.clone(),
            interval_ms,
            max_occurrences: occurrences,
        };
        let handler = Arc::new(NotifierHandler {
            delivery: Arc::clone(&self.delivery),
        });
        let timer = self
            .scheduler
            .create(config, handler)
            .await
            .map_err(Error::from)?;

        let cadence = match timer.max_occurrences {
            Some(max) => format!("every {} min, {} times", interval_minutes, max),
            None => format!("every {} min until stopped", interval_minutes),
        };
        ctx.edit_original(&format!(
            "Timer #{} '{}' started ({}).",
            timer.id, timer.name, cadence
        ))
        .await
    }

    async fn handle_timer_stop(
        &self,
        interaction: &Interaction,
        ctx: &dyn InteractionContext,
        id: u64,
    ) -> veil_core::Result<()> {
        let timer = self
            .scheduler
            .get(id)
            .await
            .map_err(Error::from)?
            .ok_or(Error::NotFoundOrExpired)?;
        // Timers are shared resources: any actor in the scope may stop
        // them, but never from another scope.
        if timer.scope_id != interaction.scope_id {
            return Err(Error::NotPermitted);
        }

        let text = match self.scheduler.stop(id).await.map_err(Error::from)? {
            Some(stopped) => format!("Timer #{} '{}' stopped.", stopped.id, stopped.name),
            None => format!("Timer #{} had already finished.", id),
        };
        ctx.edit_original(&text).await
    }

    async fn handle_timer_list(&self, ctx: &dyn InteractionContext) -> veil_core::Result<()> {
        let timers = self
            .scheduler
            .list_by_scope(ctx.scope_id())
            .await
            .map_err(Error::from)?;

        let text = if timers.is_empty() {
            "No timers running in this scope.".to_string()
        } else {
            timers
                .iter()
                .map(|t| {
                    let progress = match t.max_occurrences {
                        Some(max) => format!("{}/{}", t.occurrence_count, max),
                        None => format!("{} so far", t.occurrence_count),
                    };
                    format!(
                        "#{} '{}' - every {} min ({})",
                        t.id,
                        t.name,
                        t.interval_ms / 60_000,
                        progress
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        ctx.edit_original(&text).await
    }
}

/// Publishes timer notifications into the timer's scope. Delivery
/// failures are the driver's to log; they never affect bookkeeping.
struct NotifierHandler {
    delivery: Arc<dyn DeliveryClient>,
}

#[async_trait]
impl TimerHandler for NotifierHandler {
    async fn on_tick(&self, timer: &ScheduledTimer) -> veil_core::Result<()> {
        let text = match timer.max_occurrences {
            Some(max) => format!(
                "Reminder: {} ({}/{})",
                timer.name, timer.occurrence_count, max
            ),
            None => format!("Reminder: {} (#{})", timer.name, timer.occurrence_count),
        };
        self.delivery
            .create_message(&timer.scope_id, &text)
            .await
            .map(|_| ())
    }

    async fn on_finish(
        &self,
        timer: &ScheduledTimer,
        reason: FinishReason,
    ) -> veil_core::Result<()> {
        let text = match reason {
            FinishReason::OccurrencesExhausted => {
                format!("Timer '{}' finished: all occurrences delivered.", timer.name)
            }
            FinishReason::LifetimeExceeded => {
                format!("Timer '{}' finished: lifetime cap reached.", timer.name)
            }
        };
        self.delivery
            .create_message(&timer.scope_id, &text)
            .await
            .map(|_| ())
    }
}
