//! The capability surface handlers run against.
//!
//! Domain logic is written exactly once; each transport implements this
//! trait over its own reply channel. Everything here happens strictly
//! after the acknowledgment was sent.

use crate::delivery::DeliveryClient;
use async_trait::async_trait;
use std::sync::Arc;

/// Post-acknowledgment capabilities of one inbound request.
#[async_trait]
pub trait InteractionContext: Send + Sync {
    /// The actor who issued the request.
    fn actor_id(&self) -> &str;

    /// The channel/context the request arrived in.
    fn scope_id(&self) -> &str;

    /// Deliver a follow-up to the invoking actor. `private` limits
    /// visibility to that actor.
    async fn follow_up(&self, text: &str, private: bool) -> veil_core::Result<()>;

    /// Replace the content of the deferred reply or updated message the
    /// acknowledgment promised.
    async fn edit_original(&self, text: &str) -> veil_core::Result<()>;

    /// Publish a public message in the request's scope. Returns the
    /// external reference of the created message.
    async fn publish(&self, text: &str) -> veil_core::Result<String>;

    /// Edit a previously published message by its external reference.
    async fn edit_published(&self, external_ref: &str, text: &str) -> veil_core::Result<()>;
}

/// Context backed by the outbound delivery client and the request's
/// follow-up token. Both transports use this one implementation.
pub struct DeliveryContext {
    delivery: Arc<dyn DeliveryClient>,
    token: String,
    actor_id: String,
    scope_id: String,
}

impl DeliveryContext {
    pub fn new(
        delivery: Arc<dyn DeliveryClient>,
        token: impl Into<String>,
        actor_id: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            delivery,
            token: token.into(),
            actor_id: actor_id.into(),
            scope_id: scope_id.into(),
        }
    }
}

#[async_trait]
impl InteractionContext for DeliveryContext {
    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    fn scope_id(&self) -> &str {
        &self.scope_id
    }

    async fn follow_up(&self, text: &str, private: bool) -> veil_core::Result<()> {
        self.delivery.create_followup(&self.token, text, private).await
    }

    async fn edit_original(&self, text: &str) -> veil_core::Result<()> {
        self.delivery.edit_original(&self.token, text).await
    }

    async fn publish(&self, text: &str) -> veil_core::Result<String> {
        self.delivery.create_message(&self.scope_id, text).await
    }

    async fn edit_published(&self, external_ref: &str, text: &str) -> veil_core::Result<()> {
        self.delivery
            .edit_message(&self.scope_id, external_ref, text)
            .await
    }
}
