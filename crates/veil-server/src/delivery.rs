//! Outbound delivery client.
//!
//! The narrow interface the core calls to publish and edit public
//! messages and to deliver follow-ups through the platform's REST
//! surface. All delivery goes through the trait; handlers never touch
//! reqwest directly.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::instrument;
use veil_core::Error;

/// Outbound message delivery.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Publish a message in a scope; returns the platform's message id.
    async fn create_message(&self, scope_id: &str, text: &str) -> veil_core::Result<String>;

    /// Edit a published message in place.
    async fn edit_message(
        &self,
        scope_id: &str,
        message_id: &str,
        text: &str,
    ) -> veil_core::Result<()>;

    /// Deliver a follow-up through the per-request token.
    async fn create_followup(&self, token: &str, text: &str, private: bool)
        -> veil_core::Result<()>;

    /// Replace the deferred reply the acknowledgment promised.
    async fn edit_original(&self, token: &str, text: &str) -> veil_core::Result<()>;
}

// =============================================================================
// REST implementation
// =============================================================================

/// Request timeout for outbound calls. Well inside the platform's
/// follow-up window; failures surface rather than hang a worker.
const DELIVERY_TIMEOUT_SECONDS: u64 = 10;

/// Production delivery over the platform's REST API.
#[derive(Clone)]
pub struct RestDelivery {
    http: reqwest::Client,
    base_url: String,
}

#[derive(serde::Serialize)]
struct OutboundMessage<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u64>,
}

#[derive(serde::Deserialize)]
struct CreatedMessage {
    id: String,
}

impl RestDelivery {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Map a response status: 404 means the target is already gone, either
    /// because the platform gave up or the message was deleted, which callers must
    /// tolerate, so it surfaces as `StaleRequest` rather than a hard
    /// failure.
    async fn check(response: reqwest::Response, operation: &str) -> veil_core::Result<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::StaleRequest {
                context: format!("{}: target already gone", operation),
            });
        }
        if !status.is_success() {
            return Err(Error::backend(operation, format!("status {}", status)));
        }
        Ok(response)
    }

    fn send_error(operation: &str, err: reqwest::Error) -> Error {
        Error::backend(operation, err.to_string())
    }
}

#[async_trait]
impl DeliveryClient for RestDelivery {
    #[instrument(skip(self, text), fields(scope_id = %scope_id))]
    async fn create_message(&self, scope_id: &str, text: &str) -> veil_core::Result<String> {
        let url = format!("{}/channels/{}/messages", self.base_url, scope_id);
        let response = self
            .http
            .post(&url)
            .json(&OutboundMessage { content: text, flags: None })
            .send()
            .await
            .map_err(|e| Self::send_error("delivery.create_message", e))?;
        let response = Self::check(response, "delivery.create_message").await?;
        let created: CreatedMessage = response
            .json()
            .await
            .map_err(|e| Self::send_error("delivery.create_message", e))?;
        Ok(created.id)
    }

    #[instrument(skip(self, text), fields(scope_id = %scope_id, message_id = %message_id))]
    async fn edit_message(
        &self,
        scope_id: &str,
        message_id: &str,
        text: &str,
    ) -> veil_core::Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.base_url, scope_id, message_id
        );
        let response = self
            .http
            .patch(&url)
            .json(&OutboundMessage { content: text, flags: None })
            .send()
            .await
            .map_err(|e| Self::send_error("delivery.edit_message", e))?;
        Self::check(response, "delivery.edit_message").await.map(|_| ())
    }

    #[instrument(skip(self, text, token))]
    async fn create_followup(
        &self,
        token: &str,
        text: &str,
        private: bool,
    ) -> veil_core::Result<()> {
        let url = format!("{}/interactions/{}/followups", self.base_url, token);
        let flags = private.then_some(1u64 << 6);
        let response = self
            .http
            .post(&url)
            .json(&OutboundMessage { content: text, flags })
            .send()
            .await
            .map_err(|e| Self::send_error("delivery.create_followup", e))?;
        Self::check(response, "delivery.create_followup").await.map(|_| ())
    }

    #[instrument(skip(self, text, token))]
    async fn edit_original(&self, token: &str, text: &str) -> veil_core::Result<()> {
        let url = format!("{}/interactions/{}/original", self.base_url, token);
        let response = self
            .http
            .patch(&url)
            .json(&OutboundMessage { content: text, flags: None })
            .send()
            .await
            .map_err(|e| Self::send_error("delivery.edit_original", e))?;
        Self::check(response, "delivery.edit_original").await.map(|_| ())
    }
}

// =============================================================================
// Recording implementation (tests, local runs)
// =============================================================================

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Published { scope_id: String, message_id: String, text: String },
    Edited { scope_id: String, message_id: String, text: String },
    FollowUp { token: String, text: String, private: bool },
    OriginalEdited { token: String, text: String },
}

/// In-memory delivery that records every call. Message ids are assigned
/// sequentially; ids listed in `gone` behave like deleted targets.
#[derive(Default)]
pub struct RecordingDelivery {
    calls: Mutex<Vec<Delivered>>,
    gone: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Delivered> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mark a message id as deleted: later edits get `StaleRequest`.
    pub fn mark_gone(&self, message_id: &str) {
        self.gone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message_id.to_string());
    }

    fn record(&self, call: Delivered) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn create_message(&self, scope_id: &str, text: &str) -> veil_core::Result<String> {
        let message_id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            format!("msg-{}", next)
        };
        self.record(Delivered::Published {
            scope_id: scope_id.to_string(),
            message_id: message_id.clone(),
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        scope_id: &str,
        message_id: &str,
        text: &str,
    ) -> veil_core::Result<()> {
        if self
            .gone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|id| id == message_id)
        {
            return Err(Error::StaleRequest {
                context: "recorded target gone".to_string(),
            });
        }
        self.record(Delivered::Edited {
            scope_id: scope_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn create_followup(
        &self,
        token: &str,
        text: &str,
        private: bool,
    ) -> veil_core::Result<()> {
        self.record(Delivered::FollowUp {
            token: token.to_string(),
            text: text.to_string(),
            private,
        });
        Ok(())
    }

    async fn edit_original(&self, token: &str, text: &str) -> veil_core::Result<()> {
        self.record(Delivered::OriginalEdited {
            token: token.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
