//! Gateway transport: a persistent connection delivering raw event
//! frames.
//!
//! Frames arrive pre-authenticated by the connection itself, so the
//! pipeline here is classify, acknowledge through the sink, then hand
//! the frame to the dispatcher on a separate task. The acknowledgment is
//! sent before any parsing beyond the shallow classification fields and
//! before any store access, bounded by the platform's deadline.

use crate::context::DeliveryContext;
use crate::delivery::DeliveryClient;
use crate::dispatch::Dispatcher;
use crate::model::{self, AckShape};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use veil_core::ACK_DEADLINE_MS;

/// Where gateway acknowledgments go. The production sink writes back to
/// the platform's callback endpoint for the frame's request id.
#[async_trait]
pub trait GatewaySink: Send + Sync {
    /// Send the acknowledgment body for one request.
    async fn acknowledge(
        &self,
        request_id: &str,
        token: &str,
        body: serde_json::Value,
    ) -> veil_core::Result<()>;
}

/// Consumes raw frames from a persistent connection and feeds the
/// dispatcher. One instance per connection; processing is spawned per
/// frame so a slow handler never backs up the acknowledgment path.
pub struct GatewayTransport {
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn GatewaySink>,
    delivery: Arc<dyn DeliveryClient>,
}

impl GatewayTransport {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn GatewaySink>,
        delivery: Arc<dyn DeliveryClient>,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            delivery,
        }
    }

    /// Drain a frame channel until the sender side closes.
    pub async fn run(&self, mut frames: mpsc::Receiver<Vec<u8>>) {
        info!("gateway transport running");
        while let Some(frame) = frames.recv().await {
            self.handle_frame(&frame).await;
        }
        info!("gateway frame channel closed");
    }

    /// Classify, acknowledge, then process one raw frame. A frame that
    /// fails classification or parsing is dropped with a log line; there
    /// is no error channel back through the gateway.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn handle_frame(&self, raw: &[u8]) {
        let ack = match model::classify(raw) {
            Ok(ack) => ack,
            Err(err) => {
                warn!(error = %err, "unclassifiable frame dropped");
                return;
            }
        };

        // Parse eagerly: the request id and token are needed to address
        // the acknowledgment. This stays well inside the deadline; only
        // store access and delivery are pushed past the ack.
        let interaction = match model::parse(raw) {
            Ok(interaction) => interaction,
            Err(err) => {
                warn!(error = %err, "unparsable frame dropped");
                return;
            }
        };

        let acked = tokio::time::timeout(
            Duration::from_millis(ACK_DEADLINE_MS),
            self.sink
                .acknowledge(&interaction.id, &interaction.token, ack.to_body()),
        )
        .await;
        match acked {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(request_id = %interaction.id, error = %err, "acknowledgment failed, dropping frame");
                return;
            }
            Err(_) => {
                warn!(request_id = %interaction.id, "acknowledgment missed the deadline, dropping frame");
                return;
            }
        }

        if matches!(ack, AckShape::Pong) {
            debug!(request_id = %interaction.id, "probe answered");
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let ctx = DeliveryContext::new(
            Arc::clone(&self.delivery),
            interaction.token.clone(),
            interaction.actor_id.clone(),
            interaction.scope_id.clone(),
        );
        tokio::spawn(async move {
            dispatcher.process(&interaction, &ctx).await;
        });
    }
}
