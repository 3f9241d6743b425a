//! HTTP transport: the one-shot interaction endpoint.
//!
//! The synchronous response body *is* the acknowledgment, so the handler
//! never awaits store access or outbound delivery before responding.
//! Signature verification runs over the literal request bytes; a request
//! that fails it is rejected with 401 before its body is parsed at all.

use crate::auth::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::context::DeliveryContext;
use crate::delivery::DeliveryClient;
use crate::dispatch::Dispatcher;
use crate::model::{self, AckShape};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Shared state behind the HTTP surface. Cheap to clone; everything
/// mutable lives inside the dispatcher and its stores.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    dispatcher: Arc<Dispatcher>,
    delivery: Arc<dyn DeliveryClient>,
    public_key: VerifyingKey,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        delivery: Arc<dyn DeliveryClient>,
        public_key: VerifyingKey,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                dispatcher,
                delivery,
                public_key,
            }),
        }
    }
}

/// Rejection produced before the acknowledgment is committed. Wording is
/// already user-safe by the time it gets here.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Build the HTTP surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/interactions", post(handle_interaction))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// One inbound interaction. The returned JSON is the acknowledgment;
/// everything slower than classification happens on a spawned task after
/// this handler has produced its response.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
async fn handle_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return ApiError::unauthorized("missing signature headers").into_response();
    };
    if !auth::verify(&body, signature, timestamp, &state.inner.public_key) {
        warn!("signature verification failed");
        return ApiError::unauthorized("invalid request signature").into_response();
    }

    let ack = match model::classify(&body) {
        Ok(ack) => ack,
        Err(err) => return ApiError::bad_request(err.user_message()).into_response(),
    };

    if !matches!(ack, AckShape::Pong) {
        let interaction = match model::parse(&body) {
            Ok(interaction) => interaction,
            Err(err) => return ApiError::bad_request(err.user_message()).into_response(),
        };

        info!(request_id = %interaction.id, "interaction accepted");
        let dispatcher = Arc::clone(&state.inner.dispatcher);
        let ctx = DeliveryContext::new(
            Arc::clone(&state.inner.delivery),
            interaction.token.clone(),
            interaction.actor_id.clone(),
            interaction.scope_id.clone(),
        );
        tokio::spawn(async move {
            dispatcher.process(&interaction, &ctx).await;
        });
    }

    Json(ack.to_body()).into_response()
}
