//! HTTP entry path
//!
//! `POST /events` accepts the same envelope the broker carries and runs it
//! through the same dedup gate and router as the broker loop.
//!
//! | Result | Status |
//! |---|---|
//! | processed / duplicate / unrouted | 200 |
//! | malformed | 422 |
//! | handler or dedup failure | 500 (caller should retry) |

use crate::consumer::EventConsumer;
use crate::error::ConsumerError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub fn router(consumer: Arc<EventConsumer>) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .with_state(consumer)
}

async fn receive_event(
    State(consumer): State<Arc<EventConsumer>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    match consumer.process_payload(&body).await {
        Ok(outcome) => (StatusCode::OK, Json(json!({ "status": outcome.as_str() }))),
        Err(e @ ConsumerError::MalformedMessage(_)) => {
            warn!(error = %e, "Rejected malformed webhook event");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            )
        }
        Err(e) => {
            warn!(error = %e, "Webhook event processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
