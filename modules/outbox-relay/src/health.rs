use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use outbox::OutboxStore;
use serde_json::{json, Value};
use std::sync::Arc;

/// `/api/health` and `/api/outbox/stats` over the outbox store
pub fn router(store: Arc<dyn OutboxStore>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/outbox/stats", get(stats))
        .with_state(store)
}

async fn health(State(store): State<Arc<dyn OutboxStore>>) -> (StatusCode, Json<Value>) {
    match store.status_counts().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "module": "outbox-relay",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the outbox store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "module": "outbox-relay",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Counts per status, plus how long the oldest due event has been waiting
async fn stats(State(store): State<Arc<dyn OutboxStore>>) -> (StatusCode, Json<Value>) {
    let now = Utc::now();
    let result = async {
        let counts = store.status_counts().await?;
        let oldest_due = store.find_due(now, 1).await?;
        Ok::<_, outbox::OutboxError>((counts, oldest_due))
    }
    .await;

    match result {
        Ok((counts, oldest_due)) => {
            let lag_ms = oldest_due
                .first()
                .map(|event| (now - event.created_at).num_milliseconds().max(0))
                .unwrap_or(0);
            (
                StatusCode::OK,
                Json(json!({
                    "pending": counts.pending,
                    "publishing": counts.publishing,
                    "published": counts.published,
                    "dead": counts.dead,
                    "total": counts.total(),
                    "delivery_lag_ms": lag_ms
                })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read outbox stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
