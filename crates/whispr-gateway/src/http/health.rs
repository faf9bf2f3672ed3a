use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use whispr_core::config::REMINDER_QUEUE;

use crate::app::AppState;

/// GET /health: liveness probe with reminder-queue counts.
///
/// Answers 503 when the queue table cannot be read.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match state.queue.counts(REMINDER_QUEUE) {
        Ok(counts) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "whispr",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": timestamp,
                "queue": counts,
            })),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read queue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "service": "whispr",
                    "version": env!("CARGO_PKG_VERSION"),
                    "timestamp": timestamp,
                    "error": e.to_string(),
                })),
            )
        }
    }
}
