//! Twilio WhatsApp ingress: POST /webhook/whatsapp.

use axum::{extract::State, http::StatusCode, Form};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

/// The subset of Twilio's inbound-message form we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub body: String,
    pub from: String,
    #[serde(default)]
    pub message_sid: Option<String>,
}

/// Acknowledges at once with an empty 200 and processes the message on a
/// spawned task; Twilio retries webhooks that answer slowly.
pub async fn whatsapp_handler(
    State(state): State<Arc<AppState>>,
    Form(message): Form<InboundMessage>,
) -> StatusCode {
    let sid = message.message_sid.as_deref().unwrap_or("-");
    info!(from = %message.from, sid = %sid, chars = message.body.chars().count(), "message received");

    if message.from.trim().is_empty() {
        warn!(sid = %sid, "message without sender ignored");
        return StatusCode::OK;
    }

    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        pipeline.handle_message(&message.from, &message.body).await;
    });
    StatusCode::OK
}
