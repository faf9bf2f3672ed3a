use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use whispr_queue::DelayQueue;

use crate::pipeline::Pipeline;

/// Shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Read-only use: queue counts for the health probe.
    pub queue: DelayQueue,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, queue: DelayQueue) -> Self {
        Self { pipeline, queue }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/webhook/whatsapp",
            post(crate::http::webhook::whatsapp_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, Form};
    use rusqlite::Connection;
    use std::sync::Mutex;
    use whispr_extract::FallbackExtractor;
    use whispr_reminders::{ReminderScheduler, ReminderStore, SchedulerSettings, UserStore};
    use whispr_whatsapp::LogSender;

    use crate::http::health::health_handler;
    use crate::http::webhook::{whatsapp_handler, InboundMessage};

    fn state() -> (Arc<AppState>, Arc<UserStore>) {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let queue = DelayQueue::new(conn.clone()).unwrap();
        let reminders = Arc::new(ReminderStore::new(conn.clone()).unwrap());
        let users = Arc::new(UserStore::new(conn).unwrap());
        let scheduler = Arc::new(ReminderScheduler::new(
            queue.clone(),
            reminders.clone(),
            SchedulerSettings::default(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            users.clone(),
            reminders,
            scheduler,
            Arc::new(FallbackExtractor),
            Arc::new(LogSender),
        ));
        (Arc::new(AppState::new(pipeline, queue)), users)
    }

    #[tokio::test]
    async fn health_reports_queue_counts() {
        let (state, _) = state();
        let (status, axum::Json(body)) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "whispr");
        assert_eq!(body["queue"]["pending"], 0);
        assert_eq!(body["queue"]["failed"], 0);
    }

    #[tokio::test]
    async fn webhook_acks_and_processes_in_background() {
        let (state, users) = state();
        let message = InboundMessage {
            body: "hello".into(),
            from: "whatsapp:+2348012345678".into(),
            message_sid: Some("SM123".into()),
        };
        let status = whatsapp_handler(State(state), Form(message)).await;
        assert_eq!(status, StatusCode::OK);

        // The first message from a number creates the user.
        for _ in 0..50 {
            if users.find_by_phone("whatsapp:+2348012345678").unwrap().is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("user was not created");
    }

    #[test]
    fn twilio_form_field_names() {
        let form: InboundMessage = serde_json::from_value(serde_json::json!({
            "Body": "Exam Monday",
            "From": "whatsapp:+1",
            "MessageSid": "SM1",
            "AccountSid": "AC1"
        }))
        .unwrap();
        assert_eq!(form.body, "Exam Monday");
        assert_eq!(form.from, "whatsapp:+1");
        assert_eq!(form.message_sid.as_deref(), Some("SM1"));
    }
}
