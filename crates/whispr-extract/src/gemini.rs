use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use whispr_core::{config::GeminiConfig, reminder::Extracted};

use crate::error::{ExtractError, Result};
use crate::parse::{fallback_extraction, parse_model_answer};
use crate::Extractor;

/// Extraction through the Gemini `generateContent` endpoint.
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

// -- Gemini wire types ------------------------------------------------------

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContentOut<'a>>,
}

#[derive(Serialize)]
struct GeminiContentOut<'a> {
    parts: Vec<GeminiPartOut<'a>>,
}

#[derive(Serialize)]
struct GeminiPartOut<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiExtractor {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    /// One extraction attempt. Errors are surfaced so [`Extractor::extract`]
    /// can log them before falling back.
    pub async fn try_extract(&self, message: &str, now: DateTime<Utc>) -> Result<Extracted> {
        let prompt = build_prompt(message, now);
        let body = GenerateRequest {
            contents: vec![GeminiContentOut {
                parts: vec![GeminiPartOut { text: &prompt }],
            }],
        };

        debug!(model = %self.model, "sending extraction request");
        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ExtractError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let candidate = parsed.candidates.into_iter().next().ok_or(ExtractError::Empty)?;
        if let Some(reason) = candidate.finish_reason.as_deref() {
            debug!(finish_reason = reason, "extraction finished");
        }
        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExtractError::Empty)?;

        parse_model_answer(&text, message, now)
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    async fn extract(&self, text: &str) -> Extracted {
        let now = Utc::now();
        match self.try_extract(text, now).await {
            Ok(extracted) => {
                info!(
                    kind = %extracted.kind,
                    has_deadline = extracted.deadline.is_some(),
                    "extraction successful"
                );
                extracted
            }
            Err(e) => {
                warn!(error = %e, "extraction failed, using fallback");
                fallback_extraction(text, now)
            }
        }
    }
}

fn build_prompt(message: &str, now: DateTime<Utc>) -> String {
    format!(
        r#"You are an academic assistant helping students extract reminder information from messages.

The current date and time is {now} (UTC). Resolve relative dates against it.

Extract the following from this message:
- task: The main task/assignment (concise description)
- course: Subject or course name (if mentioned)
- type: One of: assignment, exam, class, deadline, event, other
- deadline: The due date/time (extract any date/time mentioned)
- location: Physical or virtual location (if mentioned)
- notes: Any additional important details

Message: "{message}"

Respond ONLY with valid JSON in this exact format:
{{
  "task": "string",
  "course": "string or null",
  "type": "assignment|exam|class|deadline|event|other",
  "deadline": "ISO 8601 date string or null",
  "location": "string or null",
  "notes": "string or null"
}}"#,
        now = now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};
    use whispr_core::reminder::ReminderKind;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn extractor(base_url: &str) -> GeminiExtractor {
        GeminiExtractor::new(&GeminiConfig {
            api_key: "test-key".into(),
            model: "gemini-1.5-flash".into(),
            base_url: base_url.into(),
        })
    }

    fn answer(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    #[test]
    fn prompt_carries_message_and_clock() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let prompt = build_prompt("Exam next Monday 9am", now);
        assert!(prompt.contains("Message: \"Exam next Monday 9am\""));
        assert!(prompt.contains("2026-03-02T09:00:00Z"));
        assert!(prompt.contains("\"type\": \"assignment|exam|class|deadline|event|other\""));
    }

    #[tokio::test]
    async fn parses_fenced_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(query_param("key", "test-key"))
            .and(body_string_contains("Math exam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer(
                "```json\n{\"task\":\"Math exam\",\"course\":\"MTH 101\",\"type\":\"exam\",\
                 \"deadline\":\"2026-03-09T09:00:00Z\",\"location\":\"Hall B\",\"notes\":null}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let extracted = extractor(&server.uri())
            .extract("Math exam next Monday 9am in Hall B")
            .await;
        assert_eq!(extracted.task, "Math exam");
        assert_eq!(extracted.kind, ReminderKind::Exam);
        assert_eq!(
            extracted.deadline,
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap())
        );
        assert_eq!(extracted.location.as_deref(), Some("Hall B"));
    }

    #[tokio::test]
    async fn api_error_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let gemini = extractor(&server.uri());
        let err = gemini.try_extract("Essay due Friday", Utc::now()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Api { status: 429, .. }));

        let extracted = gemini.extract("Essay due Friday").await;
        assert_eq!(extracted.task, "Essay due Friday");
        assert_eq!(extracted.kind, ReminderKind::Other);
        let deadline = extracted.deadline.unwrap();
        assert_eq!(deadline.weekday(), Weekday::Fri);
        assert!(deadline > Utc::now());
    }

    #[tokio::test]
    async fn empty_candidates_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let gemini = extractor(&server.uri());
        assert!(matches!(
            gemini.try_extract("hello", Utc::now()).await,
            Err(ExtractError::Empty)
        ));
        assert_eq!(gemini.extract("hello").await.task, "hello");
    }

    #[tokio::test]
    async fn prose_answer_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(answer("I could not find a task.")),
            )
            .mount(&server)
            .await;

        let extracted = extractor(&server.uri()).extract("random chatter").await;
        assert_eq!(extracted.task, "random chatter");
        assert_eq!(extracted.deadline, None);
    }
}
