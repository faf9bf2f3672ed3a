//! Twilio WhatsApp delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use whispr_core::{config::TwilioConfig, Notifier, NotifyError};

use crate::split::split_body;

const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Sends WhatsApp messages through Twilio's Messages REST resource.
pub struct TwilioSender {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

impl TwilioSender {
    /// Fails when a credential or the sender number is blank.
    pub fn new(config: &TwilioConfig) -> Result<Self, NotifyError> {
        for (name, value) in [
            ("account_sid", &config.account_sid),
            ("auth_token", &config.auth_token),
            ("from_number", &config.from_number),
        ] {
            if value.trim().is_empty() {
                return Err(NotifyError::Config(format!("twilio.{name} is empty")));
            }
        }
        Ok(Self {
            client: reqwest::Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from: whatsapp_address(&config.from_number),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }

    /// Post one body. Returns the message SID.
    async fn post_message(&self, to: &str, body: &str) -> Result<String, NotifyError> {
        let form = [("To", to), ("From", self.from.as_str()), ("Body", body)];
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout {
                        ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    NotifyError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "Twilio rejected message");
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let resource: MessageResource = resp
            .json()
            .await
            .map_err(|e| NotifyError::InvalidResponse(e.to_string()))?;
        Ok(resource.sid)
    }
}

#[async_trait]
impl Notifier for TwilioSender {
    /// Bodies over the WhatsApp limit go out as consecutive messages; the
    /// first message's SID is returned.
    async fn send(&self, to: &str, body: &str) -> Result<String, NotifyError> {
        let to = whatsapp_address(to);
        let chunks = split_body(body);
        let mut first_sid = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let sid = self.post_message(&to, chunk).await?;
            debug!(chunk = i, sid = %sid, "message part accepted");
            first_sid.get_or_insert(sid);
        }

        let sid = first_sid.ok_or_else(|| NotifyError::InvalidResponse("empty body".into()))?;
        info!(to = %to, sid = %sid, parts = chunks.len(), "message sent");
        Ok(sid)
    }
}

/// Used when no Twilio credentials are configured: logs instead of sending.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl Notifier for LogSender {
    async fn send(&self, to: &str, body: &str) -> Result<String, NotifyError> {
        info!(to = %to, body = %body, "outbound message (delivery disabled)");
        Ok(format!("log-{}", body.len()))
    }
}

/// Ensure `address` carries the `whatsapp:` channel prefix.
pub fn whatsapp_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(WHATSAPP_PREFIX) {
        address.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{address}")
    }
}
