//! HTTP webhook fallback.
//!
//! Posts `{to, subject, html, from}` as JSON to a configured URL. Any 2xx is a
//! success. The dispatcher calls this at most once per dispatch, after every
//! registered provider has failed (or when none is registered).

use super::TimeoutProfile;
use crate::error::TransportError;
use crate::models::{Message, SendOutcome};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

#[derive(Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <key>` when present
    pub api_key: Option<String>,
    pub timeouts: TimeoutProfile,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeouts: TimeoutProfile::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    from: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(alias = "messageId", alias = "message_id")]
    id: Option<String>,
}

/// Last-resort HTTP delivery path.
pub struct WebhookFallback {
    config: WebhookConfig,
    client: Client,
}

impl WebhookFallback {
    pub fn new(config: WebhookConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect)
            .timeout(config.timeouts.socket)
            .build()
            .map_err(|e| TransportError::Build(format!("webhook HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Post the message once.
    pub async fn deliver(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        let payload = WebhookPayload {
            to: &message.to,
            subject: &message.subject,
            html: &message.html_body,
            from: &message.from,
        };

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Email webhook rejected message");
            return Err(TransportError::Rejected(format!("webhook returned {}: {}", status, body)));
        }

        // The body is optional; an unparseable one still counts as accepted
        let body = response.text().await.unwrap_or_default();
        let message_id = serde_json::from_str::<WebhookReply>(&body)
            .ok()
            .and_then(|reply| reply.id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            to = %message.to,
            status = %status,
            message_id = %message_id,
            "Email accepted by webhook"
        );

        Ok(SendOutcome { message_id })
    }
}
