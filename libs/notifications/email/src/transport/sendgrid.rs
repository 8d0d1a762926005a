//! SendGrid v3 HTTP API transport.

use super::{MailTransport, TimeoutProfile};
use crate::error::TransportError;
use crate::models::{Message, SendOutcome};
use async_trait::async_trait;
use lettre::message::Mailbox;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info};

pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3";

/// SendGrid API configuration.
#[derive(Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    /// API base URL, overridable for tests and EU data residency.
    pub api_url: String,
    pub timeouts: TimeoutProfile,
}

impl SendGridConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: SENDGRID_API_URL.to_string(),
            timeouts: TimeoutProfile::default(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutProfile) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl fmt::Debug for SendGridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGridConfig")
            .field("api_key", &"***")
            .field("api_url", &self.api_url)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// SendGrid transport.
pub struct SendGridTransport {
    config: SendGridConfig,
    client: Client,
}

impl SendGridTransport {
    pub fn new(config: SendGridConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect)
            .timeout(config.timeouts.socket)
            .build()
            .map_err(|e| TransportError::Build(format!("SendGrid HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_request(message: &Message) -> Result<SendGridRequest, TransportError> {
        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| {
                TransportError::InvalidMessage(format!("from address '{}': {}", message.from, e))
            })?;

        Ok(SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: message.to.clone(),
                    name: None,
                }],
            }],
            from: EmailAddress {
                email: from.email.to_string(),
                name: from.name,
            },
            subject: message.subject.clone(),
            content: vec![Content {
                content_type: "text/html".to_string(),
                value: message.html_body.clone(),
            }],
        })
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

fn describe_error_body(body: String) -> String {
    match serde_json::from_str::<SendGridError>(&body) {
        Ok(parsed) => parsed
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join(", "),
        Err(_) => body,
    }
}

#[async_trait]
impl MailTransport for SendGridTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        // Cheapest authenticated call SendGrid offers
        let response = self
            .client
            .get(format!("{}/scopes", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Unreachable(format!(
            "SendGrid API key check returned {}: {}",
            status,
            describe_error_body(body)
        )))
    }

    async fn send(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        let request = Self::build_request(message)?;

        debug!(to = %message.to, subject = %message.subject, "Sending email via SendGrid");

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.is_success() {
            let message_id = message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            info!(to = %message.to, message_id = %message_id, "Email accepted by SendGrid");
            Ok(SendOutcome { message_id })
        } else {
            let error_body = describe_error_body(response.text().await.unwrap_or_default());
            error!(
                to = %message.to,
                status = %status,
                error = %error_body,
                "SendGrid rejected email"
            );
            Err(TransportError::Rejected(format!("SendGrid ({}): {}", status, error_body)))
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/mail/send", self.config.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn message() -> Message {
        Message::new(
            "Estate Listings <noreply@example.com>",
            "buyer@example.com",
            "Your verification code",
            "<p>482913</p>",
        )
    }

    fn transport(url: &str) -> SendGridTransport {
        SendGridTransport::new(SendGridConfig::new("SG.test-key").with_api_url(url)).unwrap()
    }

    #[test]
    fn test_sendgrid_config_defaults() {
        let config = SendGridConfig::new("SG.test-key");
        assert_eq!(config.api_url, "https://api.sendgrid.com/v3");
        assert!(!format!("{:?}", config).contains("SG.test-key"));
    }

    #[tokio::test]
    async fn test_send_returns_message_id_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mail/send")
            .match_header("authorization", "Bearer SG.test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "from": { "email": "noreply@example.com", "name": "Estate Listings" },
                "subject": "Your verification code",
                "personalizations": [{ "to": [{ "email": "buyer@example.com" }] }]
            })))
            .with_status(202)
            .with_header("x-message-id", "sg-123")
            .create_async()
            .await;

        let outcome = transport(&server.url()).send(&message()).await.unwrap();

        assert_eq!(outcome.message_id, "sg-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mail/send")
            .with_status(400)
            .with_body(
                serde_json::json!({
                    "errors": [{
                        "message": "The from address does not match a verified Sender Identity",
                        "field": "from"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = transport(&server.url()).send(&message()).await.unwrap_err();

        match err {
            TransportError::Rejected(detail) => {
                assert!(detail.contains("400"));
                assert!(detail.contains("verified Sender Identity"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_checks_api_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/scopes")
            .match_header("authorization", "Bearer SG.test-key")
            .with_status(200)
            .with_body(r#"{"scopes":["mail.send"]}"#)
            .create_async()
            .await;

        assert!(transport(&server.url()).verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_fails_on_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/scopes")
            .with_status(401)
            .with_body(r#"{"errors":[{"message":"authorization required"}]}"#)
            .create_async()
            .await;

        let err = transport(&server.url()).verify().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unreachable(ref d) if d.contains("authorization required")
        ));
    }
}
