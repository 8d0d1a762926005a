//! High-level entry points used by the registration and password-reset flows.
//!
//! Both calls render a code mail, dispatch it and hand back a flat
//! [`DeliveryResult`]. They never fail: a terminal delivery failure is logged
//! and reported as `success = false`, and the caller decides whether to offer a
//! resend.

use crate::config::{EmailSettings, Sender};
use crate::dispatcher::Dispatcher;
use crate::error::TemplateError;
use crate::models::{DeliveryResult, FailureKind, Message};
use crate::templates::{CodeEmail, TemplateEngine};
use crate::transport::TimeoutProfile;
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

/// Number of digits in a mailed code.
pub const CODE_LENGTH: usize = 6;

/// Random numeric code with [`CODE_LENGTH`] digits, zero-padded.
pub fn generate_code() -> String {
    let value: u32 = rand::rng().random_range(0..10u32.pow(CODE_LENGTH as u32));
    format!("{:0width$}", value, width = CODE_LENGTH)
}

pub struct EmailService {
    dispatcher: Dispatcher,
    templates: TemplateEngine,
    sender: Sender,
}

impl EmailService {
    pub fn new(dispatcher: Dispatcher, templates: TemplateEngine, sender: Sender) -> Self {
        Self {
            dispatcher,
            templates,
            sender,
        }
    }

    /// Wire the dispatcher and templates from settings. The sender name doubles
    /// as the brand shown in the mails.
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, TemplateError> {
        let dispatcher = Dispatcher::from_settings(settings, TimeoutProfile::default());
        let templates = TemplateEngine::new(&settings.sender.name)?;
        Ok(Self::new(dispatcher, templates, settings.sender.clone()))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn send_account_verification_code(
        &self,
        email: &str,
        code: &str,
        display_name: &str,
    ) -> DeliveryResult {
        let content = CodeEmail::new(email, display_name, code, Utc::now());
        let rendered = self
            .templates
            .render_verification_code(&self.sender.mailbox(), &content);
        self.deliver("account_verification", rendered).await
    }

    pub async fn send_password_reset_code(
        &self,
        email: &str,
        code: &str,
        display_name: &str,
    ) -> DeliveryResult {
        let content = CodeEmail::new(email, display_name, code, Utc::now());
        let rendered = self
            .templates
            .render_password_reset_code(&self.sender.mailbox(), &content);
        self.deliver("password_reset", rendered).await
    }

    async fn deliver(
        &self,
        kind: &'static str,
        rendered: Result<Message, TemplateError>,
    ) -> DeliveryResult {
        let message = match rendered {
            Ok(message) => message,
            Err(e) => {
                warn!(kind, error = %e, "Failed to render e-mail");
                return DeliveryResult::failed(FailureKind::Template, e.to_string());
            }
        };

        match self.dispatcher.dispatch(&message).await {
            Ok(delivery) => {
                info!(
                    kind,
                    to = %message.to,
                    provider = %delivery.provider,
                    message_id = %delivery.message_id,
                    "Code e-mail sent"
                );
                delivery.into()
            }
            Err(e) => {
                warn!(
                    kind,
                    to = %message.to,
                    attempts = e.attempts().len(),
                    error = %e,
                    "Code e-mail not delivered; user may request a resend"
                );
                e.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DeliveryPolicy;
    use crate::registry::{Provider, ProviderRegistry};
    use crate::transport::ScriptedTransport;
    use std::sync::Arc;

    fn service(transports: Vec<(&str, Arc<ScriptedTransport>)>) -> EmailService {
        let providers = transports
            .into_iter()
            .enumerate()
            .map(|(i, (name, t))| Provider::new(name, i as u16, t))
            .collect();
        let registry = Arc::new(ProviderRegistry::new(providers));
        let dispatcher = Dispatcher::new(registry, DeliveryPolicy::simple());
        EmailService::new(
            dispatcher,
            TemplateEngine::new("Estate Listings").unwrap(),
            Sender::new("noreply@example.com", "Estate Listings"),
        )
    }

    #[tokio::test]
    async fn test_verification_code_is_delivered() {
        let relay = Arc::new(ScriptedTransport::healthy("relay"));
        let service = service(vec![("relay", relay.clone())]);

        let result = service
            .send_account_verification_code("buyer@example.com", "482913", "Dana")
            .await;

        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("relay"));
        let sent = relay.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert_eq!(sent[0].from, "Estate Listings <noreply@example.com>");
        assert!(sent[0].html_body.contains("482913"));
    }

    #[tokio::test]
    async fn test_reset_code_failure_is_reported_not_raised() {
        let down = Arc::new(ScriptedTransport::failing_verify("down", "connection refused"));
        let service = service(vec![("down", down)]);

        let result = service.send_password_reset_code("seller@example.com", "771204", "Sam").await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Exhausted));
        assert!(result.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unconfigured_service_reports_not_configured() {
        let service = service(Vec::new());
        let result = service
            .send_account_verification_code("buyer@example.com", "482913", "Dana")
            .await;

        assert_eq!(result.failure, Some(FailureKind::NotConfigured));
    }

    #[test]
    fn test_generate_code_is_six_digits() {
        let codes: std::collections::HashSet<String> = (0..50).map(|_| generate_code()).collect();
        for code in &codes {
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
        assert!(codes.len() > 1);
    }
}
