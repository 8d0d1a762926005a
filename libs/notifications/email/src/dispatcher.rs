//! Send-with-fallback.
//!
//! A dispatch walks a snapshot of the registry in order. Each provider is
//! verified first; a provider that fails verification is skipped without a
//! send. A verified provider gets the policy's send attempts. The first
//! accepted send wins and its provider is promoted. The webhook, if
//! configured, is tried once after every registered provider has failed.

use crate::config::EmailSettings;
use crate::error::{DispatchError, DispatchResult, TransportError};
use crate::models::{AttemptStage, Delivery, DeliveryAttempt, Message};
use crate::policy::{Deadline, DeliveryPolicy, RetrySchedule};
use crate::registry::ProviderRegistry;
use crate::retry::{run_step, Step, StepError};
use crate::transport::{TimeoutProfile, WebhookConfig, WebhookFallback};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const WEBHOOK_PROVIDER: &str = "webhook";

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    policy: DeliveryPolicy,
    webhook: Option<Arc<WebhookFallback>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, policy: DeliveryPolicy) -> Self {
        Self {
            registry,
            policy,
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: WebhookFallback) -> Self {
        self.webhook = Some(Arc::new(webhook));
        self
    }

    /// Build the registry, policy and webhook from settings.
    pub fn from_settings(settings: &EmailSettings, timeouts: TimeoutProfile) -> Self {
        let registry = Arc::new(ProviderRegistry::from_settings(settings, timeouts));
        let mut dispatcher = Self::new(registry, settings.policy.clone());

        if let Some(slot) = &settings.webhook {
            let mut config = WebhookConfig::new(&slot.url);
            config.timeouts = timeouts;
            if let Some(key) = &slot.api_key {
                config = config.with_api_key(key);
            }
            match WebhookFallback::new(config) {
                Ok(webhook) => dispatcher = dispatcher.with_webhook(webhook),
                Err(e) => warn!(error = %e, "Skipping e-mail webhook"),
            }
        }

        dispatcher
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn has_webhook(&self) -> bool {
        self.webhook.is_some()
    }

    /// Deliver `message` through the first provider that accepts it.
    #[instrument(skip_all, fields(to = %message.to, policy = self.policy.name))]
    pub async fn dispatch(&self, message: &Message) -> DispatchResult<Delivery> {
        let providers = self.registry.snapshot();
        if providers.is_empty() && self.webhook.is_none() {
            error!("No e-mail providers configured");
            return Err(DispatchError::NoProviders);
        }

        let deadline = Deadline::after(self.policy.deadline);
        let mut attempts: Vec<DeliveryAttempt> = Vec::new();
        let mut last_failure: Option<(String, TransportError)> = None;

        for provider in &providers {
            let name = provider.name.as_str();
            let transport = &provider.transport;

            let verify_step = Step {
                provider: name,
                stage: AttemptStage::Verify,
                timeout: self.policy.verify_timeout,
                schedule: self.policy.verify,
            };
            match run_step(verify_step, &deadline, &mut attempts, || transport.verify()).await {
                Ok(()) => {}
                Err(StepError::Failed(err)) => {
                    warn!(
                        provider = %name,
                        error = %err,
                        "Provider failed verification, trying next"
                    );
                    last_failure = Some((name.to_string(), err));
                    continue;
                }
                Err(StepError::DeadlineExceeded(err)) => {
                    return Err(Self::deadline_error(&deadline, err, last_failure, attempts));
                }
            }

            let send_step = Step {
                provider: name,
                stage: AttemptStage::Send,
                timeout: self.policy.send_timeout,
                schedule: self.policy.send,
            };
            match run_step(send_step, &deadline, &mut attempts, || transport.send(message)).await {
                Ok(outcome) => {
                    self.registry.promote(name);
                    info!(
                        provider = %name,
                        message_id = %outcome.message_id,
                        attempts = attempts.len(),
                        elapsed_ms = deadline.elapsed().as_millis() as u64,
                        "Email delivered"
                    );
                    return Ok(Delivery {
                        provider: name.to_string(),
                        message_id: outcome.message_id,
                        attempts,
                    });
                }
                Err(StepError::Failed(err)) => {
                    warn!(provider = %name, error = %err, "Provider failed to send, trying next");
                    last_failure = Some((name.to_string(), err));
                }
                Err(StepError::DeadlineExceeded(err)) => {
                    return Err(Self::deadline_error(&deadline, err, last_failure, attempts));
                }
            }
        }

        if let Some(webhook) = &self.webhook {
            let webhook_step = Step {
                provider: WEBHOOK_PROVIDER,
                stage: AttemptStage::Webhook,
                timeout: self.policy.send_timeout,
                schedule: RetrySchedule::once(),
            };
            let delivered =
                run_step(webhook_step, &deadline, &mut attempts, || webhook.deliver(message)).await;
            match delivered {
                Ok(outcome) => {
                    info!(
                        provider = WEBHOOK_PROVIDER,
                        message_id = %outcome.message_id,
                        attempts = attempts.len(),
                        "Email delivered via webhook fallback"
                    );
                    return Ok(Delivery {
                        provider: WEBHOOK_PROVIDER.to_string(),
                        message_id: outcome.message_id,
                        attempts,
                    });
                }
                Err(StepError::Failed(err)) => {
                    last_failure = Some((WEBHOOK_PROVIDER.to_string(), err));
                }
                Err(StepError::DeadlineExceeded(err)) => {
                    return Err(Self::deadline_error(&deadline, err, last_failure, attempts));
                }
            }
        }

        match last_failure {
            Some((last_provider, last_error)) => {
                error!(
                    last_provider = %last_provider,
                    error = %last_error,
                    attempts = attempts.len(),
                    "All e-mail providers failed"
                );
                Err(DispatchError::Exhausted {
                    last_provider,
                    last_error: last_error.to_string(),
                    attempts,
                })
            }
            None => Err(DispatchError::NoProviders),
        }
    }

    fn deadline_error(
        deadline: &Deadline,
        step_error: Option<TransportError>,
        last_failure: Option<(String, TransportError)>,
        attempts: Vec<DeliveryAttempt>,
    ) -> DispatchError {
        let last_error = step_error
            .map(|e| e.to_string())
            .or_else(|| last_failure.map(|(provider, e)| format!("{}: {}", provider, e)));
        error!(
            budget_secs = deadline.budget().as_secs(),
            elapsed_ms = deadline.elapsed().as_millis() as u64,
            attempts = attempts.len(),
            "E-mail dispatch deadline exceeded"
        );
        DispatchError::DeadlineExceeded {
            budget: deadline.budget(),
            elapsed: deadline.elapsed(),
            last_error,
            attempts,
        }
    }
}
