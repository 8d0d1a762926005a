use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outbound message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender mailbox, e.g. `Estate Listings <noreply@example.com>`
    pub from: String,
    /// Recipient address
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }
}

/// What a transport reports after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Transport-assigned message identifier
    pub message_id: String,
}

/// Which step of a dispatch an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStage {
    Verify,
    Send,
    Webhook,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => write!(f, "verify"),
            Self::Send => write!(f, "send"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

/// One verify or send try against one provider.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub provider: String,
    pub stage: AttemptStage,
    /// 1-based attempt number within the stage
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failure(detail) => Some(detail),
        }
    }
}

/// Successful dispatch.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Name of the provider that accepted the message
    pub provider: String,
    pub message_id: String,
    /// Every attempt made during the dispatch, in order
    pub attempts: Vec<DeliveryAttempt>,
}

impl Delivery {
    /// Number of attempts made against `provider` in the given stage.
    pub fn attempts_for(&self, provider: &str, stage: AttemptStage) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.provider == provider && a.stage == stage)
            .count()
    }
}

/// Why a [`DeliveryResult`] is unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotConfigured,
    Exhausted,
    DeadlineExceeded,
    Template,
}

/// Flat, serializable outcome handed to the rest of the site.
///
/// A failed result is not fatal for the user flow that triggered it: the
/// registration or reset request stays accepted and the user can ask for the
/// code to be sent again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl DeliveryResult {
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider: None,
            message_id: None,
            error: Some(error.into()),
            failure: Some(kind),
        }
    }
}

impl From<Delivery> for DeliveryResult {
    fn from(delivery: Delivery) -> Self {
        Self {
            success: true,
            provider: Some(delivery.provider),
            message_id: Some(delivery.message_id),
            error: None,
            failure: None,
        }
    }
}

impl From<DispatchError> for DeliveryResult {
    fn from(err: DispatchError) -> Self {
        let kind = match &err {
            DispatchError::NoProviders => FailureKind::NotConfigured,
            DispatchError::Exhausted { .. } => FailureKind::Exhausted,
            DispatchError::DeadlineExceeded { .. } => FailureKind::DeadlineExceeded,
        };
        Self::failed(kind, err.to_string())
    }
}

impl From<Result<Delivery, DispatchError>> for DeliveryResult {
    fn from(result: Result<Delivery, DispatchError>) -> Self {
        match result {
            Ok(delivery) => delivery.into(),
            Err(err) => err.into(),
        }
    }
}
