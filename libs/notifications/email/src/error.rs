//! Error types for e-mail dispatch.
//!
//! Two layers exist:
//! - [`TransportError`] describes one failed verify/send attempt against one provider.
//!   It is always recoverable from the dispatcher's point of view.
//! - [`DispatchError`] is the terminal outcome of a whole dispatch call.
//!   Callers never see raw lettre/reqwest errors.

use crate::models::DeliveryAttempt;
use std::time::Duration;
use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure of a single transport operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The operation did not finish before its timeout.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Could not connect, handshake, or authenticate.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The handshake completed but the server reported it is not usable.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The remote side refused the message or answered with an error status.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The message could not be encoded for this transport (bad address, etc.).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The transport could not be constructed from its configuration.
    #[error("transport setup failed: {0}")]
    Build(String),
}

impl TransportError {
    /// Whether retrying the same provider could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidMessage(_) | Self::Build(_))
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() {
            Self::Rejected(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connection(format!("request timed out: {}", err))
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Terminal failure of a dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No SMTP-style provider and no webhook is configured.
    #[error("no e-mail providers configured")]
    NoProviders,

    /// Every provider (and the webhook, if any) was tried and failed.
    #[error("all e-mail providers failed; last error from {last_provider}: {last_error}")]
    Exhausted {
        last_provider: String,
        last_error: String,
        attempts: Vec<DeliveryAttempt>,
    },

    /// The dispatch ran out of its overall wall-clock budget.
    #[error(
        "e-mail dispatch exceeded its {}s deadline after {}ms{}",
        .budget.as_secs(),
        .elapsed.as_millis(),
        last_error_suffix(.last_error)
    )]
    DeadlineExceeded {
        budget: Duration,
        elapsed: Duration,
        last_error: Option<String>,
        attempts: Vec<DeliveryAttempt>,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!("; last error: {}", e))
        .unwrap_or_default()
}

impl DispatchError {
    /// Attempts recorded before the dispatch gave up.
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        match self {
            Self::NoProviders => &[],
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => attempts,
        }
    }
}

/// Template registration or rendering failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to register template '{name}': {details}")]
    Register { name: String, details: String },

    #[error("failed to render template '{name}': {details}")]
    Render { name: String, details: String },
}
