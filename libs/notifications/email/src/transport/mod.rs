//! Outbound mail transports.
//!
//! A transport knows how to reach one mail service. The dispatcher only talks
//! to the [`MailTransport`] trait, so registries can mix SMTP relays, HTTP APIs
//! and test doubles.

pub mod scripted;
pub mod sendgrid;
pub mod smtp;
pub mod webhook;

pub use scripted::{Reply, ScriptedTransport};
pub use sendgrid::{SendGridConfig, SendGridTransport};
pub use smtp::{SmtpSecurity, SmtpTransport, SmtpTransportConfig};
pub use webhook::{WebhookConfig, WebhookFallback};

use crate::error::TransportError;
use crate::models::{Message, SendOutcome};
use async_trait::async_trait;
use std::time::Duration;

/// Connection timeouts applied to a transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    /// TCP (and TLS) connection establishment
    pub connect: Duration,
    /// Server greeting / protocol handshake
    pub greeting: Duration,
    /// Idle time allowed on an established socket
    pub socket: Duration,
}

impl TimeoutProfile {
    /// Upper bound for a verification handshake.
    pub fn handshake(&self) -> Duration {
        self.connect + self.greeting
    }
}

impl Default for TimeoutProfile {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            greeting: Duration::from_secs(15),
            socket: Duration::from_secs(60),
        }
    }
}

/// A configured connection to one mail service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Lightweight reachability check (handshake, login, or authenticated ping).
    async fn verify(&self) -> Result<(), TransportError>;

    /// Deliver one message.
    async fn send(&self, message: &Message) -> Result<SendOutcome, TransportError>;

    /// Endpoint description for logs, e.g. `smtp.gmail.com:587 (starttls)`.
    fn endpoint(&self) -> String;
}
