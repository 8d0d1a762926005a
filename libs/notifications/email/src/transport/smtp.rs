//! SMTP transport using lettre

use super::{MailTransport, TimeoutProfile};
use crate::error::TransportError;
use crate::models::{Message, SendOutcome};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::fmt;
use tracing::{debug, info};

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plaintext connection upgraded with STARTTLS (usually port 587)
    StartTls,
    /// TLS from the first byte (usually port 465)
    ImplicitTls,
    /// No TLS at all; only for local relays such as Mailpit
    Plain,
}

impl fmt::Display for SmtpSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTls => write!(f, "starttls"),
            Self::ImplicitTls => write!(f, "tls"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

/// Connection parameters for one SMTP endpoint.
#[derive(Clone)]
pub struct SmtpTransportConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeouts: TimeoutProfile,
}

impl SmtpTransportConfig {
    pub fn new(host: impl Into<String>, port: u16, security: SmtpSecurity) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            username: None,
            password: None,
            timeouts: TimeoutProfile::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutProfile) -> Self {
        self.timeouts = timeouts;
        self
    }
}

// Keep the password out of debug output
impl fmt::Debug for SmtpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// SMTP transport
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpTransportConfig,
}

impl SmtpTransport {
    /// Build the lettre transport. No network I/O happens here.
    pub fn new(config: SmtpTransportConfig) -> Result<Self, TransportError> {
        let mut builder = match config.security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                    TransportError::Build(format!("STARTTLS relay {}: {}", config.host, e))
                })?
            }
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::Build(format!("TLS relay {}: {}", config.host, e)))?,
            SmtpSecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let transport = builder
            .port(config.port)
            .timeout(Some(config.timeouts.socket))
            .build();

        Ok(Self { transport, config })
    }

    pub fn config(&self) -> &SmtpTransportConfig {
        &self.config
    }

    /// Encode a message for lettre.
    pub(crate) fn build_message(message: &Message) -> Result<lettre::Message, TransportError> {
        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| {
                TransportError::InvalidMessage(format!("from address '{}': {}", message.from, e))
            })?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| {
                TransportError::InvalidMessage(format!("to address '{}': {}", message.to, e))
            })?;

        lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        let handshake = self.config.timeouts.handshake();

        // lettre only has a per-command timeout, so bound the whole handshake here
        match tokio::time::timeout(handshake, self.transport.test_connection()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(TransportError::Unreachable(format!(
                "{} did not accept the connection",
                self.endpoint()
            ))),
            Ok(Err(e)) => Err(TransportError::Connection(e.to_string())),
            Err(_) => Err(TransportError::Timeout(handshake)),
        }
    }

    async fn send(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        let email = Self::build_message(message)?;

        debug!(
            to = %message.to,
            subject = %message.subject,
            endpoint = %self.endpoint(),
            "Sending email via SMTP"
        );

        let response = self.transport.send(email).await?;

        // Most relays echo a queue id in the final 250 line
        let message_id = response
            .message()
            .next()
            .map(|line| line.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            to = %message.to,
            endpoint = %self.endpoint(),
            message_id = %message_id,
            "Email accepted by SMTP relay"
        );

        Ok(SendOutcome { message_id })
    }

    fn endpoint(&self) -> String {
        format!("{}:{} ({})", self.config.host, self.config.port, self.config.security)
    }
}
