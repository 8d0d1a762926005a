//! Delivery settings.
//!
//! Every supported provider family has its own optional slot. A slot is filled
//! only when all of its required values are present and non-blank; anything
//! else is skipped without error.
//!
//! Environment variables:
//!
//! | Slot | Keys |
//! |---|---|
//! | primary (Gmail) | `GMAIL_USER`, `GMAIL_APP_PASSWORD` |
//! | secondary (Outlook) | `OUTLOOK_USER`, `OUTLOOK_PASSWORD` |
//! | SendGrid | `SENDGRID_API_KEY`, `SENDGRID_API_URL` (optional) |
//! | generic SMTP | `SMTP_HOST`, `SMTP_PORT`, `SMTP_SECURE`, `SMTP_USER`, `SMTP_PASSWORD` |
//! | webhook | `EMAIL_WEBHOOK_URL`, `EMAIL_WEBHOOK_API_KEY` (optional) |
//! | sender | `EMAIL_FROM_ADDRESS`, `EMAIL_FROM_NAME` |
//! | policy | `EMAIL_DELIVERY_POLICY` (`simple`/`persistent`), `EMAIL_DISPATCH_DEADLINE_SECS` |

use crate::policy::{DeliveryPolicy, MAX_DEADLINE};
use crate::transport::SmtpSecurity;
use core_config::{env_non_empty, env_or_default, env_parse_or, ConfigError, FromEnv};
use lettre::message::Mailbox;
use lettre::Address;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_FROM_NAME: &str = "Estate Listings";
pub const FALLBACK_FROM_ADDRESS: &str = "noreply@localhost";

/// Username/password pair for an SMTP account.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub user: String,
    pub password: String,
}

impl AccountCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    fn from_env(user_key: &str, password_key: &str) -> Option<Self> {
        Some(Self::new(env_non_empty(user_key)?, env_non_empty(password_key)?))
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SendGridSlot {
    pub api_key: String,
    pub api_url: Option<String>,
}

impl fmt::Debug for SendGridSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGridSlot")
            .field("api_key", &"***")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericSmtpSlot {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    /// Required unless `security` is [`SmtpSecurity::Plain`]
    pub credentials: Option<AccountCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSlot {
    pub url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for WebhookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSlot")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Default sender identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub address: String,
    pub name: String,
}

impl Sender {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// RFC 5322 mailbox, e.g. `Estate Listings <noreply@example.com>`.
    ///
    /// Names with specials are quoted (`"Patel, Shah" <...>`). An address
    /// lettre cannot parse is returned bare and rejected later per provider.
    pub fn mailbox(&self) -> String {
        let name = self.name.trim();
        match self.address.parse::<Address>() {
            Ok(address) if !name.is_empty() => {
                Mailbox::new(Some(name.to_string()), address).to_string()
            }
            _ => self.address.clone(),
        }
    }
}

/// One configured provider, tagged by family and transport mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    /// smtp.gmail.com:587 with STARTTLS
    GmailStartTls(AccountCredentials),
    /// smtp.gmail.com:465 with implicit TLS
    GmailImplicitTls(AccountCredentials),
    /// smtp-mail.outlook.com:587 with STARTTLS
    Outlook(AccountCredentials),
    /// smtp.office365.com:587, the direct Microsoft 365 host
    OutlookDirect(AccountCredentials),
    SendGrid(SendGridSlot),
    GenericSmtp(GenericSmtpSlot),
    Webhook(WebhookSlot),
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GmailStartTls(_) => "gmail-starttls",
            Self::GmailImplicitTls(_) => "gmail-tls",
            Self::Outlook(_) => "outlook",
            Self::OutlookDirect(_) => "outlook-office365",
            Self::SendGrid(_) => "sendgrid",
            Self::GenericSmtp(_) => "smtp",
            Self::Webhook(_) => "webhook",
        }
    }

    /// Fixed rank; lower is tried first. Modes of one account are adjacent.
    pub fn priority(&self) -> u16 {
        match self {
            Self::GmailStartTls(_) => 10,
            Self::GmailImplicitTls(_) => 11,
            Self::Outlook(_) => 20,
            Self::OutlookDirect(_) => 21,
            Self::SendGrid(_) => 30,
            Self::GenericSmtp(_) => 40,
            Self::Webhook(_) => u16::MAX,
        }
    }
}

/// Everything the dispatcher needs to know about the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub primary: Option<AccountCredentials>,
    pub secondary: Option<AccountCredentials>,
    pub sendgrid: Option<SendGridSlot>,
    pub smtp: Option<GenericSmtpSlot>,
    pub webhook: Option<WebhookSlot>,
    pub sender: Sender,
    pub policy: DeliveryPolicy,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            primary: None,
            secondary: None,
            sendgrid: None,
            smtp: None,
            webhook: None,
            sender: Sender::new(FALLBACK_FROM_ADDRESS, DEFAULT_FROM_NAME),
            policy: DeliveryPolicy::simple(),
        }
    }
}

impl EmailSettings {
    /// Configured providers in try order.
    ///
    /// Pure: depends only on which slots are filled. The webhook, when present,
    /// is always last.
    pub fn provider_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds = Vec::new();

        if let Some(creds) = &self.primary {
            kinds.push(ProviderKind::GmailStartTls(creds.clone()));
            kinds.push(ProviderKind::GmailImplicitTls(creds.clone()));
        }
        if let Some(creds) = &self.secondary {
            kinds.push(ProviderKind::Outlook(creds.clone()));
            kinds.push(ProviderKind::OutlookDirect(creds.clone()));
        }
        if let Some(slot) = &self.sendgrid {
            kinds.push(ProviderKind::SendGrid(slot.clone()));
        }
        if let Some(slot) = &self.smtp {
            if slot.security == SmtpSecurity::Plain || slot.credentials.is_some() {
                kinds.push(ProviderKind::GenericSmtp(slot.clone()));
            }
        }
        if let Some(slot) = &self.webhook {
            kinds.push(ProviderKind::Webhook(slot.clone()));
        }

        kinds.sort_by_key(ProviderKind::priority);
        kinds
    }
}

fn parse_security(key: &str) -> Result<SmtpSecurity, ConfigError> {
    let raw = env_non_empty(key).unwrap_or_default().to_ascii_lowercase();
    match raw.as_str() {
        "" | "false" | "0" | "starttls" => Ok(SmtpSecurity::StartTls),
        "true" | "1" | "ssl" | "tls" => Ok(SmtpSecurity::ImplicitTls),
        "none" | "plain" => Ok(SmtpSecurity::Plain),
        other => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("unknown security mode '{}'", other),
        }),
    }
}

/// Dispatch deadline override in whole seconds, between 1s and [`MAX_DEADLINE`].
fn parse_deadline(key: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = env_non_empty(key) else {
        return Ok(None);
    };
    let invalid = |details: String| ConfigError::ParseError {
        key: key.to_string(),
        details,
    };

    let secs: u64 = raw.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
    if secs == 0 || secs > MAX_DEADLINE.as_secs() {
        return Err(invalid(format!(
            "deadline must be between 1 and {} seconds, got {}",
            MAX_DEADLINE.as_secs(),
            secs
        )));
    }
    Ok(Some(Duration::from_secs(secs)))
}

fn default_port(security: SmtpSecurity) -> u16 {
    match security {
        SmtpSecurity::StartTls => 587,
        SmtpSecurity::ImplicitTls => 465,
        SmtpSecurity::Plain => 25,
    }
}

impl FromEnv for EmailSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let primary = AccountCredentials::from_env("GMAIL_USER", "GMAIL_APP_PASSWORD");
        let secondary = AccountCredentials::from_env("OUTLOOK_USER", "OUTLOOK_PASSWORD");

        let sendgrid = env_non_empty("SENDGRID_API_KEY").map(|api_key| SendGridSlot {
            api_key,
            api_url: env_non_empty("SENDGRID_API_URL"),
        });

        let smtp = match env_non_empty("SMTP_HOST") {
            Some(host) => {
                let security = parse_security("SMTP_SECURE")?;
                Some(GenericSmtpSlot {
                    host,
                    port: env_parse_or("SMTP_PORT", default_port(security))?,
                    security,
                    credentials: AccountCredentials::from_env("SMTP_USER", "SMTP_PASSWORD"),
                })
            }
            None => None,
        };

        let webhook = env_non_empty("EMAIL_WEBHOOK_URL").map(|url| WebhookSlot {
            url,
            api_key: env_non_empty("EMAIL_WEBHOOK_API_KEY"),
        });

        let explicit = env_non_empty("EMAIL_FROM_ADDRESS");
        if let Some(Err(e)) = explicit.as_deref().map(str::parse::<Address>) {
            return Err(ConfigError::ParseError {
                key: "EMAIL_FROM_ADDRESS".to_string(),
                details: format!("invalid sender address: {}", e),
            });
        }
        let address = explicit
            .or_else(|| primary.as_ref().map(|c| c.user.clone()))
            .or_else(|| secondary.as_ref().map(|c| c.user.clone()))
            .or_else(|| smtp.as_ref().and_then(|s| s.credentials.as_ref()).map(|c| c.user.clone()))
            .unwrap_or_else(|| FALLBACK_FROM_ADDRESS.to_string());
        let sender = Sender::new(address, env_or_default("EMAIL_FROM_NAME", DEFAULT_FROM_NAME));

        let mut policy: DeliveryPolicy =
            env_parse_or("EMAIL_DELIVERY_POLICY", DeliveryPolicy::simple())?;
        if let Some(deadline) = parse_deadline("EMAIL_DISPATCH_DEADLINE_SECS")? {
            policy = policy.with_deadline(deadline);
        }

        Ok(Self {
            primary,
            secondary,
            sendgrid,
            smtp,
            webhook,
            sender,
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "GMAIL_USER",
        "GMAIL_APP_PASSWORD",
        "OUTLOOK_USER",
        "OUTLOOK_PASSWORD",
        "SENDGRID_API_KEY",
        "SENDGRID_API_URL",
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_SECURE",
        "SMTP_USER",
        "SMTP_PASSWORD",
        "EMAIL_WEBHOOK_URL",
        "EMAIL_WEBHOOK_API_KEY",
        "EMAIL_FROM_ADDRESS",
        "EMAIL_FROM_NAME",
        "EMAIL_DELIVERY_POLICY",
        "EMAIL_DISPATCH_DEADLINE_SECS",
    ];

    /// Run `f` with only `vars` set among the e-mail keys.
    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let all: Vec<(&str, Option<&str>)> = KEYS
            .iter()
            .map(|key| {
                let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(all, f)
    }

    fn names(settings: &EmailSettings) -> Vec<&'static str> {
        settings.provider_kinds().iter().map(ProviderKind::name).collect()
    }

    #[test]
    fn test_empty_environment_has_no_providers() {
        with_env(&[], || {
            let settings = EmailSettings::from_env().unwrap();
            assert!(settings.provider_kinds().is_empty());
            assert_eq!(settings.sender.address, FALLBACK_FROM_ADDRESS);
            assert_eq!(settings.policy.name, "simple");
        });
    }

    #[test]
    fn test_all_slots_in_priority_order() {
        with_env(
            &[
                ("GMAIL_USER", "agent@gmail.com"),
                ("GMAIL_APP_PASSWORD", "abcd efgh"),
                ("OUTLOOK_USER", "agent@outlook.com"),
                ("OUTLOOK_PASSWORD", "secret"),
                ("SENDGRID_API_KEY", "SG.key"),
                ("SMTP_HOST", "mail.example.com"),
                ("SMTP_USER", "relay"),
                ("SMTP_PASSWORD", "relay-pass"),
                ("EMAIL_WEBHOOK_URL", "https://hooks.example.com/mail"),
            ],
            || {
                let settings = EmailSettings::from_env().unwrap();
                assert_eq!(
                    names(&settings),
                    vec![
                        "gmail-starttls",
                        "gmail-tls",
                        "outlook",
                        "outlook-office365",
                        "sendgrid",
                        "smtp",
                        "webhook"
                    ]
                );
                // Sender falls back to the primary account
                assert_eq!(settings.sender.address, "agent@gmail.com");
            },
        );
    }

    #[test]
    fn test_incomplete_slots_are_skipped() {
        with_env(
            &[
                ("GMAIL_USER", "agent@gmail.com"),
                ("GMAIL_APP_PASSWORD", "   "),
                ("OUTLOOK_PASSWORD", "secret"),
                ("SMTP_HOST", "mail.example.com"),
                ("SMTP_USER", "relay"),
                ("SENDGRID_API_KEY", ""),
            ],
            || {
                let settings = EmailSettings::from_env().unwrap();
                assert!(settings.primary.is_none());
                assert!(settings.secondary.is_none());
                assert!(settings.sendgrid.is_none());
                // Host present but no password: slot kept, provider not produced
                assert!(settings.smtp.is_some());
                assert!(settings.provider_kinds().is_empty());
            },
        );
    }

    #[test]
    fn test_generic_smtp_security_and_ports() {
        with_env(&[("SMTP_HOST", "localhost"), ("SMTP_SECURE", "none")], || {
            let smtp = EmailSettings::from_env().unwrap().smtp.unwrap();
            assert_eq!(smtp.security, SmtpSecurity::Plain);
            assert_eq!(smtp.port, 25);
        });

        with_env(
            &[("SMTP_HOST", "mail.example.com"), ("SMTP_SECURE", "true"), ("SMTP_PORT", "2465")],
            || {
                let smtp = EmailSettings::from_env().unwrap().smtp.unwrap();
                assert_eq!(smtp.security, SmtpSecurity::ImplicitTls);
                assert_eq!(smtp.port, 2465);
            },
        );

        with_env(&[("SMTP_HOST", "mail.example.com"), ("SMTP_SECURE", "maybe")], || {
            let err = EmailSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_SECURE"));
        });
    }

    #[test]
    fn test_plain_smtp_without_credentials_is_a_provider() {
        let settings = EmailSettings {
            smtp: Some(GenericSmtpSlot {
                host: "localhost".into(),
                port: 1025,
                security: SmtpSecurity::Plain,
                credentials: None,
            }),
            ..Default::default()
        };
        assert_eq!(names(&settings), vec!["smtp"]);
    }

    #[test]
    fn test_policy_and_deadline_from_env() {
        with_env(
            &[("EMAIL_DELIVERY_POLICY", "persistent"), ("EMAIL_DISPATCH_DEADLINE_SECS", "45")],
            || {
                let settings = EmailSettings::from_env().unwrap();
                assert_eq!(settings.policy.name, "persistent");
                assert_eq!(settings.policy.deadline, Duration::from_secs(45));
            },
        );

        with_env(&[("EMAIL_DELIVERY_POLICY", "eager")], || {
            assert!(EmailSettings::from_env().is_err());
        });
    }

    #[test]
    fn test_out_of_range_deadline_is_rejected() {
        for raw in ["18446744073709551615", "0", "86401"] {
            with_env(&[("EMAIL_DISPATCH_DEADLINE_SECS", raw)], || {
                let err = EmailSettings::from_env().unwrap_err();
                assert!(err.to_string().contains("EMAIL_DISPATCH_DEADLINE_SECS"), "{}", raw);
            });
        }

        with_env(&[("EMAIL_DISPATCH_DEADLINE_SECS", "86400")], || {
            let settings = EmailSettings::from_env().unwrap();
            assert_eq!(settings.policy.deadline, MAX_DEADLINE);
        });
    }

    #[test]
    fn test_sender_mailbox() {
        assert_eq!(
            Sender::new("noreply@example.com", "Estate Listings").mailbox(),
            "Estate Listings <noreply@example.com>"
        );
        assert_eq!(Sender::new("noreply@example.com", "").mailbox(), "noreply@example.com");
    }

    #[test]
    fn test_sender_name_with_specials_is_quoted() {
        let mailbox = Sender::new("noreply@example.com", "Patel, Shah Estates").mailbox();
        assert!(mailbox.starts_with('"'), "{}", mailbox);

        let parsed: Mailbox = mailbox.parse().unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Patel, Shah Estates"));
        assert_eq!(parsed.email.to_string(), "noreply@example.com");

        let message = crate::models::Message::new(mailbox, "buyer@example.com", "Code", "<p>1</p>");
        assert!(crate::transport::SmtpTransport::build_message(&message).is_ok());
    }

    #[test]
    fn test_invalid_sender_address_is_rejected() {
        with_env(&[("EMAIL_FROM_ADDRESS", "not an address")], || {
            let err = EmailSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("EMAIL_FROM_ADDRESS"));
        });
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = AccountCredentials::new("agent@gmail.com", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
