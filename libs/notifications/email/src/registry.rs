//! Ordered set of mail providers.
//!
//! The registry is built once at startup and shared by every dispatch. Readers
//! take a snapshot of the current order; a successful send promotes its
//! provider to the front so the next dispatch tries it first.

use crate::config::{EmailSettings, ProviderKind};
use crate::error::TransportError;
use crate::transport::{
    MailTransport, SendGridConfig, SendGridTransport, SmtpSecurity, SmtpTransport,
    SmtpTransportConfig, TimeoutProfile,
};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// One named, ranked transport.
pub struct Provider {
    pub name: String,
    pub priority: u16,
    pub transport: Arc<dyn MailTransport>,
}

impl Provider {
    pub fn new(name: impl Into<String>, priority: u16, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            name: name.into(),
            priority,
            transport,
        }
    }

    /// Build the transport for a configured provider kind.
    ///
    /// Returns `Ok(None)` for kinds that do not belong in the registry (the
    /// webhook is handled by the dispatcher itself).
    pub fn from_kind(
        kind: &ProviderKind,
        timeouts: TimeoutProfile,
    ) -> Result<Option<Self>, TransportError> {
        let transport: Arc<dyn MailTransport> = match kind {
            ProviderKind::GmailStartTls(creds) => Arc::new(SmtpTransport::new(
                SmtpTransportConfig::new("smtp.gmail.com", 587, SmtpSecurity::StartTls)
                    .with_credentials(&creds.user, &creds.password)
                    .with_timeouts(timeouts),
            )?),
            ProviderKind::GmailImplicitTls(creds) => Arc::new(SmtpTransport::new(
                SmtpTransportConfig::new("smtp.gmail.com", 465, SmtpSecurity::ImplicitTls)
                    .with_credentials(&creds.user, &creds.password)
                    .with_timeouts(timeouts),
            )?),
            ProviderKind::Outlook(creds) => Arc::new(SmtpTransport::new(
                SmtpTransportConfig::new("smtp-mail.outlook.com", 587, SmtpSecurity::StartTls)
                    .with_credentials(&creds.user, &creds.password)
                    .with_timeouts(timeouts),
            )?),
            ProviderKind::OutlookDirect(creds) => Arc::new(SmtpTransport::new(
                SmtpTransportConfig::new("smtp.office365.com", 587, SmtpSecurity::StartTls)
                    .with_credentials(&creds.user, &creds.password)
                    .with_timeouts(timeouts),
            )?),
            ProviderKind::SendGrid(slot) => {
                let mut config = SendGridConfig::new(&slot.api_key).with_timeouts(timeouts);
                if let Some(url) = &slot.api_url {
                    config = config.with_api_url(url);
                }
                Arc::new(SendGridTransport::new(config)?)
            }
            ProviderKind::GenericSmtp(slot) => {
                let mut config = SmtpTransportConfig::new(&slot.host, slot.port, slot.security)
                    .with_timeouts(timeouts);
                if let Some(creds) = &slot.credentials {
                    config = config.with_credentials(&creds.user, &creds.password);
                }
                Arc::new(SmtpTransport::new(config)?)
            }
            ProviderKind::Webhook(_) => return Ok(None),
        };

        Ok(Some(Self::new(kind.name(), kind.priority(), transport)))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

/// Shared, promotable provider order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<Provider>>>,
}

impl ProviderRegistry {
    /// Create a registry ordered by ascending priority. Ties keep input order.
    pub fn new(mut providers: Vec<Provider>) -> Self {
        providers.sort_by_key(|p| p.priority);
        Self {
            providers: RwLock::new(providers.into_iter().map(Arc::new).collect()),
        }
    }

    /// Build every configured provider.
    ///
    /// A provider whose client cannot be built is logged and left out; an
    /// empty registry is valid.
    pub fn from_settings(settings: &EmailSettings, timeouts: TimeoutProfile) -> Self {
        let mut providers = Vec::new();

        for kind in settings.provider_kinds() {
            match Provider::from_kind(&kind, timeouts) {
                Ok(Some(provider)) => providers.push(provider),
                Ok(None) => {}
                Err(e) => warn!(provider = kind.name(), error = %e, "Skipping e-mail provider"),
            }
        }

        let registry = Self::new(providers);
        info!(
            count = registry.len(),
            providers = %registry.names().join(", "),
            webhook = settings.webhook.is_some(),
            policy = settings.policy.name,
            "E-mail providers configured"
        );
        registry
    }

    /// Current order. Later promotions do not affect a taken snapshot.
    pub fn snapshot(&self) -> Vec<Arc<Provider>> {
        match self.providers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Move `name` to the front, keeping the relative order of the rest.
    ///
    /// Returns `false` when no provider has that name.
    pub fn promote(&self, name: &str) -> bool {
        let mut guard = match self.providers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match guard.iter().position(|p| p.name == name) {
            Some(0) => true,
            Some(pos) => {
                guard[..=pos].rotate_right(1);
                info!(provider = %name, "Promoted e-mail provider to first position");
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountCredentials, GenericSmtpSlot, SendGridSlot, WebhookSlot};
    use crate::transport::ScriptedTransport;

    fn provider(name: &str, priority: u16) -> Provider {
        Provider::new(name, priority, Arc::new(ScriptedTransport::healthy(name)))
    }

    #[test]
    fn test_new_sorts_by_priority() {
        let registry =
            ProviderRegistry::new(vec![provider("c", 30), provider("a", 10), provider("b", 20)]);
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_promote_moves_to_front_and_keeps_rest() {
        let registry = ProviderRegistry::new(vec![
            provider("a", 10),
            provider("b", 20),
            provider("c", 30),
            provider("d", 40),
        ]);

        assert!(registry.promote("c"));
        assert_eq!(registry.names(), vec!["c", "a", "b", "d"]);

        assert!(registry.promote("c"));
        assert_eq!(registry.names(), vec!["c", "a", "b", "d"]);

        assert!(!registry.promote("missing"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_snapshot_is_isolated_from_promotion() {
        let registry = ProviderRegistry::new(vec![provider("a", 10), provider("b", 20)]);
        let before = registry.snapshot();
        registry.promote("b");

        assert_eq!(before[0].name, "a");
        assert_eq!(registry.snapshot()[0].name, "b");
    }

    #[tokio::test]
    async fn test_from_settings_builds_each_kind_without_network() {
        let creds = AccountCredentials::new("agent@example.com", "secret");
        let settings = EmailSettings {
            primary: Some(creds.clone()),
            secondary: Some(creds),
            sendgrid: Some(SendGridSlot {
                api_key: "SG.key".into(),
                api_url: None,
            }),
            smtp: Some(GenericSmtpSlot {
                host: "localhost".into(),
                port: 1025,
                security: SmtpSecurity::Plain,
                credentials: None,
            }),
            webhook: Some(WebhookSlot {
                url: "https://hooks.example.com/mail".into(),
                api_key: None,
            }),
            ..Default::default()
        };

        let registry = ProviderRegistry::from_settings(&settings, TimeoutProfile::default());

        assert_eq!(
            registry.names(),
            vec!["gmail-starttls", "gmail-tls", "outlook", "outlook-office365", "sendgrid", "smtp"]
        );
        let endpoints: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|p| p.transport.endpoint())
            .collect();
        assert_eq!(endpoints[0], "smtp.gmail.com:587 (starttls)");
        assert_eq!(endpoints[1], "smtp.gmail.com:465 (tls)");
        assert_eq!(endpoints[3], "smtp.office365.com:587 (starttls)");
        assert_eq!(endpoints[5], "localhost:1025 (plain)");
    }

    #[test]
    fn test_empty_settings_give_empty_registry() {
        let registry =
            ProviderRegistry::from_settings(&EmailSettings::default(), TimeoutProfile::default());
        assert!(registry.is_empty());
    }
}
