//! Resilient e-mail delivery for the listings site.
//!
//! Verification and password-reset codes go out through an ordered set of
//! providers (SMTP accounts, SendGrid, a generic relay) with a webhook as the
//! last resort. Each dispatch verifies a provider before sending, retries per
//! the configured [`DeliveryPolicy`], falls through to the next provider on
//! failure and promotes whichever provider succeeded.
//!
//! ## Usage
//!
//! ```ignore
//! use core_config::FromEnv;
//! use estate_email::{EmailService, EmailSettings};
//!
//! let settings = EmailSettings::from_env()?;
//! let service = EmailService::from_settings(&settings)?;
//! let result = service
//!     .send_account_verification_code("buyer@example.com", "482913", "Dana")
//!     .await;
//! if !result.success {
//!     // offer a resend
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod service;
pub mod templates;
pub mod transport;

pub use config::{EmailSettings, ProviderKind, Sender};
pub use diagnostics::{probe, ProbeReport};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult, TemplateError, TransportError};
pub use models::{
    AttemptStage, Delivery, DeliveryAttempt, DeliveryResult, FailureKind, Message, SendOutcome,
};
pub use policy::{Backoff, DeliveryPolicy, RetrySchedule};
pub use registry::{Provider, ProviderRegistry};
pub use service::{generate_code, EmailService};
pub use templates::{CodeEmail, TemplateEngine};
pub use transport::{MailTransport, ScriptedTransport, TimeoutProfile};
