//! Operator CLI for the e-mail dispatcher.
//!
//! - `probe` verifies every configured provider and prints a ranked report.
//! - `send-code` renders and dispatches a verification or reset code mail.
//! - `providers` prints the try order built from the environment.
//!
//! Providers, sender and policy come from the same environment variables the
//! site uses (see `estate_email::config`).

use clap::{Parser, Subcommand};
use core_config::{Environment, FromEnv};
use estate_email::{
    EmailService, EmailSettings, ProviderRegistry, TimeoutProfile, generate_code, probe,
};
use eyre::{Result, WrapErr, eyre};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "estate-mailer")]
#[command(about = "Check and exercise the listings site's e-mail providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Verify every provider and rank the working ones by latency
    Probe {
        /// Per-provider verification timeout
        #[arg(short, long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Send a code e-mail through the fallback chain
    SendCode {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Display name used in the greeting
        #[arg(long)]
        name: String,

        /// Code to send. A random 6-digit code is generated when omitted.
        #[arg(long)]
        code: Option<String>,

        /// Send a password reset code instead of an account verification code
        #[arg(long)]
        reset: bool,
    },

    /// Show the configured providers in try order
    Providers,
}

/// Run one CLI command.
///
/// # Errors
///
/// Returns an error if the e-mail settings are invalid, the templates fail to
/// load, or `send-code` could not deliver the message.
pub async fn run(cli: Cli) -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let settings = EmailSettings::from_env().wrap_err("Failed to load e-mail settings")?;
    info!(
        environment = ?environment,
        policy = settings.policy.name,
        sender = %settings.sender.mailbox(),
        "Loaded e-mail settings"
    );

    match cli.command {
        Commands::Probe { timeout_secs } => {
            let registry = ProviderRegistry::from_settings(&settings, TimeoutProfile::default());
            let report = probe(&registry, Duration::from_secs(timeout_secs)).await;
            print!("{}", report);
            if let Some(webhook) = &settings.webhook {
                println!("Webhook fallback: {} (not probed)", webhook.url);
            }
        }
        Commands::SendCode { to, name, code, reset } => {
            let service = EmailService::from_settings(&settings)
                .wrap_err("Failed to load e-mail templates")?;
            let code = code.unwrap_or_else(generate_code);

            let result = if reset {
                service.send_password_reset_code(&to, &code, &name).await
            } else {
                service.send_account_verification_code(&to, &code, &name).await
            };

            println!(
                "{}",
                serde_json::to_string_pretty(&result).wrap_err("Failed to encode delivery result")?
            );
            if !result.success {
                return Err(eyre!(
                    "E-mail to {} was not delivered: {}",
                    to,
                    result.error.unwrap_or_default()
                ));
            }
        }
        Commands::Providers => {
            let kinds = settings.provider_kinds();
            if kinds.is_empty() {
                println!("No e-mail providers configured.");
            }
            for (position, kind) in kinds.iter().enumerate() {
                println!("{}. {} (priority {})", position + 1, kind.name(), kind.priority());
            }
            println!(
                "Policy: {} (deadline {}s)",
                settings.policy.name,
                settings.policy.deadline.as_secs()
            );
        }
    }

    Ok(())
}
