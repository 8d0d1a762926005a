//! Code e-mail templates.
//!
//! Rendering is pure: the generation time is an input, so the same inputs
//! always produce byte-identical HTML. Handlebars runs in strict mode, so a
//! missing field is a render error rather than an empty string. Body values
//! are HTML-escaped by Handlebars; subjects are not.

use crate::error::TemplateError;
use crate::models::Message;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;

/// How long a mailed code stays valid.
pub const CODE_VALIDITY_MINUTES: u32 = 10;

const VERIFICATION_TEMPLATE: &str = "account_verification_code";
const PASSWORD_RESET_TEMPLATE: &str = "password_reset_code";

// Subjects are plain text headers, not HTML.
const VERIFICATION_SUBJECT: &str = "{{{brand}}}: your verification code";
const PASSWORD_RESET_SUBJECT: &str = "{{{brand}}}: your password reset code";

const VERIFICATION_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: #2563eb;">Confirm your e-mail address</h1>
    <p>Hello {{name}},</p>
    <p>Thanks for signing up with <strong>{{brand}}</strong>.
       Enter this code to verify your account:</p>
    <p style="text-align: center; margin: 30px 0;
              font-size: 32px; font-weight: bold; letter-spacing: 6px;">{{code}}</p>
    <p style="color: #666; font-size: 14px;">This code expires in {{validity_minutes}} minutes.</p>
    <p style="color: #666; font-size: 14px;">
       If you didn't create an account, you can safely ignore this email.</p>
    <p style="color: #999; font-size: 12px;">Requested on {{generated_at}}</p>
    <p>Best regards,<br>The {{brand}} Team</p>
</body>
</html>"#;

const PASSWORD_RESET_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: #dc2626;">Reset your password</h1>
    <p>Hello {{name}},</p>
    <p>We received a request to reset the password for your <strong>{{brand}}</strong> account.
       Use this code to continue:</p>
    <p style="text-align: center; margin: 30px 0;
              font-size: 32px; font-weight: bold; letter-spacing: 6px;">{{code}}</p>
    <p style="color: #666; font-size: 14px;">This code expires in {{validity_minutes}} minutes.</p>
    <p style="color: #666; font-size: 14px;">
       If you didn't request this, please ignore this email.
       Your password will remain unchanged.</p>
    <p style="color: #999; font-size: 12px;">Requested on {{generated_at}}</p>
    <p>Best regards,<br>The {{brand}} Team</p>
</body>
</html>"#;

/// Inputs for one code mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEmail {
    pub to: String,
    pub display_name: String,
    pub code: String,
    pub generated_at: DateTime<Utc>,
}

impl CodeEmail {
    pub fn new(
        to: impl Into<String>,
        display_name: impl Into<String>,
        code: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            to: to.into(),
            display_name: display_name.into(),
            code: code.into(),
            generated_at,
        }
    }
}

#[derive(Serialize)]
struct CodeContext<'a> {
    brand: &'a str,
    name: &'a str,
    code: &'a str,
    validity_minutes: u32,
    generated_at: String,
}

/// e.g. `March 7, 2026 at 14:05 UTC`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%B %-d, %Y at %H:%M UTC").to_string()
}

/// Handlebars registry with the code templates preloaded.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    brand: String,
}

impl TemplateEngine {
    pub fn new(brand: impl Into<String>) -> Result<Self, TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        let templates = [
            (format!("{}_subject", VERIFICATION_TEMPLATE), VERIFICATION_SUBJECT),
            (format!("{}_html", VERIFICATION_TEMPLATE), VERIFICATION_HTML),
            (format!("{}_subject", PASSWORD_RESET_TEMPLATE), PASSWORD_RESET_SUBJECT),
            (format!("{}_html", PASSWORD_RESET_TEMPLATE), PASSWORD_RESET_HTML),
        ];
        for (name, source) in templates {
            handlebars
                .register_template_string(&name, source)
                .map_err(|e| TemplateError::Register {
                    name: name.clone(),
                    details: e.to_string(),
                })?;
        }

        Ok(Self {
            handlebars,
            brand: brand.into(),
        })
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn render_verification_code(
        &self,
        from: &str,
        email: &CodeEmail,
    ) -> Result<Message, TemplateError> {
        self.render(VERIFICATION_TEMPLATE, from, email)
    }

    pub fn render_password_reset_code(
        &self,
        from: &str,
        email: &CodeEmail,
    ) -> Result<Message, TemplateError> {
        self.render(PASSWORD_RESET_TEMPLATE, from, email)
    }

    fn render(
        &self,
        template: &str,
        from: &str,
        email: &CodeEmail,
    ) -> Result<Message, TemplateError> {
        let context = CodeContext {
            brand: &self.brand,
            name: &email.display_name,
            code: &email.code,
            validity_minutes: CODE_VALIDITY_MINUTES,
            generated_at: format_timestamp(&email.generated_at),
        };

        let subject = self.render_part(&format!("{}_subject", template), &context)?;
        let html_body = self.render_part(&format!("{}_html", template), &context)?;

        Ok(Message::new(from, &email.to, subject, html_body))
    }

    fn render_part(&self, name: &str, context: &CodeContext<'_>) -> Result<String, TemplateError> {
        self.handlebars
            .render(name, context)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                details: e.to_string(),
            })
    }
}
