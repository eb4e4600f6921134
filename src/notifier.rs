//! Outbound verification email
//!
//! The account engine only knows the [`Notifier`] trait. Two
//! implementations ship with the crate:
//!
//! - [`WebhookNotifier`] POSTs a rendered message to an HTTP email relay
//! - [`LogNotifier`] writes the delivery to the log, for local development
//!
//! Tests use `testing::RecordingNotifier`.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const SUBJECT: &str = "Email Verification - Task Management System";

/// Delivery failures
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("email relay unreachable: {0}")]
    Transport(String),
    #[error("email relay rejected the message with status {0}")]
    Rejected(u16),
    #[error("email relay timed out")]
    Timeout,
}

/// One verification code to deliver
#[derive(Debug, Clone)]
pub struct OtpEmail {
    pub to: String,
    pub recipient_name: String,
    pub code: String,
    pub expires_in_minutes: u64,
}

impl OtpEmail {
    /// Plain-text body
    pub fn text_body(&self) -> String {
        format!(
            "Hello {name},\n\n\
             Your verification code is {code}.\n\
             It is valid for {minutes} minutes. Do not share this code with anyone.\n\n\
             If you did not request this, please ignore this email.",
            name = self.recipient_name,
            code = self.code,
            minutes = self.expires_in_minutes,
        )
    }

    /// HTML body
    pub fn html_body(&self) -> String {
        format!(
            "<p>Hello <strong>{name}</strong>,</p>\
             <p>Please use the following code to verify your email address:</p>\
             <p style=\"font-size:32px;font-weight:bold;letter-spacing:8px\">{code}</p>\
             <p>Valid for {minutes} minutes. Do not share this code with anyone.</p>",
            name = html_escape(&self.recipient_name),
            code = self.code,
            minutes = self.expires_in_minutes,
        )
    }
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Sends verification codes to users
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(&self, email: &OtpEmail) -> Result<(), DeliveryError>;
}

// ============================================================================
// HTTP relay
// ============================================================================

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
    html: String,
}

/// Delivers through an HTTP email relay
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: String,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            from: from.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_otp(&self, email: &OtpEmail) -> Result<(), DeliveryError> {
        let message = RelayMessage {
            from: &self.from,
            to: &email.to,
            subject: SUBJECT,
            text: email.text_body(),
            html: email.html_body(),
        };

        let mut request = self.client.post(&self.url).json(&message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(to = %email.to, status = status.as_u16(), "Email relay rejected verification email");
            return Err(DeliveryError::Rejected(status.as_u16()));
        }

        info!(to = %email.to, "Verification email sent");
        Ok(())
    }
}

// ============================================================================
// Log sink
// ============================================================================

/// Writes deliveries to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp(&self, email: &OtpEmail) -> Result<(), DeliveryError> {
        info!(to = %email.to, subject = SUBJECT, "Verification email (log delivery)");
        debug!(to = %email.to, code = %email.code, "Verification code");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OtpEmail {
        OtpEmail {
            to: "alice@example.com".into(),
            recipient_name: "Alice <script>".into(),
            code: "123456".into(),
            expires_in_minutes: 10,
        }
    }

    #[test]
    fn test_bodies_carry_code_and_expiry() {
        let email = email();
        assert!(email.text_body().contains("123456"));
        assert!(email.text_body().contains("10 minutes"));
        assert!(email.html_body().contains("123456"));
    }

    #[test]
    fn test_html_escapes_name() {
        let html = email().html_body();
        assert!(html.contains("Alice &lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.send_otp(&email()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:9/send",
            None,
            "noreply@example.com",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = notifier.send_otp(&email()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_) | DeliveryError::Timeout));
    }
}
