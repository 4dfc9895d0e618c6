//! Out-of-band notifications to users.
//!
//! - [`NotificationDispatcher`] is the seam the workflows send through.
//! - [`ResendMailer`] delivers via the Resend-compatible HTTP email API.
//! - [`templates`] renders the credential and backup emails.

pub mod resend;
pub mod templates;

use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::retry::RetryableError;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use resend::ResendMailer;

/// A plain-text email. Wiped on drop since bodies carry credentials.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Set on backups that carry only the custodied posting credential.
    pub partial_backup: bool,
}

impl std::fmt::Debug for EmailMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bodies carry credentials.
        f.debug_struct("EmailMessage")
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("text", &"<redacted>")
            .field("partial_backup", &self.partial_backup)
            .finish()
    }
}

/// Errors that can occur while dispatching a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Email request error: {0}")]
    Request(String),

    #[error("Email API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Email request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Email client configuration error: {0}")]
    Config(String),
}

impl RetryableError for NotificationError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Delivers messages to a user's contact address.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Send `message`; returns the provider's message id when it reports one.
    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, NotificationError>;
}
