//! Notification channel trait

use thiserror::Error;

/// Errors from notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Mail is not configured")]
    NotConfigured,

    #[error("Invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("No recipients")]
    NoRecipients,

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport failed: {0}")]
    Transport(String),
}

impl From<NotifyError> for tenure_util::TenureError {
    fn from(e: NotifyError) -> Self {
        tenure_util::TenureError::notify(e.to_string())
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Delivers a message to a set of recipients.
///
/// `Ok(())` means the transport confirmed the hand-off; anything else
/// counts as not sent.
pub trait NotificationChannel: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn send(&self, recipients: &[String], subject: &str, body: &str) -> NotifyResult<()>;
}

/// Channel used when no mail transport is configured; every send fails so
/// pending alerts stay pending
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledChannel;

impl NotificationChannel for DisabledChannel {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn send(&self, _recipients: &[String], _subject: &str, _body: &str) -> NotifyResult<()> {
        Err(NotifyError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_channel_never_sends() {
        let result = DisabledChannel.send(&["a@example.com".into()], "s", "b");
        assert!(matches!(result, Err(NotifyError::NotConfigured)));
    }
}
