//! Mock notification channel for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{NotificationChannel, NotifyError, NotifyResult};

/// A message the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mock channel for unit/integration testing
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    sent: Arc<Mutex<Vec<SentMessage>>>,

    /// Configure send to fail
    pub fail_send: Arc<AtomicBool>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose transport is down
    pub fn failing() -> Self {
        let channel = Self::new();
        channel.set_fail(true);
        channel
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl NotificationChannel for MockChannel {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn send(&self, recipients: &[String], subject: &str, body: &str) -> NotifyResult<()> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("Mock send failure".into()));
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sends() {
        let channel = MockChannel::new();
        channel
            .send(&["a@example.com".into()], "Hola", "Cuerpo")
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Hola");
    }

    #[test]
    fn clones_share_state() {
        let channel = MockChannel::new();
        let handle = channel.clone();
        handle.set_fail(true);
        assert!(channel.send(&["a@example.com".into()], "s", "b").is_err());

        handle.set_fail(false);
        channel.send(&["a@example.com".into()], "s", "b").unwrap();
        assert_eq!(handle.sent_count(), 1);
    }

    #[test]
    fn rejects_empty_recipients() {
        let channel = MockChannel::new();
        assert!(matches!(channel.send(&[], "s", "b"), Err(NotifyError::NoRecipients)));
    }
}
