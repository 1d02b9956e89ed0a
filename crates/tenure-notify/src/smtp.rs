//! SMTP delivery through lettre

use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tenure_config::{MailConfig, TlsMode};
use tracing::debug;

use crate::{NotificationChannel, NotifyError, NotifyResult};

/// Sends plain-text mail through a configured relay
pub struct SmtpChannel {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpChannel {
    pub fn from_config(config: &MailConfig) -> NotifyResult<Self> {
        let from: Mailbox = config.from.parse().map_err(|e: lettre::address::AddressError| {
            NotifyError::InvalidAddress {
                address: config.from.clone(),
                message: e.to_string(),
            }
        })?;

        let builder = match config.tls {
            TlsMode::StartTls => SmtpTransport::starttls_relay(&config.host),
            TlsMode::Wrapper => SmtpTransport::relay(&config.host),
            TlsMode::None => Ok(SmtpTransport::builder_dangerous(&config.host)),
        }
        .map_err(|e| NotifyError::Transport(format!("Failed to create SMTP transport: {}", e)))?
        .port(config.port);

        let builder = match config.credentials() {
            Some((username, password)) => builder.credentials(Credentials::new(username, password)),
            None => builder,
        };

        debug!(host = %config.host, port = config.port, "SMTP channel configured");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, recipients: &[String], subject: &str, body: &str) -> NotifyResult<Message> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in recipients {
            let mailbox: Mailbox =
                recipient
                    .parse()
                    .map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
                        address: recipient.clone(),
                        message: e.to_string(),
                    })?;
            builder = builder.to(mailbox);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

impl NotificationChannel for SmtpChannel {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn send(&self, recipients: &[String], subject: &str, body: &str) -> NotifyResult<()> {
        let message = self.build_message(recipients, subject, body)?;

        self.transport
            .send(&message)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        debug!(recipients = recipients.len(), subject, "Mail handed to relay");
        Ok(())
    }
}
