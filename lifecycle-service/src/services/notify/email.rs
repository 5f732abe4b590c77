use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::SmtpConfig;
use crate::models::InvoiceAggregate;

use super::{NotificationSender, NotifyError};

pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }

    fn compose(&self, aggregate: &InvoiceAggregate) -> String {
        let invoice = &aggregate.invoice;
        let view_link = format!(
            "{}/invoices/{}",
            self.config.public_base_url.trim_end_matches('/'),
            invoice.invoice_id
        );

        format!(
            "Hello {},\n\n\
             Invoice {} for {} {} is ready.\n\n\
             View and pay it here: {}\n\n\
             {}\n",
            invoice.client_name,
            invoice.number,
            invoice.total,
            invoice.currency,
            view_link,
            self.config.from_name
        )
    }
}

#[async_trait]
impl NotificationSender for SmtpNotifier {
    async fn send(&self, aggregate: &InvoiceAggregate, recipient: &str) -> Result<(), NotifyError> {
        if !self.config.enabled {
            return Err(NotifyError::NotEnabled(
                "SMTP notifications are not enabled".to_string(),
            ));
        }

        let transport = self.transport.as_ref().ok_or_else(|| {
            NotifyError::Configuration("SMTP transport not initialized".to_string())
        })?;

        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let invoice = &aggregate.invoice;
        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(format!(
                "Invoice {} from {}",
                invoice.number, self.config.from_name
            ))
            .header(ContentType::TEXT_PLAIN)
            .body(self.compose(aggregate))
            .map_err(|e| NotifyError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            to = %recipient,
            invoice_number = %invoice.number,
            "Invoice notification email sent"
        );

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Mock notification sender for testing.
pub struct MockNotificationSender {
    fail: bool,
    send_count: AtomicU64,
}

impl MockNotificationSender {
    pub fn new() -> Self {
        Self {
            fail: false,
            send_count: AtomicU64::new(0),
        }
    }

    /// A sender whose every dispatch fails, for exercising the
    /// `EMAIL_FAILED` path.
    pub fn failing() -> Self {
        Self {
            fail: true,
            send_count: AtomicU64::new(0),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

impl Default for MockNotificationSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    async fn send(&self, aggregate: &InvoiceAggregate, recipient: &str) -> Result<(), NotifyError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(NotifyError::SendFailed("mock transport failure".to_string()));
        }

        tracing::info!(
            to = %recipient,
            invoice_number = %aggregate.invoice.number,
            "[MOCK] Invoice notification would be sent"
        );

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
