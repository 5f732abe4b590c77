//! Notification dispatch for sent invoices.
//!
//! The dispatcher runs after a DRAFT -> SENT transition has committed.
//! Whatever happens here is observability only: the outcome lands in the
//! audit trail as `EMAIL_SENT` or `EMAIL_FAILED`, and a failure never
//! propagates back into the transition result.

pub mod email;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{EventType, InvoiceAggregate, NewEvent};
use crate::services::metrics::EMAILS_TOTAL;
use crate::services::store::InvoiceStore;

pub use email::{MockNotificationSender, SmtpNotifier};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, invoice: &InvoiceAggregate, recipient: &str) -> Result<(), NotifyError>;
    fn is_enabled(&self) -> bool;
}

/// Deliver the client-facing "invoice sent" notification and record the
/// outcome as an audit event.
pub async fn dispatch_send_notice(
    store: &dyn InvoiceStore,
    sender: &dyn NotificationSender,
    aggregate: &InvoiceAggregate,
) {
    let invoice = &aggregate.invoice;

    let outcome = match invoice.client_email.as_deref() {
        Some(recipient) => sender.send(aggregate, recipient).await,
        None => Err(NotifyError::InvalidRecipient(
            "no recipient address on file".to_string(),
        )),
    };

    let event = match outcome {
        Ok(()) => {
            info!(invoice_id = %invoice.invoice_id, "Invoice notification sent");
            EMAILS_TOTAL.with_label_values(&["sent"]).inc();
            NewEvent::new(EventType::EmailSent)
        }
        Err(err) => {
            warn!(invoice_id = %invoice.invoice_id, error = %err, "Invoice notification failed");
            EMAILS_TOTAL.with_label_values(&["failed"]).inc();
            NewEvent::new(EventType::EmailFailed).notes(Some(err.to_string()))
        }
    };

    if let Err(err) = store
        .append_event(invoice.account_id, invoice.invoice_id, &event)
        .await
    {
        error!(
            invoice_id = %invoice.invoice_id,
            error = %err,
            "Failed to record notification outcome"
        );
    }
}
