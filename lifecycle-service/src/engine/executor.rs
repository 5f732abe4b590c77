//! Transition executor.
//!
//! Every operation runs the same loop: fresh read, pure guard
//! evaluation, then a conditional write that only lands if the row still
//! matches the state the guards saw. A lost race surfaces as a refused
//! write, and the loop re-reads so the second request evaluates its
//! guards against the winner's committed state.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{EventType, InvoiceStatus, NewEvent, PAID_VIA_MANUAL};
use crate::services::metrics::TRANSITIONS_TOTAL;
use crate::services::notify::{dispatch_send_notice, NotificationSender};
use crate::services::store::{ExpectedState, InvoicePatch, InvoiceStore};

use super::{guards, Plan, TransitionError, TransitionOutcome, TransitionResult};

/// Re-reads before a contended transition gives up. Two racing requests
/// settle in one retry; this bound only exists to turn a pathological
/// livelock into an error instead of a spin.
const MAX_APPLY_ATTEMPTS: usize = 3;

/// Details for recording a manual payment.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub payment_ref: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

/// Details for recording a refund.
#[derive(Debug, Clone)]
pub struct RefundDetails {
    pub refund_ref: String,
    pub notes: Option<String>,
}

pub struct TransitionExecutor {
    store: Arc<dyn InvoiceStore>,
    notifier: Arc<dyn NotificationSender>,
    processor_name: String,
}

impl TransitionExecutor {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        notifier: Arc<dyn NotificationSender>,
        processor_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            processor_name: processor_name.into(),
        }
    }

    #[instrument(skip(self, notes), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        actor_id: Option<Uuid>,
        notes: Option<String>,
    ) -> TransitionResult {
        let outcome = self
            .run("send", account_id, invoice_id, |invoice| {
                match guards::plan_send(invoice)? {
                    Plan::Noop => Ok(None),
                    Plan::Apply => Ok(Some((
                        InvoicePatch {
                            status: Some(InvoiceStatus::Sent),
                            sent_utc: Some(Utc::now()),
                            ..Default::default()
                        },
                        NewEvent::new(EventType::Sent)
                            .actor(actor_id)
                            .notes(notes.clone()),
                    ))),
                }
            })
            .await?;

        // Dispatch happens after the transition commits and only on a
        // real DRAFT -> SENT move; its outcome is recorded as an event
        // and never reverts or fails the transition.
        if outcome.event.is_some() {
            dispatch_send_notice(
                self.store.as_ref(),
                self.notifier.as_ref(),
                &outcome.aggregate,
            )
            .await;
        }

        Ok(outcome)
    }

    #[instrument(skip(self, details), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn mark_invoice_paid(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        actor_id: Option<Uuid>,
        details: PaymentDetails,
    ) -> TransitionResult {
        self.run("mark_paid", account_id, invoice_id, |invoice| {
            match guards::plan_mark_paid(
                invoice,
                &details.payment_ref,
                details.amount,
                details.currency.as_deref(),
            )? {
                Plan::Noop => Ok(None),
                Plan::Apply => Ok(Some((
                    InvoicePatch {
                        status: Some(InvoiceStatus::Paid),
                        paid_utc: Some(Utc::now()),
                        payment_ref: Some(details.payment_ref.clone()),
                        paid_via: Some(PAID_VIA_MANUAL.to_string()),
                        ..Default::default()
                    },
                    NewEvent::new(EventType::Paid)
                        .actor(actor_id)
                        .reference(details.payment_ref.clone())
                        .notes(details.notes.clone()),
                ))),
            }
        })
        .await
    }

    #[instrument(skip(self, details), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn refund_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        actor_id: Option<Uuid>,
        details: RefundDetails,
    ) -> TransitionResult {
        self.run("refund", account_id, invoice_id, |invoice| {
            match guards::plan_refund(invoice, &details.refund_ref)? {
                Plan::Noop => Ok(None),
                Plan::Apply => Ok(Some((
                    InvoicePatch {
                        status: Some(InvoiceStatus::Refunded),
                        refunded_utc: Some(Utc::now()),
                        refund_ref: Some(details.refund_ref.clone()),
                        ..Default::default()
                    },
                    NewEvent::new(EventType::Refunded)
                        .actor(actor_id)
                        .reference(details.refund_ref.clone())
                        .notes(details.notes.clone()),
                ))),
            }
        })
        .await
    }

    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn soft_delete_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> TransitionResult {
        self.run("soft_delete", account_id, invoice_id, |invoice| {
            match guards::plan_soft_delete(invoice) {
                Plan::Noop => Ok(None),
                Plan::Apply => Ok(Some((
                    InvoicePatch {
                        deleted: Some(true),
                        ..Default::default()
                    },
                    NewEvent::new(EventType::SoftDelete).actor(actor_id),
                ))),
            }
        })
        .await
    }

    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn restore_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> TransitionResult {
        self.run("restore", account_id, invoice_id, |invoice| {
            match guards::plan_restore(invoice) {
                Plan::Noop => Ok(None),
                Plan::Apply => Ok(Some((
                    InvoicePatch {
                        deleted: Some(false),
                        ..Default::default()
                    },
                    NewEvent::new(EventType::Restore).actor(actor_id),
                ))),
            }
        })
        .await
    }

    /// Record a processor-confirmed payment. Same guard path as
    /// [`mark_invoice_paid`], so the audit trail and idempotency rules
    /// are identical whichever way a payment arrives; only `paid_via`
    /// differs.
    ///
    /// [`mark_invoice_paid`]: Self::mark_invoice_paid
    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn record_external_payment(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        processor_ref: &str,
        amount: Decimal,
        currency: &str,
    ) -> TransitionResult {
        let paid_via = self.processor_name.clone();
        self.run("record_external_payment", account_id, invoice_id, |invoice| {
            match guards::plan_mark_paid(invoice, processor_ref, Some(amount), Some(currency))? {
                Plan::Noop => Ok(None),
                Plan::Apply => Ok(Some((
                    InvoicePatch {
                        status: Some(InvoiceStatus::Paid),
                        paid_utc: Some(Utc::now()),
                        payment_ref: Some(processor_ref.to_string()),
                        paid_via: Some(paid_via.clone()),
                        ..Default::default()
                    },
                    NewEvent::new(EventType::Paid)
                        .reference(processor_ref.to_string())
                        .notes(Some(format!("recorded via {}", paid_via))),
                ))),
            }
        })
        .await
    }

    async fn run<F>(
        &self,
        operation: &'static str,
        account_id: Uuid,
        invoice_id: Uuid,
        plan: F,
    ) -> TransitionResult
    where
        F: Fn(&crate::models::Invoice) -> Result<Option<(InvoicePatch, NewEvent)>, TransitionError>,
    {
        let result = self.run_inner(account_id, invoice_id, plan).await;

        let outcome_label = match &result {
            Ok(outcome) if outcome.event.is_some() => "applied",
            Ok(_) => "noop",
            Err(err) => err.code(),
        };
        TRANSITIONS_TOTAL
            .with_label_values(&[operation, outcome_label])
            .inc();

        result
    }

    async fn run_inner<F>(&self, account_id: Uuid, invoice_id: Uuid, plan: F) -> TransitionResult
    where
        F: Fn(&crate::models::Invoice) -> Result<Option<(InvoicePatch, NewEvent)>, TransitionError>,
    {
        for attempt in 0..MAX_APPLY_ATTEMPTS {
            let aggregate = self.store.get_invoice(account_id, invoice_id).await?;
            let Some(aggregate) = aggregate else {
                return Err(TransitionError::NotFound);
            };
            let invoice = &aggregate.invoice;

            let Some((patch, event)) = plan(invoice)? else {
                return Ok(TransitionOutcome {
                    aggregate,
                    event: None,
                });
            };

            let expected = ExpectedState {
                status: invoice.status(),
                deleted: invoice.deleted,
            };
            match self
                .store
                .apply_transition(account_id, invoice_id, &expected, &patch, Some(&event))
                .await?
            {
                Some((aggregate, event)) => {
                    return Ok(TransitionOutcome { aggregate, event });
                }
                None => {
                    debug!(attempt = attempt, "Transition lost a race, re-reading");
                }
            }
        }

        Err(TransitionError::Internal(anyhow::anyhow!(
            "transition kept losing races after {} attempts",
            MAX_APPLY_ATTEMPTS
        )))
    }
}
