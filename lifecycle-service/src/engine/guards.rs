//! Transition guards.
//!
//! Pure predicates over the invoice row the executor just read. Each
//! returns a [`Plan`] (apply or idempotent no-op) or a
//! [`TransitionError`] rejection; none of them touch storage.

use rust_decimal::Decimal;

use crate::models::{Invoice, InvoiceStatus};

use super::{Plan, TransitionError};

/// Universal guard: a deleted invoice only accepts Restore.
pub fn ensure_not_deleted(invoice: &Invoice) -> Result<(), TransitionError> {
    if invoice.deleted {
        Err(TransitionError::InvoiceDeleted)
    } else {
        Ok(())
    }
}

fn require_reference(value: &str, field: &'static str) -> Result<(), TransitionError> {
    if value.trim().is_empty() {
        Err(TransitionError::MissingRequiredField { field })
    } else {
        Ok(())
    }
}

pub fn plan_send(invoice: &Invoice) -> Result<Plan, TransitionError> {
    ensure_not_deleted(invoice)?;
    match invoice.status() {
        InvoiceStatus::Draft => Ok(Plan::Apply),
        InvoiceStatus::Sent => Ok(Plan::Noop),
        status => Err(TransitionError::InvalidStateTransition {
            operation: "send",
            status,
        }),
    }
}

/// Guard for marking an invoice paid, manually or from a processor
/// callback. Any non-deleted status may move to paid; a repeat call with
/// the recorded reference is a no-op, and a differing reference is a
/// conflict rather than a silent overwrite of the audit fields.
pub fn plan_mark_paid(
    invoice: &Invoice,
    payment_ref: &str,
    amount: Option<Decimal>,
    currency: Option<&str>,
) -> Result<Plan, TransitionError> {
    ensure_not_deleted(invoice)?;
    require_reference(payment_ref, "payment_ref")?;

    if let Some(supplied) = amount {
        if supplied != invoice.total {
            return Err(TransitionError::AmountMismatch {
                supplied,
                expected: invoice.total,
            });
        }
    }
    if let Some(supplied) = currency {
        if !supplied.eq_ignore_ascii_case(&invoice.currency) {
            return Err(TransitionError::CurrencyMismatch {
                supplied: supplied.to_string(),
                expected: invoice.currency.clone(),
            });
        }
    }

    if invoice.status() == InvoiceStatus::Paid {
        return match invoice.payment_ref.as_deref() {
            Some(recorded) if recorded == payment_ref => Ok(Plan::Noop),
            Some(recorded) => Err(TransitionError::ReferenceMismatch {
                supplied: payment_ref.to_string(),
                recorded: recorded.to_string(),
            }),
            None => Ok(Plan::Apply),
        };
    }

    Ok(Plan::Apply)
}

pub fn plan_refund(invoice: &Invoice, refund_ref: &str) -> Result<Plan, TransitionError> {
    ensure_not_deleted(invoice)?;
    require_reference(refund_ref, "refund_ref")?;

    if invoice.status() == InvoiceStatus::Refunded {
        return match invoice.refund_ref.as_deref() {
            Some(recorded) if recorded == refund_ref => Ok(Plan::Noop),
            Some(recorded) => Err(TransitionError::ReferenceMismatch {
                supplied: refund_ref.to_string(),
                recorded: recorded.to_string(),
            }),
            None => Ok(Plan::Apply),
        };
    }

    Ok(Plan::Apply)
}

/// Soft delete is allowed from any status; deleting twice is a no-op.
pub fn plan_soft_delete(invoice: &Invoice) -> Plan {
    if invoice.deleted {
        Plan::Noop
    } else {
        Plan::Apply
    }
}

/// Restore is the one operation permitted on a deleted invoice;
/// restoring a live invoice is a no-op.
pub fn plan_restore(invoice: &Invoice) -> Plan {
    if invoice.deleted {
        Plan::Apply
    } else {
        Plan::Noop
    }
}
