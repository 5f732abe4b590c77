//! Invoice lifecycle state machine.
//!
//! Guards are pure predicates over the current invoice row; the executor
//! runs every transition as one atomic read-guard-write-log unit. All
//! business-rule rejections come back as [`TransitionError`] values with
//! a stable `code` — nothing in this module panics or bubbles raw store
//! errors to callers.

pub mod executor;
pub mod guards;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{InvoiceAggregate, InvoiceEvent, InvoiceStatus};
use crate::services::store::StoreError;

pub use executor::{PaymentDetails, RefundDetails, TransitionExecutor};

/// What a guard decided for a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Apply the transition's effects and append its event.
    Apply,
    /// The invoice is already in the requested state: succeed without
    /// writing anything.
    Noop,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invoice not found")]
    NotFound,

    #[error("invoice is deleted; restore it first")]
    InvoiceDeleted,

    #[error("cannot {operation} an invoice in {} status", .status.as_str())]
    InvalidStateTransition {
        operation: &'static str,
        status: InvoiceStatus,
    },

    #[error("{field} is required")]
    MissingRequiredField { field: &'static str },

    #[error("amount {supplied} does not match invoice total {expected}")]
    AmountMismatch {
        supplied: Decimal,
        expected: Decimal,
    },

    #[error("currency {supplied} does not match invoice currency {expected}")]
    CurrencyMismatch { supplied: String, expected: String },

    #[error("reference {supplied} conflicts with recorded reference {recorded}")]
    ReferenceMismatch { supplied: String, recorded: String },

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl TransitionError {
    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::NotFound => "NOT_FOUND",
            TransitionError::InvoiceDeleted => "INVOICE_DELETED",
            TransitionError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            TransitionError::MissingRequiredField { .. } => "MISSING_REQUIRED_FIELD",
            TransitionError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            TransitionError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            TransitionError::ReferenceMismatch { .. } => "REFERENCE_MISMATCH",
            TransitionError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for TransitionError {
    fn from(err: StoreError) -> Self {
        TransitionError::Internal(anyhow::Error::new(err))
    }
}

/// Successful transition: the fresh aggregate plus the audit event that
/// was appended, if the call actually changed state (`None` for an
/// idempotent no-op re-entry).
#[derive(Debug)]
pub struct TransitionOutcome {
    pub aggregate: InvoiceAggregate,
    pub event: Option<InvoiceEvent>,
}

pub type TransitionResult = Result<TransitionOutcome, TransitionError>;
