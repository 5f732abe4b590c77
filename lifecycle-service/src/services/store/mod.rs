//! Storage backends for lifecycle-service.
//!
//! The engine talks to persistence through [`InvoiceStore`]. Two backends
//! implement it: a Postgres backend for deployment and an in-memory
//! backend for tests and credential-less development. Transition writes
//! go through [`InvoiceStore::apply_transition`], which combines the
//! field update and the audit-event append in one atomic unit guarded by
//! the caller's expected state, so a request that lost a race observes
//! the winner's committed state on re-read instead of clobbering it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Account, CreateInvoice, InvoiceAggregate, InvoiceEvent, InvoiceStatus, ListInvoicesFilter,
    NewEvent, NewInvoiceItem, UpdateInvoice,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// State a transition write is conditioned on. If the row no longer
/// matches by commit time, the write is refused and the caller re-reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedState {
    pub status: InvoiceStatus,
    pub deleted: bool,
}

/// Field changes applied by a transition. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub deleted: Option<bool>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub refunded_utc: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub refund_ref: Option<String>,
    pub paid_via: Option<String>,
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    // Accounts

    async fn create_account(
        &self,
        name: &str,
        processor_account_id: Option<&str>,
    ) -> Result<Account, StoreError>;

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Record the processor-side payout status on the matching account.
    /// Returns false when no account carries that processor id.
    async fn set_account_payout_status(
        &self,
        processor_account_id: &str,
        payouts_enabled: bool,
    ) -> Result<bool, StoreError>;

    // Invoices

    /// Create a draft invoice with its items. Totals are recomputed from
    /// the items inside the same transaction; the invoice number is
    /// assigned from the per-account sequence.
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<InvoiceAggregate, StoreError>;

    async fn get_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceAggregate>, StoreError>;

    async fn list_invoices(
        &self,
        account_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<crate::models::Invoice>, StoreError>;

    /// Replace the invoice's items wholesale and recompute totals in one
    /// transaction. Refused (returns `None`) when the invoice is missing
    /// or soft-deleted, so a caller never observes an invoice with new
    /// items and stale totals or vice versa.
    async fn replace_items(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        update: &UpdateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<Option<InvoiceAggregate>, StoreError>;

    /// Apply a transition: update invoice fields and append the audit
    /// event atomically, conditioned on `expected`. Returns `None` when
    /// the row no longer matches `expected` (a concurrent transition won).
    async fn apply_transition(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        expected: &ExpectedState,
        patch: &InvoicePatch,
        event: Option<&NewEvent>,
    ) -> Result<Option<(InvoiceAggregate, Option<InvoiceEvent>)>, StoreError>;

    // Events

    /// Append an audit event outside a transition (notification outcomes).
    async fn append_event(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        event: &NewEvent,
    ) -> Result<InvoiceEvent, StoreError>;

    async fn list_events(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceEvent>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
