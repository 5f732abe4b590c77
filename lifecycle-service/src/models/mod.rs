//! Domain models for lifecycle-service.

mod account;
mod event;
mod invoice;
mod item;

pub use account::Account;
pub use event::{EventType, InvoiceEvent, NewEvent};
pub use invoice::{
    compute_totals, CreateInvoice, Invoice, InvoiceAggregate, InvoiceStatus, ListInvoicesFilter,
    Totals, TotalsError, UpdateInvoice, PAID_VIA_MANUAL,
};
pub use item::{InvoiceItem, NewInvoiceItem};
