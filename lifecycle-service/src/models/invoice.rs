//! Invoice model for lifecycle-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use super::item::{InvoiceItem, NewInvoiceItem};

/// Payment channel recorded when an invoice is marked paid by hand.
pub const PAID_VIA_MANUAL: &str = "manual";

/// Invoice status. The `deleted` flag on [`Invoice`] is orthogonal to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "refunded" => InvoiceStatus::Refunded,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Invoice row.
///
/// Monetary fields hold the recomputed values; `total` is always
/// `subtotal - discount + tax1_amount + tax2_amount` and is never taken
/// from caller input.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub account_id: Uuid,
    pub number: String,
    pub status: String,
    pub deleted: bool,
    pub client_name: String,
    pub client_email: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax1_name: Option<String>,
    pub tax1_amount: Decimal,
    pub tax2_name: Option<String>,
    pub tax2_amount: Decimal,
    pub total: Decimal,
    pub payment_ref: Option<String>,
    pub refund_ref: Option<String>,
    pub paid_via: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub refunded_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Combined tax across both named components.
    pub fn tax(&self) -> Decimal {
        self.tax1_amount + self.tax2_amount
    }
}

/// Invoice together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceAggregate {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub include_deleted: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub account_id: Uuid,
    pub client_name: String,
    pub client_email: Option<String>,
    pub currency: String,
    pub discount: Decimal,
    pub tax1_name: Option<String>,
    pub tax1_amount: Decimal,
    pub tax2_name: Option<String>,
    pub tax2_amount: Decimal,
    pub notes: Option<String>,
}

/// Input for editing an invoice. Line items are replaced wholesale and
/// travel alongside this struct, never inside it.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub discount: Option<Decimal>,
    pub tax1_name: Option<String>,
    pub tax1_amount: Option<Decimal>,
    pub tax2_name: Option<String>,
    pub tax2_amount: Option<Decimal>,
    pub notes: Option<String>,
}

/// Recomputed monetary fields for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Error)]
pub enum TotalsError {
    #[error("line item amount and quantity must be non-negative")]
    NegativeItem,
    #[error("discount must be non-negative")]
    NegativeDiscount,
    #[error("tax amounts must be non-negative")]
    NegativeTax,
    #[error("total would be negative: {0}")]
    NegativeTotal(Decimal),
}

/// Recompute invoice totals from line items and invoice-level adjustments.
///
/// `total == subtotal - discount + tax` must hold for every persisted
/// invoice, so both storage backends call this instead of trusting
/// caller-supplied figures.
pub fn compute_totals(
    items: &[NewInvoiceItem],
    discount: Decimal,
    tax1_amount: Decimal,
    tax2_amount: Decimal,
) -> Result<Totals, TotalsError> {
    if discount < Decimal::ZERO {
        return Err(TotalsError::NegativeDiscount);
    }
    if tax1_amount < Decimal::ZERO || tax2_amount < Decimal::ZERO {
        return Err(TotalsError::NegativeTax);
    }

    let mut subtotal = Decimal::ZERO;
    for item in items {
        if item.amount < Decimal::ZERO || item.quantity < Decimal::ZERO {
            return Err(TotalsError::NegativeItem);
        }
        subtotal += item.amount * item.quantity;
    }

    let tax_total = tax1_amount + tax2_amount;
    let total = subtotal - discount + tax_total;
    if total < Decimal::ZERO {
        return Err(TotalsError::NegativeTotal(total));
    }

    Ok(Totals {
        subtotal,
        tax_total,
        total,
    })
}
