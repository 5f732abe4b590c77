//! Line item model for lifecycle-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Line item on an invoice. Items are owned exclusively by their invoice
/// and are replaced wholesale on edit, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub account_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub quantity: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a line item.
#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub description: String,
    pub amount: Decimal,
    pub quantity: Decimal,
}
