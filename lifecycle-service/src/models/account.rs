//! Account model for lifecycle-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Owning account for invoices.
///
/// `payouts_enabled` mirrors the payment processor's connected-account
/// status. It is a plain attribute updated from `account.updated` webhook
/// events and is read from persisted state on every request; it never
/// feeds into invoice transition guards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    pub name: String,
    pub processor_account_id: Option<String>,
    pub payouts_enabled: bool,
    pub created_utc: DateTime<Utc>,
}
