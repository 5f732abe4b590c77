//! Audit event model for lifecycle-service.
//!
//! Invoice events are append-only. The storage layer exposes no update or
//! delete path for them, and the Postgres schema backs that up with a
//! trigger that rejects both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event type. One row is written per *successful* state mutation;
/// guard rejections and idempotent no-op re-entries write nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Sent,
    Paid,
    Refunded,
    SoftDelete,
    Restore,
    EmailSent,
    EmailFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Sent => "SENT",
            EventType::Paid => "PAID",
            EventType::Refunded => "REFUNDED",
            EventType::SoftDelete => "SOFT_DELETE",
            EventType::Restore => "RESTORE",
            EventType::EmailSent => "EMAIL_SENT",
            EventType::EmailFailed => "EMAIL_FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PAID" => EventType::Paid,
            "REFUNDED" => EventType::Refunded,
            "SOFT_DELETE" => EventType::SoftDelete,
            "RESTORE" => EventType::Restore,
            "EMAIL_SENT" => EventType::EmailSent,
            "EMAIL_FAILED" => EventType::EmailFailed,
            _ => EventType::Sent,
        }
    }
}

/// Audit event row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceEvent {
    pub event_id: Uuid,
    pub invoice_id: Uuid,
    pub account_id: Uuid,
    pub event_type: String,
    /// Who triggered the transition; absent for system or webhook origins.
    pub actor_id: Option<Uuid>,
    /// Payment or refund reference associated with the transition, if any.
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl InvoiceEvent {
    pub fn event_type(&self) -> EventType {
        EventType::from_string(&self.event_type)
    }
}

/// Input for appending an audit event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub actor_id: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl NewEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            actor_id: None,
            reference: None,
            notes: None,
        }
    }

    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}
