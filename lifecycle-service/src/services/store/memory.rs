//! In-memory storage backend.
//!
//! Backs the test suite and credential-less local runs. A single mutex
//! serializes every mutation, which gives the same guarantee the
//! Postgres backend gets from transactional conditional updates: a
//! transition is applied against the state it was guarded on, or not at
//! all.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    compute_totals, Account, CreateInvoice, Invoice, InvoiceAggregate, InvoiceEvent, InvoiceItem,
    ListInvoicesFilter, NewEvent, NewInvoiceItem, UpdateInvoice,
};

use super::{ExpectedState, InvoicePatch, InvoiceStore, StoreError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    invoices: HashMap<Uuid, Invoice>,
    items: HashMap<Uuid, Vec<InvoiceItem>>,
    events: HashMap<Uuid, Vec<InvoiceEvent>>,
    number_seq: HashMap<Uuid, u32>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn make_items(
    account_id: Uuid,
    invoice_id: Uuid,
    items: &[NewInvoiceItem],
) -> Vec<InvoiceItem> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id,
            account_id,
            description: item.description.clone(),
            amount: item.amount,
            quantity: item.quantity,
            sort_order: idx as i32,
            created_utc: Utc::now(),
        })
        .collect()
}

fn make_event(account_id: Uuid, invoice_id: Uuid, event: &NewEvent) -> InvoiceEvent {
    InvoiceEvent {
        event_id: Uuid::new_v4(),
        invoice_id,
        account_id,
        event_type: event.event_type.as_str().to_string(),
        actor_id: event.actor_id,
        reference: event.reference.clone(),
        notes: event.notes.clone(),
        created_utc: Utc::now(),
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn create_account(
        &self,
        name: &str,
        processor_account_id: Option<&str>,
    ) -> Result<Account, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(pid) = processor_account_id {
            if inner
                .accounts
                .values()
                .any(|a| a.processor_account_id.as_deref() == Some(pid))
            {
                return Err(StoreError::Conflict(format!(
                    "Account already registered for processor id {:?}",
                    pid
                )));
            }
        }

        let account = Account {
            account_id: Uuid::new_v4(),
            name: name.to_string(),
            processor_account_id: processor_account_id.map(|s| s.to_string()),
            payouts_enabled: false,
            created_utc: Utc::now(),
        };
        inner.accounts.insert(account.account_id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&account_id).cloned())
    }

    async fn set_account_payout_status(
        &self,
        processor_account_id: &str,
        payouts_enabled: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        for account in inner.accounts.values_mut() {
            if account.processor_account_id.as_deref() == Some(processor_account_id) {
                account.payouts_enabled = payouts_enabled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<InvoiceAggregate, StoreError> {
        let totals = compute_totals(items, input.discount, input.tax1_amount, input.tax2_amount)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut inner = self.inner.lock().await;

        let seq = inner.number_seq.entry(input.account_id).or_insert(0);
        *seq += 1;
        let number = format!("INV-{:04}", seq);

        let invoice_id = Uuid::new_v4();
        let invoice = Invoice {
            invoice_id,
            account_id: input.account_id,
            number,
            status: "draft".to_string(),
            deleted: false,
            client_name: input.client_name.clone(),
            client_email: input.client_email.clone(),
            currency: input.currency.clone(),
            subtotal: totals.subtotal,
            discount: input.discount,
            tax1_name: input.tax1_name.clone(),
            tax1_amount: input.tax1_amount,
            tax2_name: input.tax2_name.clone(),
            tax2_amount: input.tax2_amount,
            total: totals.total,
            payment_ref: None,
            refund_ref: None,
            paid_via: None,
            notes: input.notes.clone(),
            created_utc: Utc::now(),
            sent_utc: None,
            paid_utc: None,
            refunded_utc: None,
        };

        let created_items = make_items(input.account_id, invoice_id, items);
        inner.invoices.insert(invoice_id, invoice.clone());
        inner.items.insert(invoice_id, created_items.clone());
        inner.events.insert(invoice_id, Vec::new());

        Ok(InvoiceAggregate {
            invoice,
            items: created_items,
        })
    }

    async fn get_invoice(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceAggregate>, StoreError> {
        let inner = self.inner.lock().await;
        let invoice = inner
            .invoices
            .get(&invoice_id)
            .filter(|inv| inv.account_id == account_id)
            .cloned();
        Ok(invoice.map(|invoice| InvoiceAggregate {
            items: inner.items.get(&invoice_id).cloned().unwrap_or_default(),
            invoice,
        }))
    }

    async fn list_invoices(
        &self,
        account_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, StoreError> {
        let inner = self.inner.lock().await;
        let limit = filter.page_size.clamp(1, 100) as usize;

        let mut invoices: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|inv| inv.account_id == account_id)
            .filter(|inv| filter.include_deleted || !inv.deleted)
            .filter(|inv| {
                filter
                    .status
                    .map(|s| inv.status() == s)
                    .unwrap_or(true)
            })
            .filter(|inv| {
                filter
                    .page_token
                    .map(|cursor| inv.invoice_id > cursor)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        invoices.sort_by_key(|inv| inv.invoice_id);
        invoices.truncate(limit);
        Ok(invoices)
    }

    async fn replace_items(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        update: &UpdateInvoice,
        items: &[NewInvoiceItem],
    ) -> Result<Option<InvoiceAggregate>, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(existing) = inner
            .invoices
            .get(&invoice_id)
            .filter(|inv| inv.account_id == account_id && !inv.deleted)
            .cloned()
        else {
            return Ok(None);
        };

        let discount = update.discount.unwrap_or(existing.discount);
        let tax1_amount = update.tax1_amount.unwrap_or(existing.tax1_amount);
        let tax2_amount = update.tax2_amount.unwrap_or(existing.tax2_amount);
        let totals = compute_totals(items, discount, tax1_amount, tax2_amount)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let created_items = make_items(account_id, invoice_id, items);
        let Some(invoice) = inner.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        if let Some(name) = &update.client_name {
            invoice.client_name = name.clone();
        }
        if let Some(email) = &update.client_email {
            invoice.client_email = Some(email.clone());
        }
        if let Some(name) = &update.tax1_name {
            invoice.tax1_name = Some(name.clone());
        }
        if let Some(name) = &update.tax2_name {
            invoice.tax2_name = Some(name.clone());
        }
        if let Some(notes) = &update.notes {
            invoice.notes = Some(notes.clone());
        }
        invoice.discount = discount;
        invoice.tax1_amount = tax1_amount;
        invoice.tax2_amount = tax2_amount;
        invoice.subtotal = totals.subtotal;
        invoice.total = totals.total;

        let invoice = invoice.clone();
        inner.items.insert(invoice_id, created_items.clone());

        Ok(Some(InvoiceAggregate {
            invoice,
            items: created_items,
        }))
    }

    async fn apply_transition(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        expected: &ExpectedState,
        patch: &InvoicePatch,
        event: Option<&NewEvent>,
    ) -> Result<Option<(InvoiceAggregate, Option<InvoiceEvent>)>, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(invoice) = inner.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        if invoice.account_id != account_id
            || invoice.status() != expected.status
            || invoice.deleted != expected.deleted
        {
            return Ok(None);
        }

        if let Some(status) = patch.status {
            invoice.status = status.as_str().to_string();
        }
        if let Some(deleted) = patch.deleted {
            invoice.deleted = deleted;
        }
        if let Some(ts) = patch.sent_utc {
            invoice.sent_utc = Some(ts);
        }
        if let Some(ts) = patch.paid_utc {
            invoice.paid_utc = Some(ts);
        }
        if let Some(ts) = patch.refunded_utc {
            invoice.refunded_utc = Some(ts);
        }
        if let Some(reference) = &patch.payment_ref {
            invoice.payment_ref = Some(reference.clone());
        }
        if let Some(reference) = &patch.refund_ref {
            invoice.refund_ref = Some(reference.clone());
        }
        if let Some(via) = &patch.paid_via {
            invoice.paid_via = Some(via.clone());
        }
        let invoice = invoice.clone();

        let created_event = event.map(|e| make_event(account_id, invoice_id, e));
        if let Some(ref created) = created_event {
            inner
                .events
                .entry(invoice_id)
                .or_default()
                .push(created.clone());
        }

        let items = inner.items.get(&invoice_id).cloned().unwrap_or_default();

        Ok(Some((InvoiceAggregate { invoice, items }, created_event)))
    }

    async fn append_event(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
        event: &NewEvent,
    ) -> Result<InvoiceEvent, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.invoices.contains_key(&invoice_id) {
            return Err(StoreError::Invalid("invoice does not exist".to_string()));
        }
        let created = make_event(account_id, invoice_id, event);
        inner
            .events
            .entry(invoice_id)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn list_events(
        &self,
        account_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .get(&invoice_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.account_id == account_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
