//! Invoice CRUD and transition handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::engine::{PaymentDetails, RefundDetails, TransitionError, TransitionOutcome};
use crate::middleware::AccountContext;
use crate::models::{
    CreateInvoice, Invoice, InvoiceAggregate, InvoiceEvent, InvoiceItem, InvoiceStatus,
    ListInvoicesFilter, NewInvoiceItem, UpdateInvoice,
};
use crate::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Validate)]
pub struct ItemRequest {
    #[validate(length(min = 1, max = 1024))]
    pub description: String,
    pub amount: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, max = 255))]
    pub client_name: String,
    #[validate(email)]
    pub client_email: Option<String>,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub discount: Option<Decimal>,
    #[validate(length(max = 64))]
    pub tax1_name: Option<String>,
    pub tax1_amount: Option<Decimal>,
    #[validate(length(max = 64))]
    pub tax2_name: Option<String>,
    pub tax2_amount: Option<Decimal>,
    pub notes: Option<String>,
    #[validate(nested)]
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    #[validate(length(min = 1, max = 255))]
    pub client_name: Option<String>,
    #[validate(email)]
    pub client_email: Option<String>,
    pub discount: Option<Decimal>,
    #[validate(length(max = 64))]
    pub tax1_name: Option<String>,
    pub tax1_amount: Option<Decimal>,
    #[validate(length(max = 64))]
    pub tax2_name: Option<String>,
    pub tax2_amount: Option<Decimal>,
    pub notes: Option<String>,
    /// Line items are replaced wholesale: what is sent here becomes the
    /// invoice's entire item set.
    #[validate(nested)]
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendInvoiceRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub payment_ref: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub refund_ref: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Serialize)]
pub struct InvoiceResponse {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

impl From<InvoiceAggregate> for InvoiceResponse {
    fn from(aggregate: InvoiceAggregate) -> Self {
        Self {
            invoice: aggregate.invoice,
            items: aggregate.items,
        }
    }
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    /// The audit event this call appended; absent for idempotent no-ops.
    pub event: Option<InvoiceEvent>,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            invoice: outcome.aggregate.invoice,
            items: outcome.aggregate.items,
            event: outcome.event,
        }
    }
}

fn to_new_items(items: Vec<ItemRequest>) -> Vec<NewInvoiceItem> {
    items
        .into_iter()
        .map(|item| NewInvoiceItem {
            description: item.description,
            amount: item.amount,
            quantity: item.quantity,
        })
        .collect()
}

pub async fn create_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), ApiError> {
    payload.validate()?;

    tracing::info!(
        account_id = %ctx.account_id,
        client_name = %payload.client_name,
        "Creating draft invoice"
    );

    let input = CreateInvoice {
        account_id: ctx.account_id,
        client_name: payload.client_name,
        client_email: payload.client_email,
        currency: payload.currency.to_uppercase(),
        discount: payload.discount.unwrap_or(Decimal::ZERO),
        tax1_name: payload.tax1_name,
        tax1_amount: payload.tax1_amount.unwrap_or(Decimal::ZERO),
        tax2_name: payload.tax2_name,
        tax2_amount: payload.tax2_amount.unwrap_or(Decimal::ZERO),
        notes: payload.notes,
    };
    let items = to_new_items(payload.items);

    let aggregate = state.store.create_invoice(&input, &items).await?;

    Ok((StatusCode::CREATED, Json(aggregate.into())))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let aggregate = state
        .store
        .get_invoice(ctx.account_id, invoice_id)
        .await?
        .ok_or(TransitionError::NotFound)?;

    Ok(Json(aggregate.into()))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    ctx: AccountContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    let filter = ListInvoicesFilter {
        status: query.status.as_deref().map(InvoiceStatus::from_string),
        include_deleted: query.include_deleted,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let invoices = state.store.list_invoices(ctx.account_id, &filter).await?;

    Ok(Json(invoices))
}

/// Edit an invoice: replace its items wholesale and recompute totals in
/// one transaction. Rejected with `INVOICE_DELETED` while soft-deleted.
pub async fn update_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    payload.validate()?;

    let update = UpdateInvoice {
        client_name: payload.client_name,
        client_email: payload.client_email,
        discount: payload.discount,
        tax1_name: payload.tax1_name,
        tax1_amount: payload.tax1_amount,
        tax2_name: payload.tax2_name,
        tax2_amount: payload.tax2_amount,
        notes: payload.notes,
    };
    let items = to_new_items(payload.items);

    match state
        .store
        .replace_items(ctx.account_id, invoice_id, &update, &items)
        .await?
    {
        Some(aggregate) => Ok(Json(aggregate.into())),
        // The store refuses the write for a missing or deleted invoice;
        // read once more to report which it was.
        None => match state.store.get_invoice(ctx.account_id, invoice_id).await? {
            Some(_) => Err(TransitionError::InvoiceDeleted.into()),
            None => Err(TransitionError::NotFound.into()),
        },
    }
}

pub async fn send_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<SendInvoiceRequest>>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let notes = payload.and_then(|Json(p)| p.notes);

    let outcome = state
        .executor
        .send_invoice(ctx.account_id, invoice_id, ctx.actor_id, notes)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn mark_invoice_paid(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<MarkPaidRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let details = PaymentDetails {
        payment_ref: payload.payment_ref,
        amount: payload.amount,
        currency: payload.currency,
        notes: payload.notes,
    };

    let outcome = state
        .executor
        .mark_invoice_paid(ctx.account_id, invoice_id, ctx.actor_id, details)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn refund_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let details = RefundDetails {
        refund_ref: payload.refund_ref,
        notes: payload.notes,
    };

    let outcome = state
        .executor
        .refund_invoice(ctx.account_id, invoice_id, ctx.actor_id, details)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn soft_delete_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let outcome = state
        .executor
        .soft_delete_invoice(ctx.account_id, invoice_id, ctx.actor_id)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn restore_invoice(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let outcome = state
        .executor
        .restore_invoice(ctx.account_id, invoice_id, ctx.actor_id)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn list_invoice_events(
    State(state): State<AppState>,
    ctx: AccountContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<InvoiceEvent>>, ApiError> {
    state
        .store
        .get_invoice(ctx.account_id, invoice_id)
        .await?
        .ok_or(TransitionError::NotFound)?;

    let events = state.store.list_events(ctx.account_id, invoice_id).await?;

    Ok(Json(events))
}
