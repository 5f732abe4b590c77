//! Payment processor webhook handler.
//!
//! Verifies the signature, then drives payment events through the same
//! transition executor entry point as manual payment recording, so the
//! audit trail and idempotency rules are identical for both paths.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use service_core::error::AppError;

use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::processor::SIGNATURE_HEADER;
use crate::AppState;

use super::ApiError;

pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", SIGNATURE_HEADER);
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = state
        .processor
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature")).into());
    }

    let event = state.processor.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    tracing::info!(event_type = %event.event, "Processing processor webhook");

    match event.event.as_str() {
        "payment.succeeded" => {
            if let Some(ref payment) = event.payment {
                match state
                    .executor
                    .record_external_payment(
                        payment.account_id,
                        payment.invoice_id,
                        &payment.payment_ref,
                        payment.amount,
                        &payment.currency,
                    )
                    .await
                {
                    Ok(outcome) => {
                        let result = if outcome.event.is_some() {
                            "recorded"
                        } else {
                            "noop"
                        };
                        tracing::info!(
                            invoice_id = %payment.invoice_id,
                            payment_ref = %payment.payment_ref,
                            result = result,
                            "External payment processed"
                        );
                        WEBHOOK_EVENTS_TOTAL
                            .with_label_values(&["payment.succeeded", result])
                            .inc();
                    }
                    // A guard rejection is this system refusing the event,
                    // not a delivery failure; acknowledge so the processor
                    // stops retrying something that will never apply.
                    Err(err) => {
                        tracing::warn!(
                            invoice_id = %payment.invoice_id,
                            payment_ref = %payment.payment_ref,
                            code = err.code(),
                            error = %err,
                            "External payment rejected"
                        );
                        WEBHOOK_EVENTS_TOTAL
                            .with_label_values(&["payment.succeeded", "rejected"])
                            .inc();
                    }
                }
            }
        }
        "payment.failed" => {
            if let Some(ref payment) = event.payment {
                tracing::info!(
                    invoice_id = %payment.invoice_id,
                    payment_ref = %payment.payment_ref,
                    "Payment failed webhook received"
                );
            }
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["payment.failed", "noted"])
                .inc();
        }
        "account.updated" => {
            if let Some(ref account) = event.account {
                let matched = state
                    .store
                    .set_account_payout_status(
                        &account.processor_account_id,
                        account.payouts_enabled,
                    )
                    .await?;
                if !matched {
                    tracing::warn!(
                        processor_account_id = %account.processor_account_id,
                        "Account status webhook for unknown account"
                    );
                }
                WEBHOOK_EVENTS_TOTAL
                    .with_label_values(&[
                        "account.updated",
                        if matched { "updated" } else { "unmatched" },
                    ])
                    .inc();
            }
        }
        _ => {
            tracing::debug!(event_type = %event.event, "Unhandled webhook event type");
        }
    }

    // Always return 200 OK to acknowledge receipt
    Ok(StatusCode::OK)
}
