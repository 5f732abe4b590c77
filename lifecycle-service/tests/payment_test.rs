//! Payment and refund transition tests: validation, strict idempotency,
//! and the shared external-payment entry point.

mod common;

use common::{count_events, draft_invoice, test_engine, TEST_PROCESSOR};
use lifecycle_service::engine::{PaymentDetails, RefundDetails};
use lifecycle_service::models::{InvoiceStatus, PAID_VIA_MANUAL};
use uuid::Uuid;

fn payment(reference: &str) -> PaymentDetails {
    PaymentDetails {
        payment_ref: reference.to_string(),
        amount: None,
        currency: None,
        notes: None,
    }
}

fn refund(reference: &str) -> RefundDetails {
    RefundDetails {
        refund_ref: reference.to_string(),
        notes: None,
    }
}

#[tokio::test]
async fn mark_paid_records_reference_and_event() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .send_invoice(account_id, invoice_id, None, None)
        .await
        .expect("Failed to send");

    let actor = Some(Uuid::new_v4());
    let outcome = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, actor, payment("CHK-1"))
        .await
        .expect("Failed to mark paid");

    let invoice = &outcome.aggregate.invoice;
    assert_eq!(invoice.status(), InvoiceStatus::Paid);
    assert!(invoice.paid_utc.is_some());
    assert_eq!(invoice.payment_ref.as_deref(), Some("CHK-1"));
    assert_eq!(invoice.paid_via.as_deref(), Some(PAID_VIA_MANUAL));

    let event = outcome.event.expect("MarkPaid should append an event");
    assert_eq!(event.event_type, "PAID");
    assert_eq!(event.reference.as_deref(), Some("CHK-1"));
    assert_eq!(event.actor_id, actor);
}

#[tokio::test]
async fn mark_paid_requires_reference_and_leaves_no_trace() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let err = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("   "))
        .await
        .expect_err("Blank reference must be rejected");
    assert_eq!(err.code(), "MISSING_REQUIRED_FIELD");

    let aggregate = engine
        .store
        .get_invoice(account_id, invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.invoice.status(), InvoiceStatus::Draft);
    assert!(aggregate.invoice.payment_ref.is_none());
    assert!(engine
        .store
        .list_events(account_id, invoice_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn mark_paid_rejects_amount_and_currency_mismatch() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let mut details = payment("CHK-1");
    details.amount = Some("99.99".parse().unwrap());
    let err = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, details)
        .await
        .expect_err("Amount mismatch must be rejected");
    assert_eq!(err.code(), "AMOUNT_MISMATCH");

    let mut details = payment("CHK-1");
    details.currency = Some("EUR".to_string());
    let err = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, details)
        .await
        .expect_err("Currency mismatch must be rejected");
    assert_eq!(err.code(), "CURRENCY_MISMATCH");

    let aggregate = engine
        .store
        .get_invoice(account_id, invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.invoice.status(), InvoiceStatus::Draft);
    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "PAID").await,
        0
    );
}

#[tokio::test]
async fn mark_paid_accepts_matching_amount_and_currency() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let details = PaymentDetails {
        payment_ref: "CHK-1".to_string(),
        amount: Some("100.00".parse().unwrap()),
        currency: Some("usd".to_string()),
        notes: None,
    };

    let outcome = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, details)
        .await
        .expect("Matching metadata must be accepted");
    assert_eq!(outcome.aggregate.invoice.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn mark_paid_reentry_same_reference_is_noop() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-1"))
        .await
        .expect("First mark paid failed");

    let second = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-1"))
        .await
        .expect("Repeat with the same reference should succeed");

    assert!(second.event.is_none());
    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "PAID").await,
        1
    );
}

#[tokio::test]
async fn mark_paid_reentry_different_reference_conflicts() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-1"))
        .await
        .expect("First mark paid failed");

    let err = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-2"))
        .await
        .expect_err("A differing reference must not overwrite the recorded one");
    assert_eq!(err.code(), "REFERENCE_MISMATCH");

    let aggregate = engine
        .store
        .get_invoice(account_id, invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.invoice.payment_ref.as_deref(), Some("CHK-1"));
    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "PAID").await,
        1
    );
}

#[tokio::test]
async fn refund_records_reference_and_event() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-1"))
        .await
        .expect("Failed to mark paid");

    let outcome = engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund("REF-1"))
        .await
        .expect("Failed to refund");

    let invoice = &outcome.aggregate.invoice;
    assert_eq!(invoice.status(), InvoiceStatus::Refunded);
    assert!(invoice.refunded_utc.is_some());
    assert_eq!(invoice.refund_ref.as_deref(), Some("REF-1"));

    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "REFUNDED").await,
        1
    );
}

#[tokio::test]
async fn refund_requires_reference() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let err = engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund(""))
        .await
        .expect_err("Blank refund reference must be rejected");
    assert_eq!(err.code(), "MISSING_REQUIRED_FIELD");
}

#[tokio::test]
async fn refund_reentry_is_strict() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund("REF-1"))
        .await
        .expect("First refund failed");

    let second = engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund("REF-1"))
        .await
        .expect("Repeat with the same reference should succeed");
    assert!(second.event.is_none());

    let err = engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund("REF-2"))
        .await
        .expect_err("A differing refund reference must conflict");
    assert_eq!(err.code(), "REFERENCE_MISMATCH");

    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "REFUNDED").await,
        1
    );
}

#[tokio::test]
async fn refunded_invoice_can_be_remarked_paid() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-1"))
        .await
        .expect("Failed to mark paid");
    engine
        .executor
        .refund_invoice(account_id, invoice_id, None, refund("REF-1"))
        .await
        .expect("Failed to refund");

    let outcome = engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("CHK-2"))
        .await
        .expect("Re-marking a refunded invoice paid is allowed");

    assert_eq!(outcome.aggregate.invoice.status(), InvoiceStatus::Paid);
    assert_eq!(
        outcome.aggregate.invoice.payment_ref.as_deref(),
        Some("CHK-2")
    );
    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "PAID").await,
        2
    );
}

#[tokio::test]
async fn external_payment_uses_processor_channel() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let outcome = engine
        .executor
        .record_external_payment(
            account_id,
            invoice_id,
            "py_123",
            "100.00".parse().unwrap(),
            "USD",
        )
        .await
        .expect("Failed to record external payment");

    let invoice = &outcome.aggregate.invoice;
    assert_eq!(invoice.status(), InvoiceStatus::Paid);
    assert_eq!(invoice.payment_ref.as_deref(), Some("py_123"));
    assert_eq!(invoice.paid_via.as_deref(), Some(TEST_PROCESSOR));

    let event = outcome.event.expect("External payment should append PAID");
    assert_eq!(event.event_type, "PAID");
    assert!(event.actor_id.is_none(), "Webhook payments have no actor");
}

#[tokio::test]
async fn external_payment_skips_when_already_recorded() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .record_external_payment(
            account_id,
            invoice_id,
            "py_123",
            "100.00".parse().unwrap(),
            "USD",
        )
        .await
        .expect("First delivery failed");

    let second = engine
        .executor
        .record_external_payment(
            account_id,
            invoice_id,
            "py_123",
            "100.00".parse().unwrap(),
            "USD",
        )
        .await
        .expect("Duplicate delivery should succeed");

    assert!(second.event.is_none());
    assert_eq!(
        count_events(engine.store.as_ref(), account_id, invoice_id, "PAID").await,
        1
    );
}

#[tokio::test]
async fn external_payment_validates_amount() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    let err = engine
        .executor
        .record_external_payment(
            account_id,
            invoice_id,
            "py_123",
            "42.00".parse().unwrap(),
            "USD",
        )
        .await
        .expect_err("Amount mismatch must be rejected");

    assert_eq!(err.code(), "AMOUNT_MISMATCH");
}

#[tokio::test]
async fn manual_then_external_with_same_reference_is_noop() {
    let engine = test_engine();
    let account_id = Uuid::new_v4();
    let invoice_id = draft_invoice(engine.store.as_ref(), account_id)
        .await
        .invoice
        .invoice_id;

    engine
        .executor
        .mark_invoice_paid(account_id, invoice_id, None, payment("py_123"))
        .await
        .expect("Manual mark paid failed");

    let outcome = engine
        .executor
        .record_external_payment(
            account_id,
            invoice_id,
            "py_123",
            "100.00".parse().unwrap(),
            "USD",
        )
        .await
        .expect("Webhook replay of the same reference should succeed");

    assert!(outcome.event.is_none());
    assert_eq!(
        outcome.aggregate.invoice.paid_via.as_deref(),
        Some(PAID_VIA_MANUAL),
        "No-op must not rewrite the recorded channel"
    );
}
