//! Shared test fixtures: an engine wired to the in-memory store and the
//! mock notifier, plus invoice factories.
#![allow(dead_code)]

use std::sync::Arc;

use lifecycle_service::config::{
    Config, DatabaseConfig, ProcessorConfig, ServerConfig, SmtpConfig,
};
use lifecycle_service::engine::TransitionExecutor;
use lifecycle_service::models::{CreateInvoice, InvoiceAggregate, NewInvoiceItem};
use lifecycle_service::services::notify::{MockNotificationSender, NotificationSender};
use lifecycle_service::services::store::{InvoiceStore, MemoryStore};
use rust_decimal::Decimal;
use secrecy::Secret;
use uuid::Uuid;

pub const TEST_PROCESSOR: &str = "stripe";
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub struct TestEngine {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MockNotificationSender>,
    pub executor: TransitionExecutor,
}

pub fn test_engine() -> TestEngine {
    test_engine_with(MockNotificationSender::new())
}

pub fn test_engine_with(notifier: MockNotificationSender) -> TestEngine {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(notifier);
    let executor = TransitionExecutor::new(
        store.clone() as Arc<dyn InvoiceStore>,
        notifier.clone() as Arc<dyn NotificationSender>,
        TEST_PROCESSOR,
    );
    TestEngine {
        store,
        notifier,
        executor,
    }
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 5,
            min_connections: 1,
        },
        smtp: SmtpConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "invoices@test.local".to_string(),
            from_name: "Invoices".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
        },
        processor: ProcessorConfig {
            name: TEST_PROCESSOR.to_string(),
            webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
        },
        service_name: "lifecycle-service".to_string(),
    }
}

pub fn items(entries: &[(&str, &str, &str)]) -> Vec<NewInvoiceItem> {
    entries
        .iter()
        .map(|(description, amount, quantity)| NewInvoiceItem {
            description: description.to_string(),
            amount: amount.parse().unwrap(),
            quantity: quantity.parse().unwrap(),
        })
        .collect()
}

/// Create a draft invoice with one 100.00 x 1 item, no discount or tax.
pub async fn draft_invoice(store: &dyn InvoiceStore, account_id: Uuid) -> InvoiceAggregate {
    draft_invoice_for(store, account_id, Some("billing@acme.test")).await
}

pub async fn draft_invoice_for(
    store: &dyn InvoiceStore,
    account_id: Uuid,
    client_email: Option<&str>,
) -> InvoiceAggregate {
    let input = CreateInvoice {
        account_id,
        client_name: "Acme Ltd".to_string(),
        client_email: client_email.map(|s| s.to_string()),
        currency: "USD".to_string(),
        discount: Decimal::ZERO,
        tax1_name: None,
        tax1_amount: Decimal::ZERO,
        tax2_name: None,
        tax2_amount: Decimal::ZERO,
        notes: None,
    };

    store
        .create_invoice(&input, &items(&[("Consulting", "100.00", "1")]))
        .await
        .expect("Failed to create draft invoice")
}

/// Count audit events of a given type for an invoice.
pub async fn count_events(
    store: &dyn InvoiceStore,
    account_id: Uuid,
    invoice_id: Uuid,
    event_type: &str,
) -> usize {
    store
        .list_events(account_id, invoice_id)
        .await
        .expect("Failed to list events")
        .iter()
        .filter(|e| e.event_type == event_type)
        .count()
}
