//! REST surface tests through the assembled router: CRUD, transition
//! endpoints, and the error taxonomy on the wire.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::Router;
use common::test_config;
use http_body_util::BodyExt;
use lifecycle_service::services::notify::MockNotificationSender;
use lifecycle_service::services::store::MemoryStore;
use lifecycle_service::Application;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn test_app() -> Router {
    let store = Arc::new(MemoryStore::new());
    let app = Application::build_with(
        test_config(),
        store,
        Arc::new(MockNotificationSender::new()),
    )
    .expect("Failed to build application");
    app.router()
}

fn request(method: &str, uri: &str, account_id: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Account-ID", account_id.to_string())
        .header(CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_invoice_body() -> Value {
    json!({
        "client_name": "Acme Ltd",
        "client_email": "billing@acme.test",
        "currency": "USD",
        "items": [
            { "description": "Consulting", "amount": "100.00", "quantity": "1" }
        ]
    })
}

async fn create_invoice(router: &Router, account_id: Uuid) -> Value {
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            "/invoices",
            account_id,
            Some(create_invoice_body()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

#[tokio::test]
async fn create_and_fetch_invoice() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice = &created["invoice"];
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["number"], "INV-0001");
    assert_eq!(invoice["total"], "100.00");
    assert_eq!(created["items"].as_array().unwrap().len(), 1);

    let invoice_id = invoice["invoice_id"].as_str().unwrap();
    let response = router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/invoices/{}", invoice_id),
            account_id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn foreign_account_sees_not_found() {
    let router = test_app();
    let owner = Uuid::new_v4();

    let created = create_invoice(&router, owner).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();

    let response = router
        .oneshot(request(
            "GET",
            &format!("/invoices/{}", invoice_id),
            Uuid::new_v4(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_account_header_is_unauthorized() {
    let router = test_app();

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/invoices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_endpoint_returns_event_then_noop() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();
    let uri = format!("/invoices/{}/send", invoice_id);

    let response = router
        .clone()
        .oneshot(request("POST", &uri, account_id, Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["invoice"]["status"], "sent");
    assert_eq!(body["event"]["event_type"], "SENT");

    let response = router
        .clone()
        .oneshot(request("POST", &uri, account_id, Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(body["event"].is_null(), "Repeat send returns no new event");
}

#[tokio::test]
async fn pay_endpoint_maps_taxonomy_codes() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();
    let uri = format!("/invoices/{}/pay", invoice_id);

    // Blank reference
    let response = router
        .clone()
        .oneshot(request("POST", &uri, account_id, Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "MISSING_REQUIRED_FIELD");

    // Amount mismatch
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            &uri,
            account_id,
            Some(json!({ "payment_ref": "CHK-1", "amount": "99.99" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "AMOUNT_MISMATCH");

    // Happy path
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            &uri,
            account_id,
            Some(json!({ "payment_ref": "CHK-1" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["invoice"]["paid_via"], "manual");

    // Conflicting re-entry
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            &uri,
            account_id,
            Some(json!({ "payment_ref": "CHK-2" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(body["code"], "REFERENCE_MISMATCH");
}

#[tokio::test]
async fn update_replaces_items_and_recomputes_totals() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/invoices/{}", invoice_id),
            account_id,
            Some(json!({
                "discount": "10.00",
                "tax1_name": "VAT",
                "tax1_amount": "36.00",
                "items": [
                    { "description": "Design", "amount": "80.00", "quantity": "2" },
                    { "description": "Hosting", "amount": "20.00", "quantity": "1" }
                ]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;

    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["invoice"]["subtotal"], "180.00");
    assert_eq!(body["invoice"]["total"], "206.00");
}

#[tokio::test]
async fn update_rejected_while_deleted() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/invoices/{}", invoice_id),
            account_id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/invoices/{}", invoice_id),
            account_id,
            Some(json!({
                "items": [
                    { "description": "Design", "amount": "80.00", "quantity": "1" }
                ]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(body["code"], "INVOICE_DELETED");

    // Restore and the edit goes through again.
    let response = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/invoices/{}/restore", invoice_id),
            account_id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn events_endpoint_lists_audit_trail() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let created = create_invoice(&router, account_id).await;
    let invoice_id = created["invoice"]["invoice_id"].as_str().unwrap().to_string();

    router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/invoices/{}/send", invoice_id),
            account_id,
            Some(json!({})),
        ))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/invoices/{}/events", invoice_id),
            account_id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = read_json(response).await;
    let types: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"SENT"));
    assert!(types.contains(&"EMAIL_SENT"));
}

#[tokio::test]
async fn list_invoices_filters_by_status() {
    let router = test_app();
    let account_id = Uuid::new_v4();

    let first = create_invoice(&router, account_id).await;
    create_invoice(&router, account_id).await;

    let invoice_id = first["invoice"]["invoice_id"].as_str().unwrap().to_string();
    router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/invoices/{}/send", invoice_id),
            account_id,
            Some(json!({})),
        ))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(request("GET", "/invoices?status=sent", account_id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["status"], "sent");
}

#[tokio::test]
async fn account_endpoints_round_trip() {
    let router = test_app();

    let response = router
        .clone()
        .oneshot(request(
            "POST",
            "/accounts",
            Uuid::new_v4(),
            Some(json!({ "name": "Acme Ltd", "processor_account_id": "acct_42" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let account = read_json(response).await;
    let account_id: Uuid = account["account_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(account["payouts_enabled"], false);

    let response = router
        .oneshot(request("GET", "/account", account_id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["name"], "Acme Ltd");
}
