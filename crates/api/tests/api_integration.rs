//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ForceOutcome, SagaConfig};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state(config: SagaConfig) -> (axum::Router, Arc<api::AppState>) {
    let state = api::create_default_state(config, get_metrics_handle());
    (api::create_app(state.clone()), state)
}

fn setup() -> axum::Router {
    setup_with_state(SagaConfig::default()).0
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn order_body(sku: &str, qty: u32) -> Value {
    json!({
        "customerId": "c1",
        "amount": 1000,
        "currency": "KRW",
        "items": [{ "sku": sku, "qty": qty }]
    })
}

async fn create_order(app: &axum::Router, sku: &str, qty: u32) -> String {
    let (status, json) = send(app, json_request("POST", "/orders", order_body(sku, qty))).await;
    assert_eq!(status, StatusCode::CREATED);
    json["orderId"].as_str().unwrap().to_string()
}

async fn wait_for_terminal(app: &axum::Router, order_id: &str) -> Value {
    let mut order = Value::Null;
    for _ in 0..200 {
        let (_, json) = send(app, get(&format!("/orders/{order_id}"))).await;
        order = json;
        if matches!(
            order["status"].as_str(),
            Some("COMPLETED" | "PAYMENT_FAILED" | "INVENTORY_REJECTED")
        ) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    order
}

#[tokio::test]
async fn test_create_order() {
    let app = setup();

    let (status, json) = send(&app, json_request("POST", "/orders", order_body("X", 2))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "PENDING");
    assert!(json["orderId"].as_str().is_some());
}

#[tokio::test]
async fn test_create_order_validation() {
    let app = setup();

    let cases = [
        json!({ "customerId": "c1", "amount": 0, "currency": "KRW", "items": [{ "sku": "X", "qty": 1 }] }),
        json!({ "customerId": "c1", "amount": 10, "currency": "KRW", "items": [] }),
        json!({ "customerId": "c1", "amount": 10, "currency": "KRW", "items": [{ "sku": "X", "qty": 0 }] }),
        json!({ "customerId": "", "amount": 10, "currency": "KRW", "items": [{ "sku": "X", "qty": 1 }] }),
    ];
    for body in cases {
        let (status, json) = send(&app, json_request("POST", "/orders", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().is_some());
    }
}

#[tokio::test]
async fn test_create_and_get_order() {
    let app = setup();
    let order_id = create_order(&app, "X", 2).await;

    let (status, json) = send(&app, get(&format!("/orders/{order_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], order_id.as_str());
    assert_eq!(json["customerId"], "c1");
    assert_eq!(json["amount"], 1000);
    assert_eq!(json["items"], json!([{ "sku": "X", "qty": 2 }]));
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();
    let fake_id = common::OrderId::new();

    let (status, _) = send(&app, get(&format!("/orders/{fake_id}"))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_order_id_format() {
    let app = setup();

    let (status, _) = send(&app, get("/orders/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_orders_newest_first() {
    let app = setup();
    let first = create_order(&app, "X", 1).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = create_order(&app, "X", 1).await;

    let (status, json) = send(&app, get("/orders")).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
}

#[tokio::test]
async fn test_inventory_endpoints() {
    let app = setup();

    let (status, json) = send(&app, json_request("PUT", "/inventory/B", json!({ "qty": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "sku": "B", "quantity": 5 }));
    send(&app, json_request("PUT", "/inventory/A", json!({ "qty": 10 }))).await;

    let (status, json) = send(&app, get("/inventory/A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["quantity"], 10);

    let (_, json) = send(&app, get("/inventory")).await;
    let skus: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["sku"].as_str().unwrap())
        .collect();
    assert_eq!(skus, vec!["A", "B"]);

    let (status, _) = send(&app, get("/inventory/NOPE")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, json_request("PUT", "/inventory/A", json!({ "qty": -1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete("/inventory/B")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, get("/inventory/B")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, delete("/inventory/B")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payment_adapter_endpoint() {
    let app = setup();
    let body = json!({
        "orderId": common::OrderId::new(),
        "amount": 1000,
        "currency": "KRW",
        "items": [{ "sku": "X", "qty": 2 }]
    });

    let (status, json) = send(&app, json_request("POST", "/payments/authorize", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "AUTHORIZED");
    assert!(json["authId"].as_str().unwrap().starts_with("pay-"));

    let forced = Request::builder()
        .method("POST")
        .uri("/payments/authorize?force=success")
        .header("content-type", "application/json")
        .header(saga::FORCE_HEADER, "fail")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();
    let (status, json) = send(&app, forced).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "DECLINED");
    assert_eq!(json["reason"], "FORCED_FAIL");

    let mut zero = body.clone();
    zero["amount"] = json!(0);
    let (_, json) = send(&app, json_request("POST", "/payments/authorize", zero)).await;
    assert_eq!(json["reason"], "INVALID_AMOUNT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_order_completes_end_to_end() {
    let (app, state) = setup_with_state(SagaConfig {
        force_payment: Some(ForceOutcome::Success),
        ..SagaConfig::default()
    });
    let runtime = state.saga.start().await.unwrap();
    send(&app, json_request("PUT", "/inventory/X", json!({ "qty": 10 }))).await;

    let order_id = create_order(&app, "X", 2).await;
    let order = wait_for_terminal(&app, &order_id).await;
    assert_eq!(order["status"], "COMPLETED");

    let (status, json) = send(&app, get(&format!("/fulfillments/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "SCHEDULED");
    assert!(json["shippingId"].as_str().unwrap().starts_with("shp-"));

    let (_, json) = send(&app, get("/inventory/X")).await;
    assert_eq!(json["quantity"], 8);

    let (status, json) = send(&app, get("/fulfillments?page=0&size=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["orderId"], order_id.as_str());
    let (_, json) = send(&app, get("/fulfillments?page=1&size=10")).await;
    assert!(json.as_array().unwrap().is_empty());
    let (status, _) = send(&app, get("/fulfillments?size=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The audit consumer may still be catching up on the last event.
    let mut types = Vec::new();
    for _ in 0..200 {
        let (_, json) = send(&app, get(&format!("/orders/{order_id}/events"))).await;
        types = json
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["eventType"].as_str().unwrap().to_string())
            .collect();
        if types.len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        types,
        vec![
            "OrderCreated",
            "InventoryReserved",
            "PaymentAuthorized",
            "FulfillmentScheduled"
        ]
    );

    let (status, json) = send(&app, json_request("POST", &format!("/orders/{order_id}/retry"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("COMPLETED"));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_order_can_be_retried() {
    let (app, state) = setup_with_state(SagaConfig {
        force_payment: Some(ForceOutcome::Success),
        ..SagaConfig::default()
    });
    let runtime = state.saga.start().await.unwrap();
    send(&app, json_request("PUT", "/inventory/Y", json!({ "qty": 1 }))).await;

    let order_id = create_order(&app, "Y", 3).await;
    let order = wait_for_terminal(&app, &order_id).await;
    assert_eq!(order["status"], "INVENTORY_REJECTED");

    send(&app, json_request("PUT", "/inventory/Y", json!({ "qty": 5 }))).await;
    let (status, json) = send(&app, json_request("POST", &format!("/orders/{order_id}/retry"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "PENDING");

    let order = wait_for_terminal(&app, &order_id).await;
    assert_eq!(order["status"], "COMPLETED");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_retry_unknown_order() {
    let app = setup();
    let fake_id = common::OrderId::new();

    let (status, _) = send(&app, json_request("POST", &format!("/orders/{fake_id}/retry"), json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create_order(&app, "X", 1).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_submitted_total"));
}
