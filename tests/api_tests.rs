// Contrato HTTP das transferências, com o router real e o backend em memória.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use stock_transfers::config::AppState;
use stock_transfers::db::MemoryStore;
use stock_transfers::models::inventory::BalanceKey;
use stock_transfers::router;
use stock_transfers::services::TransferStateMachine;

struct TestApp {
    app: Router,
    store: MemoryStore,
    tenant: Uuid,
    origin: Uuid,
    dest: Uuid,
    product: Uuid,
}

impl TestApp {
    async fn new(initial_stock: i64) -> Self {
        let store = MemoryStore::new();
        let (tenant, origin, dest, product) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.add_branch(tenant, origin, "Loja Centro").await;
        store.add_branch(tenant, dest, "Loja Norte").await;
        store
            .seed_balance(BalanceKey::new(tenant, origin, product), Decimal::from(initial_stock))
            .await;

        let service = Arc::new(TransferStateMachine::in_memory(store.clone()));
        let app = router::app(AppState::with_service(service));
        Self { app, store, tenant, origin, dest, product }
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn create_draft(&self, quantity: i64) -> i64 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/transfers")
            .header("content-type", "application/json")
            .header("x-tenant-id", self.tenant.to_string())
            .body(Body::from(
                json!({
                    "fromBranchId": self.origin,
                    "toBranchId": self.dest,
                    "items": [{ "productId": self.product, "quantity": quantity }]
                })
                .to_string(),
            ))
            .unwrap();

        let (status, body) = self.call(request).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    async fn action(&self, transfer_id: i64, action: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/transfers/{}/action", transfer_id))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "tenant_id": self.tenant,
                    "actor_id": Uuid::new_v4(),
                    "action": action
                })
                .to_string(),
            ))
            .unwrap();
        self.call(request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header("x-tenant-id", self.tenant.to_string())
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }
}

#[tokio::test]
async fn test_send_and_receive_through_http() {
    let app = TestApp::new(10).await;
    let id = app.create_draft(4).await;

    let (status, body) = app.action(id, "send").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": id, "status": "sent" }));

    let (status, body) = app.action(id, "receive").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "received");

    let (status, body) = app.get(&format!("/api/stock/{}/{}", app.dest, app.product)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quantity"].as_f64(), Some(4.0));

    let (status, body) = app.get(&format!("/api/transfers/{}/movements", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(|m| m.len()), Some(2));
}

#[tokio::test]
async fn test_unknown_action_is_bad_request() {
    let app = TestApp::new(10).await;
    let id = app.create_draft(4).await;

    let (status, body) = app.action(id, "ship").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_transfer_is_not_found() {
    let app = TestApp::new(10).await;

    let (status, body) = app.action(9999, "send").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_insufficient_stock_is_bad_request_and_keeps_draft() {
    let app = TestApp::new(3).await;
    let id = app.create_draft(5).await;

    let (status, body) = app.action(id, "send").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_STOCK");

    let (_, detail) = app.get(&format!("/api/transfers/{}", id)).await;
    assert_eq!(detail["status"], "draft");
    assert_eq!(
        app.store.quantity(BalanceKey::new(app.tenant, app.origin, app.product)).await,
        Decimal::from(3)
    );
}

#[tokio::test]
async fn test_invalid_transition_is_bad_request() {
    let app = TestApp::new(10).await;
    let id = app.create_draft(4).await;

    let (status, _) = app.action(id, "cancel").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.action(id, "send").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_create_requires_tenant_header() {
    let app = TestApp::new(10).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/transfers")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "fromBranchId": app.origin, "toBranchId": app.dest, "items": [] }).to_string()))
        .unwrap();

    let (status, body) = app.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_create_rejects_same_branch_and_empty_items() {
    let app = TestApp::new(10).await;

    let post = |payload: Value| {
        Request::builder()
            .method("POST")
            .uri("/api/transfers")
            .header("content-type", "application/json")
            .header("x-tenant-id", app.tenant.to_string())
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let (status, body) = app
        .call(post(json!({ "fromBranchId": app.origin, "toBranchId": app.dest, "items": [] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .call(post(json!({
            "fromBranchId": app.origin,
            "toBranchId": app.origin,
            "items": [{ "productId": app.product, "quantity": 1 }]
        })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SAME_BRANCH");
}

#[tokio::test]
async fn test_create_rejects_quantity_beyond_column_precision() {
    let app = TestApp::new(10).await;

    for quantity in ["0.00001", "1.23456", "100000000000000"] {
        let request = Request::builder()
            .method("POST")
            .uri("/api/transfers")
            .header("content-type", "application/json")
            .header("x-tenant-id", app.tenant.to_string())
            .body(Body::from(
                json!({
                    "fromBranchId": app.origin,
                    "toBranchId": app.dest,
                    "items": [{ "productId": app.product, "quantity": quantity }]
                })
                .to_string(),
            ))
            .unwrap();

        let (status, body) = app.call(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{quantity}: {body}");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_non_numeric_transfer_id_uses_error_body() {
    let app = TestApp::new(10).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/transfers/abc/action")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "tenant_id": app.tenant, "actor_id": Uuid::new_v4(), "action": "send" }).to_string(),
        ))
        .unwrap();
    let (status, body) = app.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"]["path"].is_string(), "{body}");

    let (status, body) = app.get("/api/transfers/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app.get("/api/stock/not-a-uuid/also-not").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_tenant_header_message_follows_locale() {
    let app = TestApp::new(10).await;

    let request = Request::builder()
        .uri("/api/transfers")
        .header("accept-language", "en-US")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "The X-Tenant-ID header is required.");
}

#[tokio::test]
async fn test_portuguese_error_messages() {
    let app = TestApp::new(10).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/transfers/9999/action")
        .header("content-type", "application/json")
        .header("accept-language", "pt-BR,pt;q=0.9")
        .body(Body::from(
            json!({ "tenant_id": app.tenant, "actor_id": Uuid::new_v4(), "action": "send" }).to_string(),
        ))
        .unwrap();

    let (status, body) = app.call(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("não encontrad"), "{body}");
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(0).await;
    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
