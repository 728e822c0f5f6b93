//! Router-level checks for paths that are decided before any database or gateway call.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tower::ServiceExt;

use crate::{
    config::AppConfig,
    create_router,
    services::payments::{sign, signature_manifest},
    state::AppState,
};

fn app() -> Router {
    let config = AppConfig::for_tests();
    let db = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(300))
        .connect_lazy(&config.database_url)
        .unwrap();
    create_router(AppState::new(db, config).unwrap())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_status() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let response = app()
        .oneshot(json_request("POST", "/api/cart/quote", json!({ "items": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn checkout_rejects_bad_email() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/checkout",
            json!({
                "items": [{ "product_id": uuid::Uuid::new_v4(), "quantity": 2 }],
                "email": "not-an-email",
                "full_name": "Ana Pérez",
                "shipping_address": "Camino Real 123",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_zero_quantity() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/checkout",
            json!({
                "items": [{ "product_id": uuid::Uuid::new_v4(), "quantity": 0 }],
                "email": "ana@correo.cl",
                "full_name": "Ana Pérez",
                "shipping_address": "Camino Real 123",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_need_a_session() {
    for uri in ["/api/admin/operations", "/api/admin/settings", "/api/admin/orders"] {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn webhook_without_signature_is_refused() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/webhooks/mercadopago?type=payment&data.id=123",
            json!({ "type": "payment", "data": { "id": "123" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_with_forged_signature_is_refused() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/mercadopago?type=payment&data.id=123")
                .header("x-signature", "ts=1700000000,v1=deadbeef")
                .header("x-request-id", "req-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_webhook_for_unknown_topic_is_acknowledged() {
    let ts = "1700000000";
    let manifest = signature_manifest("999", Some("req-2"), ts);
    let v1 = hex::encode(sign("webhook-secret", &manifest).unwrap());

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/mercadopago?type=merchant_order&data.id=999")
                .header("x-signature", format!("ts={},v1={}", ts, v1))
                .header("x-request-id", "req-2")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "received": true }));
}
