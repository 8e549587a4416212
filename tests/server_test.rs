//! HTTP Router Tests
//!
//! Webhook, health and metrics endpoints behind the edge limiter.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Harness;
use leadbot_gate::server::{build_router, AppState};
use leadbot_gate::GateConfig;
use serde_json::Value;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    build_router(AppState::new(h.services.clone()), false)
}

fn post_webhook(body: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("X-Forwarded-For", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_webhook_processed_then_duplicate() {
    let (h, _clock) = Harness::manual(GateConfig::default());
    let app = app(&h);
    let payload = r#"{"contactId": "c1", "locationId": "loc", "body": "Hello"}"#;

    let first = app.clone().oneshot(post_webhook(payload, "203.0.113.5")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().contains_key("X-RateLimit-Remaining"));
    let first = json_body(first).await;
    assert_eq!(first["status"], "processed");
    assert_eq!(first["bot_type"], "lead");

    let second = app.oneshot(post_webhook(payload, "203.0.113.5")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = json_body(second).await;
    assert_eq!(second["status"], "skipped");
    assert_eq!(second["reason"], "duplicate");
}

#[tokio::test]
async fn test_malformed_payload_is_structured_error() {
    let (h, _clock) = Harness::manual(GateConfig::default());

    let response = app(&h)
        .oneshot(post_webhook("{not json", "203.0.113.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["detail"].as_str().unwrap().starts_with("invalid payload"));
}

#[tokio::test]
async fn test_edge_limiter_rejects_noisy_client() {
    let (h, _clock) = Harness::manual(GateConfig::default());
    let app = app(&h);

    // Default edge budget is 60 per client per minute
    for i in 0..60 {
        let payload = format!(r#"{{"contact_id": "c{}", "message": "hi"}}"#, i);
        let response = app.clone().oneshot(post_webhook(&payload, "198.51.100.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let payload = r#"{"contact_id": "c61", "message": "hi"}"#;
    let rejected = app.clone().oneshot(post_webhook(payload, "198.51.100.1")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().contains_key("Retry-After"));

    // Another client is unaffected
    let other = app.oneshot(post_webhook(payload, "198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoints() {
    let (h, _clock) = Harness::manual(GateConfig::default());
    let app = app(&h);

    let health = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let json = json_body(health).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());

    let live = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    let json = json_body(ready).await;
    assert_eq!(json["status"], "ready");
    assert!(json["cache"]["primary"].is_null());
}

#[tokio::test]
async fn test_metrics_reflect_traffic() {
    let (h, _clock) = Harness::manual(GateConfig::default());
    let app = app(&h);

    let payload = r#"{"contact_id": "c1", "message": "Hello"}"#;
    app.clone().oneshot(post_webhook(payload, "203.0.113.5")).await.unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("X-RateLimit-Limit"));

    let json = json_body(response).await;
    assert_eq!(json["performance"]["ai_calls"]["count"], 1);
    assert_eq!(json["performance"]["lifetime"]["crm_calls"], 2);
    assert_eq!(json["deferred"]["failed"], 0);
}
