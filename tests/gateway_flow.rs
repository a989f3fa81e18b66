//! End-to-end exercise of the authenticate → assess-transaction flow over
//! the actual axum router, wired to in-memory collaborator fakes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{middleware as axum_mw, routing::get, Router};
use serde_json::json;
use tower::ServiceExt;

use gateway_core::api;
use gateway_core::auth;
use gateway_core::config::Config;
use gateway_core::Core;

async fn build_app() -> Router {
    let core = Arc::new(Core::new_with_fakes(Config::default()).await.unwrap());

    let jwt_handler = core.jwt.clone();
    let protected = api::protected_router()
        .layer(axum_mw::from_fn_with_state(jwt_handler, auth::auth_middleware));

    Router::new()
        .merge(api::public_router())
        .merge(protected)
        .route("/health", get(api::routes::health))
        .with_state(core)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authenticate_then_assess_transaction_round_trip() {
    let app = build_app().await;

    let auth_request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/authenticate")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "actor_id": "actor-42",
                "password": "correct horse battery staple",
                "context": {
                    "new_device": false,
                    "new_location": false,
                    "unusual_hour": false,
                    "suspicious_ip": false,
                    "recent_failed_attempts": 0
                },
                "totp_code": null
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.clone().oneshot(auth_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCESS");
    let token = body["token"].as_str().unwrap().to_string();

    let assess_request = Request::builder()
        .method("POST")
        .uri("/api/v1/transactions/assess")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({
                "transaction": {
                    "fingerprint": "fp-1",
                    "actor_id": "actor-42",
                    "counterparty_id": "merchant-7",
                    "amount": {"minor_units": 12_345, "currency": {"code": "USD"}},
                    "timestamp": {"wall": "2026-01-01T00:00:00Z", "monotonic_nanos": 0},
                    "channel": "online",
                    "merchant_category": null,
                    "device_fingerprint": null,
                    "network_origin": null,
                    "geo": null
                }
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.clone().oneshot(assess_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["risk_level"].is_string());
    assert!(body["action"].is_string());
}

#[tokio::test]
async fn assess_transaction_without_bearer_token_is_rejected() {
    let app = build_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/transactions/assess")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "transaction": {
                    "fingerprint": "fp-2",
                    "actor_id": "actor-99",
                    "counterparty_id": "merchant-1",
                    "amount": {"minor_units": 500, "currency": {"code": "USD"}},
                    "timestamp": {"wall": "2026-01-01T00:00:00Z", "monotonic_nanos": 0},
                    "channel": "online",
                    "merchant_category": null,
                    "device_fingerprint": null,
                    "network_origin": null,
                    "geo": null
                }
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_endpoint_reports_healthy_with_no_open_breakers() {
    let app = build_app().await;

    let request = Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}
