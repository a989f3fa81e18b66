//! HTTP surface: route wiring for the `/api/v1` contract.

pub mod routes;

use axum::routing::{get, post};
use axum::Router;

use crate::app::AppState;

/// Endpoints that never require a bearer token: register/login/health
/// are the standing exceptions to the `Authorization` requirement.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/authenticate", post(routes::authenticate))
        .route("/api/v1/health", get(routes::health))
}

/// Endpoints gated behind [`crate::auth::auth_middleware`].
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/transactions/assess", post(routes::assess_transaction))
        .route("/api/v1/rules/test", post(routes::test_rules))
        .route("/api/v1/metrics", get(routes::metrics))
}
