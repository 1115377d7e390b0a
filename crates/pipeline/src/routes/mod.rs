//! HTTP route handlers for the pipeline service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health             - Liveness check
//! GET  /health/ready       - Readiness check (canonical store reachable)
//! POST /webhooks/payments  - Payment processor webhook receiver
//! ```

use axum::{Router, http::StatusCode, routing::get};

use crate::state::AppState;

pub mod webhook;

/// Build the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .merge(webhook::router())
}

/// Liveness check. Always returns 200 while the process is up.
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Readiness check. Verifies the canonical store answers a lookup.
async fn ready(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> StatusCode {
    match state.stores().orders.get_by_order_number("KCT-0000-000000").await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
