//! Payment processor webhook receiver.
//!
//! The processor signs every delivery with HMAC-SHA256 over the raw body.
//! Verification happens before any parsing; unverified bytes are never
//! deserialized. Event ids are recorded before dispatch so redeliveries
//! of an already-processed event are acknowledged without side effects.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
};
use serde_json::json;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::payments::{
    CHECKOUT_COMPLETED, CUSTOMER_CREATED, CheckoutSession, EventEnvelope, PAYMENT_SUCCEEDED,
    PaymentIntent, ProcessorCustomer, verify,
};
use crate::state::AppState;

/// Build the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(receive))
}

/// Receive a signed webhook delivery.
///
/// Returns 400 for a missing or invalid signature, 200 with
/// `{"received": true}` for everything that was verified, including
/// duplicate deliveries and event types we do not handle. Handler
/// failures surface as 500 so the processor redelivers.
#[instrument(skip_all)]
async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let signature = headers
        .get(verify::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    if !verify::verify_signature(&body, signature, state.webhook_secret()) {
        return Err(AppError::InvalidSignature);
    }

    let envelope: EventEnvelope = serde_json::from_slice(&body)?;

    // First write wins. A redelivery of a recorded id is acknowledged
    // without touching the stores again.
    let fresh = state
        .stores()
        .events
        .record(&envelope.id, &envelope.event_type)
        .await?;
    if !fresh {
        tracing::info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "duplicate delivery, already processed"
        );
        return Ok(Json(json!({ "received": true })));
    }

    if let Err(error) = dispatch(&state, &envelope).await {
        // Un-record so the processor's redelivery is handled, not
        // short-circuited as a duplicate.
        if let Err(forget_error) = state.stores().events.forget(&envelope.id).await {
            tracing::error!(
                %forget_error,
                event_id = %envelope.id,
                "failed to un-record event after handler error"
            );
        }
        return Err(error);
    }

    Ok(Json(json!({ "received": true })))
}

async fn dispatch(state: &AppState, envelope: &EventEnvelope) -> Result<()> {
    match envelope.event_type.as_str() {
        CHECKOUT_COMPLETED => {
            let session: CheckoutSession = serde_json::from_value(envelope.data.object.clone())?;
            state.materializer().handle_checkout_completed(&session).await?;
        }
        PAYMENT_SUCCEEDED => {
            let intent: PaymentIntent = serde_json::from_value(envelope.data.object.clone())?;
            state.materializer().handle_payment_succeeded(&intent).await?;
        }
        CUSTOMER_CREATED => {
            let customer: ProcessorCustomer =
                serde_json::from_value(envelope.data.object.clone())?;
            state.materializer().handle_customer_created(&customer).await?;
        }
        other => {
            tracing::debug!(event_type = %other, "unhandled event type");
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use crate::config::PipelineConfig;
    use crate::notify::{Notifier, NotifierSettings};
    use crate::payments::verify::sign;
    use crate::store::memory::MemoryStores;

    use super::*;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            database_url: SecretString::from("postgres://localhost/unused"),
            fast_path_database_url: SecretString::from("postgres://localhost/unused"),
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            webhook_secret: SecretString::from("k9$mQ2@xV7!pL4#wZ8&nR3*jB6^tD1%g"),
            sweep_interval: Duration::from_secs(60),
            notifier: NotifierSettings::default(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    async fn test_app(dir: &std::path::Path) -> (Router, AppState, MemoryStores) {
        let config = test_config();
        let memory = MemoryStores::new();
        let settings = NotifierSettings {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let notifier = Notifier::with_defaults(settings).await.unwrap();
        let state = AppState::new(config, memory.stores(), notifier);
        let app = crate::routes::router().with_state(state.clone());
        (app, state, memory)
    }

    fn signed_request(body: &str, secret: &SecretString) -> Request<Body> {
        let sig = sign(body.as_bytes(), secret);
        Request::post("/webhooks/payments")
            .header("signature", sig)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn checkout_event(event_id: &str, session_id: &str) -> String {
        serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": session_id,
                    "customer_email": "a@b.com",
                    "amount_subtotal": 2500,
                    "amount_total": 2500,
                    "currency": "usd",
                    "payment_intent": "pi_1",
                    "metadata": {
                        "items": "[{\"name\":\"Navy Suit\",\"quantity\":2,\"price\":1000},{\"name\":\"Tie\",\"quantity\":1,\"price\":500}]"
                    }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = test_app(dir.path()).await;

        let request = Request::post("/webhooks/payments")
            .body(Body::from(checkout_event("evt_1", "cs_1")))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state, _) = test_app(dir.path()).await;

        let request = Request::post("/webhooks/payments")
            .header("signature", "deadbeef")
            .body(Body::from(checkout_event("evt_1", "cs_1")))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // Nothing recorded, nothing materialized
        assert!(
            state
                .stores()
                .orders
                .get_by_checkout_session("cs_1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_checkout_event_materializes_order() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state, _) = test_app(dir.path()).await;

        let body = checkout_event("evt_1", "cs_123");
        let request = signed_request(&body, state.webhook_secret());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let reply: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["received"], true);

        let order = state
            .stores()
            .orders
            .get_by_checkout_session("cs_123")
            .await
            .unwrap()
            .expect("order materialized");
        assert_eq!(order.subtotal.minor(), 2500);
    }

    #[tokio::test]
    async fn test_redelivery_acknowledged_once() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state, memory) = test_app(dir.path()).await;

        let body = checkout_event("evt_dup", "cs_dup");
        for _ in 0..2 {
            let request = signed_request(&body, state.webhook_secret());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(memory.order_count(), 1);
        assert_eq!(memory.line_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_event_type_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state, _) = test_app(dir.path()).await;

        let body = serde_json::json!({
            "id": "evt_x",
            "type": "invoice.finalized",
            "data": { "object": {} }
        })
        .to_string();
        let request = signed_request(&body, state.webhook_secret());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = test_app(dir.path()).await;

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
