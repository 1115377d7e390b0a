//! Integration test harness for the KCT order pipeline.
//!
//! Spins up the full router over in-memory stores and a notifier backed by
//! a temp directory, so tests exercise the pipeline end to end without a
//! running `PostgreSQL` or any external process.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p kct-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use kct_pipeline::config::PipelineConfig;
use kct_pipeline::notify::{Notifier, NotifierSettings};
use kct_pipeline::payments::verify::sign;
use kct_pipeline::routes;
use kct_pipeline::state::AppState;
use kct_pipeline::store::memory::MemoryStores;
use secrecy::SecretString;
use tempfile::TempDir;
use tower::ServiceExt;

/// A full pipeline instance over in-memory stores.
pub struct TestContext {
    pub app: Router,
    pub state: AppState,
    pub memory: MemoryStores,
    /// Holds the notifier's data directory alive for the test's duration.
    pub data_dir: TempDir,
}

impl TestContext {
    /// Build a pipeline with default notifier settings.
    ///
    /// # Panics
    ///
    /// Panics when the temp directory or notifier cannot be created; these
    /// are test-environment failures, not behavior under test.
    pub async fn new() -> Self {
        Self::with_notifier_settings(|_| {}).await
    }

    /// Build a pipeline, letting the caller adjust notifier settings before
    /// the notifier is created.
    #[allow(clippy::missing_panics_doc)]
    pub async fn with_notifier_settings(adjust: impl FnOnce(&mut NotifierSettings)) -> Self {
        let data_dir = tempfile::tempdir().expect("temp dir");
        let mut settings = NotifierSettings {
            data_dir: data_dir.path().to_path_buf(),
            ..Default::default()
        };
        adjust(&mut settings);

        let config = test_config(settings.clone());
        let notifier = Notifier::with_defaults(settings).await.expect("notifier");
        Self::assemble(config, notifier, data_dir)
    }

    /// Build a pipeline around a caller-assembled notifier (custom clock,
    /// transports, or probe).
    #[must_use]
    pub fn with_notifier(notifier: Notifier, data_dir: TempDir) -> Self {
        Self::assemble(test_config(NotifierSettings::default()), notifier, data_dir)
    }

    fn assemble(config: PipelineConfig, notifier: Notifier, data_dir: TempDir) -> Self {
        let memory = MemoryStores::new();
        let state = AppState::new(config, memory.stores(), notifier);
        let app = routes::router().with_state(state.clone());

        Self {
            app,
            state,
            memory,
            data_dir,
        }
    }

    /// POST a correctly signed body to the webhook endpoint.
    ///
    /// # Panics
    ///
    /// Panics when the request cannot be built or the router fails outright.
    pub async fn deliver(&self, body: &str) -> Response<Body> {
        let sig = sign(body.as_bytes(), self.state.webhook_secret());
        let request = Request::post("/webhooks/payments")
            .header("signature", sig)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request");
        self.app.clone().oneshot(request).await.expect("response")
    }

    /// POST a signed body and assert the processor-visible status code.
    pub async fn deliver_expect(&self, body: &str, expected: StatusCode) {
        let response = self.deliver(body).await;
        assert_eq!(response.status(), expected);
    }
}

fn test_config(notifier: NotifierSettings) -> PipelineConfig {
    PipelineConfig {
        database_url: SecretString::from("postgres://localhost/unused"),
        fast_path_database_url: SecretString::from("postgres://localhost/unused"),
        host: std::net::IpAddr::from([127, 0, 0, 1]),
        port: 0,
        webhook_secret: SecretString::from("k9$mQ2@xV7!pL4#wZ8&nR3*jB6^tD1%g"),
        sweep_interval: Duration::from_secs(60),
        notifier,
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// Build a checkout.session.completed event body with cart items in
/// session metadata, the way the chat checkout flow sends them.
#[must_use]
pub fn checkout_event(event_id: &str, session_id: &str, email: &str) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "customer_email": email,
                "amount_subtotal": 2500,
                "amount_total": 2500,
                "currency": "usd",
                "payment_intent": format!("pi_{session_id}"),
                "metadata": {
                    "items": serde_json::json!([
                        {
                            "name": "Navy Suit",
                            "quantity": 2,
                            "price": 1000,
                            "category": "suits",
                            "color": "Navy",
                            "size": "40R"
                        },
                        {
                            "name": "Silk Tie",
                            "quantity": 1,
                            "price": 500,
                            "category": "ties",
                            "color": "Burgundy"
                        }
                    ]).to_string()
                }
            }
        }
    })
    .to_string()
}
