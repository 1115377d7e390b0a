//! KCT order pipeline service binary.
//!
//! Serves the webhook receiver and runs the fast-path sync service in the
//! background. Configuration comes from the environment; see
//! [`kct_pipeline::config`] for the variable list.

#![cfg_attr(not(test), forbid(unsafe_code))]

use kct_pipeline::config::PipelineConfig;
use kct_pipeline::notify::Notifier;
use kct_pipeline::state::AppState;
use kct_pipeline::store::{self, Stores};
use kct_pipeline::routes;
use kct_pipeline::sync::SyncService;

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &PipelineConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = PipelineConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Initialize tracing with EnvFilter and Sentry integration
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kct_pipeline=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Connection pools for both stores
    let canonical = store::create_pool(&config.database_url)
        .await
        .expect("Failed to create canonical database pool");
    let fast_path = store::create_pool(&config.fast_path_database_url)
        .await
        .expect("Failed to create fast-path database pool");
    tracing::info!("Database pools created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p kct-cli -- migrate

    let stores = Stores::postgres(canonical, fast_path);

    // Notifier recovers its persisted queues from disk before serving
    let notifier = Notifier::with_defaults(config.notifier.clone())
        .await
        .expect("Failed to initialize notifier");
    let report = notifier
        .flush_failed()
        .await
        .expect("Failed to flush persisted failed deliveries");
    if report.retried > 0 {
        tracing::info!(
            retried = report.retried,
            delivered = report.delivered,
            requeued = report.requeued,
            "recovered failed deliveries from previous run"
        );
    }

    // Background sync: realtime paid-order feed plus periodic sweep
    let sync_service = SyncService::new(stores.clone(), config.sweep_interval);
    sync_service
        .start()
        .await
        .expect("Failed to start sync service");
    tracing::info!("Sync service started");

    let state = AppState::new(config.clone(), stores, notifier.clone());

    let app = routes::router()
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("pipeline listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Drain in-flight sync tasks before exit
    sync_service.stop().await;
    tracing::info!("Sync service stopped");

    // Let outstanding notification deliveries finish or reach the
    // persisted failed queue
    notifier.drain_deliveries().await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
