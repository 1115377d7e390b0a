//! One-off fast-path reconciliation sweep.
//!
//! Connects to both stores, mirrors every unsynced paid fast-path order
//! into the canonical store, prints the tallies, and exits. The long-lived
//! service runs the same sweep on a timer; this command exists for
//! operators who want to force one now.

use std::time::Duration;

use kct_pipeline::store::{Stores, create_pool};
use kct_pipeline::sync::SyncService;

use super::{CommandError, canonical_database_url, fast_path_database_url};

pub async fn run() -> Result<(), CommandError> {
    dotenvy::dotenv().ok();

    let canonical = create_pool(&canonical_database_url()?).await?;
    let fast_path = create_pool(&fast_path_database_url()?).await?;
    let stores = Stores::postgres(canonical, fast_path);

    // The interval is irrelevant for a single manual sweep.
    let service = SyncService::new(stores, Duration::from_secs(60));
    let report = service.sweep_once().await;

    tracing::info!(
        examined = report.examined,
        mirrored = report.mirrored,
        failed = report.failed,
        "sweep complete"
    );
    Ok(())
}
