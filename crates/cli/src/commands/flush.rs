//! Retry persisted failed notification deliveries.
//!
//! Loads the notifier's queues from `NOTIFY_DATA_DIR` (default
//! `data/notifications`), re-delivers everything in the failed queue, and
//! reports what went back out and what was requeued.

use std::path::PathBuf;

use kct_pipeline::notify::{Notifier, NotifierSettings};

use super::CommandError;

pub async fn run() -> Result<(), CommandError> {
    dotenvy::dotenv().ok();

    let settings = NotifierSettings {
        data_dir: std::env::var("NOTIFY_DATA_DIR")
            .map_or_else(|_| PathBuf::from("data/notifications"), PathBuf::from),
        ..Default::default()
    };

    let notifier = Notifier::with_defaults(settings).await?;
    let report = notifier.flush_failed().await?;

    tracing::info!(
        retried = report.retried,
        delivered = report.delivered,
        requeued = report.requeued,
        "failed-delivery flush complete"
    );
    Ok(())
}
