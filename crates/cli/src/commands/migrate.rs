//! Database migration commands.
//!
//! Migrations are embedded at compile time from
//! `crates/pipeline/migrations/` and applied with sqlx's migrator, so the
//! binary carries everything it needs.
//!
//! # Environment Variables
//!
//! - `PIPELINE_DATABASE_URL` - canonical store (falls back to `DATABASE_URL`)
//! - `FAST_PATH_DATABASE_URL` - fast-path store (falls back to the canonical URL)

use kct_pipeline::store::create_pool;

use super::{CommandError, canonical_database_url, fast_path_database_url};

/// Run canonical-store migrations.
pub async fn canonical() -> Result<(), CommandError> {
    dotenvy::dotenv().ok();

    let url = canonical_database_url()?;
    tracing::info!("Connecting to canonical database...");
    let pool = create_pool(&url).await?;

    tracing::info!("Running canonical migrations...");
    sqlx::migrate!("../pipeline/migrations/canonical")
        .run(&pool)
        .await?;

    tracing::info!("Canonical migrations complete");
    Ok(())
}

/// Run fast-path-store migrations.
pub async fn fast_path() -> Result<(), CommandError> {
    dotenvy::dotenv().ok();

    let url = fast_path_database_url()?;
    tracing::info!("Connecting to fast-path database...");
    let pool = create_pool(&url).await?;

    tracing::info!("Running fast-path migrations...");
    sqlx::migrate!("../pipeline/migrations/fast_path")
        .run(&pool)
        .await?;

    tracing::info!("Fast-path migrations complete");
    Ok(())
}
