//! CLI command implementations.

pub mod flush;
pub mod migrate;
pub mod sweep;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Notification queue error: {0}")]
    Queue(#[from] kct_pipeline::notify::QueueError),
}

/// Canonical-store URL: `PIPELINE_DATABASE_URL`, falling back to
/// `DATABASE_URL`.
pub(crate) fn canonical_database_url() -> Result<SecretString, CommandError> {
    std::env::var("PIPELINE_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("PIPELINE_DATABASE_URL"))
}

/// Fast-path-store URL: `FAST_PATH_DATABASE_URL`, falling back to the
/// canonical URL.
pub(crate) fn fast_path_database_url() -> Result<SecretString, CommandError> {
    std::env::var("FAST_PATH_DATABASE_URL")
        .map(SecretString::from)
        .map_or_else(|_| canonical_database_url(), Ok)
}
