//! Pipeline configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PIPELINE_DATABASE_URL` - Canonical-store `PostgreSQL` connection string
//! - `WEBHOOK_SECRET` - Shared secret for webhook signature verification
//!   (high entropy, no placeholders)
//!
//! ## Optional
//! - `FAST_PATH_DATABASE_URL` - Fast-path store connection string
//!   (default: the canonical URL)
//! - `PIPELINE_HOST` - Bind address (default: 127.0.0.1)
//! - `PIPELINE_PORT` - Listen port (default: 3000)
//! - `SYNC_SWEEP_INTERVAL_SECS` - Reconciliation sweep period (default: 60)
//! - `NOTIFY_DATA_DIR` - Directory for persisted notification queues
//!   (default: data/notifications)
//! - `NOTIFY_MAX_ATTEMPTS` - Delivery attempts per channel (default: 3)
//! - `NOTIFY_BACKOFF_BASE_MS` - First retry delay in ms (default: 1000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::notify::NotifierSettings;

const MIN_WEBHOOK_SECRET_LENGTH: usize = 16;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Pipeline service configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Canonical-store connection URL (contains password)
    pub database_url: SecretString,
    /// Fast-path-store connection URL; defaults to `database_url`
    pub fast_path_database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Shared secret for webhook signatures
    pub webhook_secret: SecretString,
    /// Period of the sync reconciliation sweep
    pub sweep_interval: Duration,
    /// Notification delivery tuning
    pub notifier: NotifierSettings,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the webhook secret fails validation (placeholder detection,
    /// entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("PIPELINE_DATABASE_URL")?;
        let fast_path_database_url = std::env::var("FAST_PATH_DATABASE_URL")
            .map_or_else(|_| database_url.clone(), SecretString::from);
        let host = get_env_or_default("PIPELINE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("PIPELINE_HOST".to_owned(), e.to_string()))?;
        let port = get_env_or_default("PIPELINE_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PIPELINE_PORT".to_owned(), e.to_string()))?;
        let webhook_secret = get_validated_secret("WEBHOOK_SECRET")?;
        validate_secret_length(&webhook_secret, "WEBHOOK_SECRET")?;

        let sweep_interval = Duration::from_secs(parse_env_or(
            "SYNC_SWEEP_INTERVAL_SECS",
            60,
        )?);

        let mut notifier = NotifierSettings::default();
        if let Ok(dir) = std::env::var("NOTIFY_DATA_DIR") {
            notifier.data_dir = PathBuf::from(dir);
        }
        notifier.max_attempts = parse_env_or("NOTIFY_MAX_ATTEMPTS", 3)?;
        notifier.backoff_base = Duration::from_millis(parse_env_or("NOTIFY_BACKOFF_BASE_MS", 1000)?);

        Ok(Self {
            database_url,
            fast_path_database_url,
            host,
            port,
            webhook_secret,
            sweep_interval,
            notifier,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_owned()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_owned()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Validate that the webhook secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_WEBHOOK_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_owned(),
            format!(
                "must be at least {} characters (got {})",
                MIN_WEBHOOK_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_owned(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like signing keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_owned(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
