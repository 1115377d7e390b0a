//! Unified error handling with Sentry integration.
//!
//! Handler errors become 500s so the processor redelivers the event;
//! signature failures become 400s and are never retried by us. Server
//! errors are captured to Sentry before the response goes out.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::notify::QueueError;
use crate::orders::OrderError;
use crate::store::StoreError;
use crate::sync::SyncError;

/// Application-level error type for the pipeline service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Webhook signature missing or invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Event envelope could not be parsed.
    #[error("Malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Order materialization failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Storage operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Synchronizer operation failed.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Notification queue I/O failed.
    #[error("Notification queue error: {0}")]
    Queue(#[from] QueueError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Order(_) | Self::Store(_) | Self::Sync(_) | Self::Queue(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::InvalidSignature => StatusCode::BAD_REQUEST,
            // Malformed body on a verified request: acknowledge nothing,
            // let the processor retry.
            Self::MalformedPayload(_)
            | Self::Order(_)
            | Self::Store(_)
            | Self::Sync(_)
            | Self::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't expose internal error details to clients
        let message = match &self {
            Self::InvalidSignature => "Invalid signature".to_owned(),
            _ => "Internal server error".to_owned(),
        };

        (status, message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
