//! Fast-path (conversational commerce) order records.
//!
//! These rows live in a separate store with a looser shape: items are a JSON
//! array, status is free text, and the sync flag rides inside a metadata
//! document rather than a column.

use chrono::{DateTime, Utc};
use kct_core::{Money, PaymentStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One item on a fast-path order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastPathItem {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: i32,
    pub unit_price: Money,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Metadata document attached to a fast-path order. Unknown keys are
/// preserved on round trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FastPathMetadata {
    #[serde(default)]
    pub synced_to_main: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A fast-path order row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FastPathOrder {
    pub id: Uuid,
    pub order_number: String,
    pub checkout_session_id: Option<String>,
    pub customer_email: String,
    #[sqlx(json)]
    pub items: Vec<FastPathItem>,
    pub total: Money,
    /// Free-form status string; mapped to the canonical lifecycle when
    /// mirroring.
    pub status: String,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    pub shipping_address: Option<String>,
    #[sqlx(json)]
    pub metadata: FastPathMetadata,
    pub created_at: DateTime<Utc>,
}

impl FastPathOrder {
    /// Whether this order has already been mirrored into the canonical store.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.metadata.synced_to_main
    }
}

/// A fast-path order ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewFastPathOrder {
    pub order_number: String,
    pub checkout_session_id: Option<String>,
    pub customer_email: String,
    pub items: Vec<FastPathItem>,
    pub total: Money,
    pub status: String,
    pub payment_status: PaymentStatus,
    pub shipping_address: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults_unsynced() {
        let meta: FastPathMetadata = serde_json::from_str("{}").unwrap();
        assert!(!meta.synced_to_main);
        assert!(meta.synced_at.is_none());
    }

    #[test]
    fn test_metadata_preserves_unknown_keys() {
        let meta: FastPathMetadata =
            serde_json::from_str(r#"{"synced_to_main":true,"stylist":"ava"}"#).unwrap();
        assert!(meta.synced_to_main);
        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["stylist"], "ava");
    }
}
