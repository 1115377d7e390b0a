//! Canonical orders and their line items.

use chrono::{DateTime, Utc};
use kct_core::{Email, Money, OrderSource, OrderStatus, OrderType, PaymentStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Postal address captured at checkout. Every field is optional; the
/// processor only sends what the buyer filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl Address {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line1.is_none() && self.city.is_none() && self.postal_code.is_none()
    }
}

/// A materialized order in the canonical store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    /// Set when the buyer checked out without an account.
    pub guest_email: Option<Email>,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    #[sqlx(try_from = "String")]
    pub order_type: OrderType,
    #[sqlx(try_from = "String")]
    pub source: OrderSource,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: String,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub bundle_type: Option<String>,
    #[sqlx(json)]
    pub shipping_address: Option<Address>,
    #[sqlx(json)]
    pub billing_address: Option<Address>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_sku: String,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Money,
    pub total_price: Money,
    pub size: Option<String>,
    pub color: Option<String>,
    /// Remaining metadata from the processor line item, kept verbatim.
    #[sqlx(json)]
    pub attributes: Value,
}

/// An order ready to be inserted, lines included. The store writes both in
/// one transaction so a failed line insert never leaves a headless order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub guest_email: Option<Email>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub order_type: OrderType,
    pub source: OrderSource,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: String,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub bundle_type: Option<String>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_sku: String,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Money,
    pub total_price: Money,
    pub size: Option<String>,
    pub color: Option<String>,
    pub attributes: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_empty() {
        assert!(Address::default().is_empty());
        let addr = Address {
            line1: Some("123 Main St".into()),
            ..Address::default()
        };
        assert!(!addr.is_empty());
    }
}
