//! Payment-processor event payloads.
//!
//! The processor delivers events at least once; every field the pipeline
//! does not strictly need is optional, and unknown fields are ignored so an
//! upstream API addition never breaks ingestion.

pub mod verify;

use std::collections::HashMap;

use kct_core::Money;
use serde::Deserialize;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const CUSTOMER_CREATED: &str = "customer.created";

/// Outer event envelope: `{ id, type, data: { object } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// A completed checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub amount_subtotal: Option<Money>,
    #[serde(default)]
    pub amount_total: Option<Money>,
    #[serde(default)]
    pub total_details: Option<TotalDetails>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Free-form string map set at session creation. Carries the serialized
    /// cart (`items`), bundle markers, and anything else checkout attached.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub line_items: Option<LineItemList>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
}

impl CheckoutSession {
    /// Buyer email, preferring the verified `customer_details` copy.
    #[must_use]
    pub fn buyer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<ProcessorAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<ProcessorAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorAddress {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TotalDetails {
    #[serde(default)]
    pub amount_tax: Money,
    #[serde(default)]
    pub amount_shipping: Money,
    #[serde(default)]
    pub amount_discount: Money,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemList {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

/// Processor-side line item, used only on the degraded path when the cart
/// metadata fails to parse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub amount_total: Option<Money>,
    #[serde(default)]
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub unit_amount: Option<Money>,
    #[serde(default)]
    pub product: Option<serde_json::Value>,
}

/// A succeeded payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub amount: Option<Money>,
}

/// A processor-side customer record.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One entry of the serialized cart in `metadata.items`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub name: String,
    #[serde(default)]
    pub stripe_product_id: Option<String>,
    #[serde(default)]
    pub stripe_price_id: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    /// Unit price in minor units.
    pub price: Money,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: CartItemMeta,
}

const fn default_quantity() -> i32 {
    1
}

/// Cut details nested inside a cart item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartItemMeta {
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub fit: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses() {
        let envelope: EventEnvelope = serde_json::from_str(
            r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#,
        )
        .unwrap();
        assert_eq!(envelope.id, "evt_1");
        assert_eq!(envelope.event_type, CHECKOUT_COMPLETED);
    }

    #[test]
    fn test_session_ignores_unknown_fields() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","amount_total":2500,"livemode":false,"object":"checkout.session"}"#,
        )
        .unwrap();
        assert_eq!(session.amount_total, Some(Money::from_minor(2500)));
    }

    #[test]
    fn test_buyer_email_prefers_details() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","customer_email":"fallback@b.com",
                "customer_details":{"email":"primary@b.com"}}"#,
        )
        .unwrap();
        assert_eq!(session.buyer_email(), Some("primary@b.com"));
    }

    #[test]
    fn test_cart_item_defaults() {
        let item: CartItem =
            serde_json::from_str(r#"{"name":"Navy Suit","price":19900}"#).unwrap();
        assert_eq!(item.quantity, 1);
        assert!(item.metadata.fit.is_none());
    }

    #[test]
    fn test_cart_item_camel_case_keys() {
        let item: CartItem = serde_json::from_str(
            r#"{"name":"Tie","price":500,"stripeProductId":"prod_1",
                "metadata":{"type":"skinny","fit":"n/a"}}"#,
        )
        .unwrap();
        assert_eq!(item.stripe_product_id.as_deref(), Some("prod_1"));
        assert_eq!(item.metadata.item_type.as_deref(), Some("skinny"));
    }
}
