//! Order materialization from processor events.
//!
//! Turns a completed checkout into a customer record, an order, and its
//! lines. The processor delivers at least once, so everything here is
//! written to be re-entrant: the checkout-session reference is checked
//! before insert and unique-constrained in the store, and a duplicate
//! surfacing through either path short-circuits to success.

use chrono::Utc;
use kct_core::{
    Email, Money, NotificationKind, OrderSource, OrderStatus, OrderType, PaymentStatus, Priority,
    order_number,
    sku::{SkuParts, derive_sku},
};
use tracing::instrument;
use uuid::Uuid;

use crate::inventory::InventoryCoordinator;
use crate::models::{Address, NewCustomer, NewOrder, NewOrderLine};
use crate::notify::Notifier;
use crate::payments::{
    CartItem, CheckoutSession, LineItem, PaymentIntent, ProcessorAddress, ProcessorCustomer,
};
use crate::store::{StoreError, Stores, constraints};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

type OrderNumberSource = Box<dyn Fn() -> String + Send + Sync>;

pub struct Materializer {
    stores: Stores,
    inventory: InventoryCoordinator,
    notifier: Notifier,
    order_numbers: OrderNumberSource,
}

impl Materializer {
    #[must_use]
    pub fn new(stores: Stores, notifier: Notifier) -> Self {
        let inventory = InventoryCoordinator::new(stores.inventory.clone());
        Self {
            stores,
            inventory,
            notifier,
            order_numbers: Box::new(|| order_number::generate(Utc::now())),
        }
    }

    /// Replace the order-number source. Tests use this to force collisions.
    #[must_use]
    pub fn with_order_numbers(
        mut self,
        source: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.order_numbers = Box::new(source);
        self
    }

    /// Materialize a completed checkout session into customer, order, and
    /// lines, then run the isolated side effects (inventory, notification).
    ///
    /// # Errors
    ///
    /// Returns [`OrderError`] only for store failures on the order write
    /// itself; duplicates and side-effect failures are absorbed.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn handle_checkout_completed(
        &self,
        session: &CheckoutSession,
    ) -> Result<(), OrderError> {
        if self
            .stores
            .orders
            .get_by_checkout_session(&session.id)
            .await?
            .is_some()
        {
            tracing::info!("order already exists for session, skipping");
            return Ok(());
        }

        let (customer_id, guest_email) = self.resolve_customer(session).await;
        let lines = parse_lines(session);
        let now = Utc::now();

        let subtotal = session
            .amount_subtotal
            .unwrap_or_else(|| lines.iter().map(|l| l.total_price).sum());
        let totals = session.total_details.unwrap_or_default();
        let (order_type, bundle_type, discount) = bundle_context(session, subtotal);
        let discount = if discount == Money::ZERO {
            totals.amount_discount
        } else {
            discount
        };
        let total = session
            .amount_total
            .unwrap_or(subtotal + totals.amount_tax + totals.amount_shipping - discount);

        check_totals_invariant(&lines, totals.amount_tax, totals.amount_shipping, discount, total);

        let (shipping_address, billing_address) = extract_addresses(session);

        let new_order = NewOrder {
            order_number: (self.order_numbers)(),
            customer_id,
            guest_email,
            status: OrderStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            order_type,
            source: OrderSource::Checkout,
            subtotal,
            tax: totals.amount_tax,
            shipping: totals.amount_shipping,
            discount,
            total,
            currency: session
                .currency
                .as_deref()
                .map_or_else(|| "USD".to_owned(), str::to_uppercase),
            checkout_session_id: Some(session.id.clone()),
            payment_intent_id: session.payment_intent.clone(),
            bundle_type,
            shipping_address,
            billing_address,
            confirmed_at: Some(now),
            lines,
        };

        let Some(order) = self.insert_with_number_retry(new_order).await? else {
            // Lost the race to a concurrent delivery of the same session.
            return Ok(());
        };

        tracing::info!(
            order_number = %order.order_number,
            order_id = %order.id,
            total = %order.total,
            "order materialized"
        );

        // Side effects, isolated from the order write.
        let lines = self.stores.orders.lines(order.id).await.unwrap_or_default();
        for line in &lines {
            self.inventory
                .record_sale(&line.product_sku, line.quantity)
                .await;
        }

        if let Err(error) = self
            .notifier
            .notify(
                NotificationKind::OrderUpdate,
                "Order confirmed",
                &format!("Order {} has been confirmed", order.order_number),
                Priority::High,
                serde_json::json!({
                    "order_number": order.order_number,
                    "total": order.total,
                    "currency": order.currency,
                }),
            )
            .await
        {
            tracing::warn!(%error, "order confirmation notification failed");
        }

        Ok(())
    }

    /// Move a confirmed order to processing when its payment intent
    /// succeeds.
    #[instrument(skip(self, intent), fields(payment_intent = %intent.id))]
    pub async fn handle_payment_succeeded(
        &self,
        intent: &PaymentIntent,
    ) -> Result<(), OrderError> {
        let Some(order) = self
            .stores
            .orders
            .get_by_payment_intent(&intent.id)
            .await?
        else {
            tracing::warn!("no order for succeeded payment intent");
            return Ok(());
        };

        if order.status.can_transition_to(OrderStatus::Processing) {
            self.stores
                .orders
                .update_status(order.id, OrderStatus::Processing)
                .await?;
            tracing::info!(order_number = %order.order_number, "order moved to processing");
        } else {
            tracing::debug!(
                order_number = %order.order_number,
                status = %order.status,
                "payment succeeded for order not awaiting processing"
            );
        }
        Ok(())
    }

    /// Upsert the customer for a processor-side `customer.created` event.
    #[instrument(skip(self, customer), fields(processor_customer = %customer.id))]
    pub async fn handle_customer_created(
        &self,
        customer: &ProcessorCustomer,
    ) -> Result<(), OrderError> {
        let Some(email) = customer.email.as_deref().and_then(|e| Email::parse(e).ok()) else {
            tracing::debug!("customer event without usable email, skipping");
            return Ok(());
        };

        let mut new = NewCustomer::from_email(email);
        if let Some(name) = customer.name.as_deref() {
            new = new.with_full_name(name);
        }
        new.phone = customer.phone.clone();
        new.processor_customer_id = Some(customer.id.clone());

        self.stores.customers.upsert(new).await?;
        Ok(())
    }

    /// Returns `Ok(None)` when the session turned out to be a duplicate.
    async fn insert_with_number_retry(
        &self,
        mut new_order: NewOrder,
    ) -> Result<Option<crate::models::Order>, OrderError> {
        for attempt in 0..2 {
            match self.stores.orders.insert(new_order.clone()).await {
                Ok(order) => return Ok(Some(order)),
                Err(e) if e.is_unique_violation_on(constraints::ORDERS_CHECKOUT_SESSION) => {
                    tracing::info!("concurrent delivery already created this order");
                    return Ok(None);
                }
                Err(e)
                    if e.is_unique_violation_on(constraints::ORDERS_ORDER_NUMBER)
                        && attempt == 0 =>
                {
                    let regenerated = (self.order_numbers)();
                    tracing::warn!(
                        collided = %new_order.order_number,
                        regenerated = %regenerated,
                        "order number collision, retrying once"
                    );
                    new_order.order_number = regenerated;
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Second collision in a row; let the processor retry the event.
        Err(OrderError::Store(StoreError::UniqueViolation {
            constraint: constraints::ORDERS_ORDER_NUMBER.to_owned(),
        }))
    }

    /// Resolve or create the customer; on failure fall back to a guest
    /// order carrying the email directly.
    async fn resolve_customer(
        &self,
        session: &CheckoutSession,
    ) -> (Option<Uuid>, Option<Email>) {
        let Some(email) = session.buyer_email().and_then(|e| Email::parse(e).ok()) else {
            tracing::warn!("checkout session without usable email, creating guest order");
            return (None, None);
        };

        let mut new = NewCustomer::from_email(email.clone());
        if let Some(details) = &session.customer_details {
            if let Some(name) = details.name.as_deref() {
                new = new.with_full_name(name);
            }
            new.phone = details.phone.clone();
        }
        new.processor_customer_id = session.customer.clone();

        match self.stores.customers.upsert(new).await {
            Ok(customer) => (Some(customer.id), None),
            Err(error) => {
                tracing::warn!(%error, "customer upsert failed, creating guest order");
                (None, Some(email))
            }
        }
    }
}

/// Lines from the serialized cart in the session metadata, or the degraded
/// fallback from the processor's own line items when that bag is missing or
/// malformed.
fn parse_lines(session: &CheckoutSession) -> Vec<NewOrderLine> {
    if let Some(raw) = session.metadata.get("items") {
        match serde_json::from_str::<Vec<CartItem>>(raw) {
            Ok(items) => return items.iter().map(cart_line).collect(),
            Err(error) => {
                tracing::warn!(%error, "cart metadata malformed, falling back to line items");
            }
        }
    }
    session
        .line_items
        .as_ref()
        .map(|list| {
            list.data
                .iter()
                .enumerate()
                .map(|(index, item)| fallback_line(index, item))
                .collect()
        })
        .unwrap_or_default()
}

fn cart_line(item: &CartItem) -> NewOrderLine {
    let size = item.size.as_deref().or(item.metadata.size.as_deref());
    let sku = derive_sku(&SkuParts {
        category: item.category.as_deref(),
        color: item.color.as_deref(),
        item_type: item.metadata.item_type.as_deref(),
        style: item.metadata.style.as_deref(),
        fit: item.metadata.fit.as_deref(),
        size,
    });
    NewOrderLine {
        product_sku: sku,
        product_name: item.name.clone(),
        variant_id: None,
        quantity: item.quantity,
        unit_price: item.price,
        total_price: item.price.mul_quantity(i64::from(item.quantity)),
        size: size.map(ToOwned::to_owned),
        color: item.color.clone(),
        attributes: serde_json::json!({
            "type": item.metadata.item_type,
            "style": item.metadata.style,
            "fit": item.metadata.fit,
            "category": item.category,
            "product_id": item.stripe_product_id,
            "price_id": item.stripe_price_id,
        }),
    }
}

fn fallback_line(index: usize, item: &LineItem) -> NewOrderLine {
    let quantity = item.quantity.unwrap_or(1).max(1);
    let total = item.amount_total.unwrap_or(Money::ZERO);
    let unit = item
        .price
        .as_ref()
        .and_then(|p| p.unit_amount)
        .unwrap_or_else(|| Money::from_minor(total.minor() / i64::from(quantity)));
    NewOrderLine {
        product_sku: format!("UNKNOWN-{index}"),
        product_name: item
            .description
            .clone()
            .unwrap_or_else(|| "Unknown Product".to_owned()),
        variant_id: None,
        quantity,
        unit_price: unit,
        total_price: total,
        size: None,
        color: None,
        attributes: serde_json::json!({}),
    }
}

/// Bundle detection from session metadata: `order_type == "bundle"` marks
/// the order and the declared percentage discounts the subtotal.
fn bundle_context(session: &CheckoutSession, subtotal: Money) -> (OrderType, Option<String>, Money) {
    if session.metadata.get("order_type").map(String::as_str) != Some("bundle") {
        return (OrderType::Standard, None, Money::ZERO);
    }
    let bundle_type = session.metadata.get("bundle_type").cloned();
    let percent = session
        .metadata
        .get("bundle_discount")
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(0);
    (OrderType::Bundle, bundle_type, subtotal.percent(percent))
}

/// Lines total + tax + shipping - discount must equal the order total
/// within one minor unit per line of rounding slack.
fn check_totals_invariant(
    lines: &[NewOrderLine],
    tax: Money,
    shipping: Money,
    discount: Money,
    total: Money,
) {
    let lines_total: Money = lines.iter().map(|l| l.total_price).sum();
    let computed = lines_total + tax + shipping - discount;
    let tolerance = i64::try_from(lines.len()).unwrap_or(i64::MAX);
    if computed.abs_diff(total) > tolerance {
        tracing::warn!(
            %computed,
            %total,
            "order totals do not reconcile with line items"
        );
    }
}

fn extract_addresses(session: &CheckoutSession) -> (Option<Address>, Option<Address>) {
    let shipping = session.shipping_details.as_ref().map(|details| {
        let (first, last) = split_name(details.name.as_deref());
        to_address(first, last, details.address.as_ref())
    });
    let billing = session.customer_details.as_ref().map(|details| {
        let (first, last) = split_name(details.name.as_deref());
        to_address(first, last, details.address.as_ref())
    });
    (
        shipping.filter(|a| !a.is_empty()),
        billing.filter(|a| !a.is_empty()),
    )
}

fn split_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return (None, None);
    };
    match name.split_once(' ') {
        Some((first, rest)) => (Some(first.to_owned()), Some(rest.trim().to_owned())),
        None => (Some(name.to_owned()), None),
    }
}

fn to_address(
    first_name: Option<String>,
    last_name: Option<String>,
    address: Option<&ProcessorAddress>,
) -> Address {
    let address = address.cloned().unwrap_or_default();
    Address {
        first_name,
        last_name,
        line1: address.line1,
        line2: address.line2,
        city: address.city,
        state: address.state,
        postal_code: address.postal_code,
        country: address.country,
    }
}
