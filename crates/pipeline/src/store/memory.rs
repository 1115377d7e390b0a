//! In-memory store implementations.
//!
//! Behaviorally equivalent to the Postgres stores, including the constraint
//! names raised on duplicate writes, so handler tests exercise the same
//! conflict paths they would hit in production. Used by unit and
//! integration tests and by local development without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kct_core::{Email, OrderStatus, PaymentStatus};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    CustomerStore, EventStore, FastPathStore, InventoryAdjustment, InventoryStore, OrderStore,
    StoreError, Stores, constraints,
};
use crate::models::{
    Customer, FastPathMetadata, FastPathOrder, NewCustomer, NewFastPathOrder, NewOrder, Order,
    OrderLine,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unique_violation(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_owned(),
    }
}

#[derive(Clone, Copy)]
struct VariantStock {
    available: i32,
    reserved: i32,
}

#[derive(Default)]
struct Inner {
    customers: Mutex<Vec<Customer>>,
    orders: Mutex<Vec<Order>>,
    lines: Mutex<Vec<OrderLine>>,
    fast_path: Mutex<Vec<FastPathOrder>>,
    inventory: Mutex<HashMap<String, VariantStock>>,
    events: Mutex<HashSet<String>>,
    paid_watchers: Mutex<Vec<mpsc::Sender<FastPathOrder>>>,
    fail_next_order_insert: AtomicBool,
}

/// Shared state behind all five in-memory stores.
#[derive(Clone, Default)]
pub struct MemoryStores {
    inner: Arc<Inner>,
}

impl MemoryStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregate handle wired to this state.
    #[must_use]
    pub fn stores(&self) -> Stores {
        Stores {
            customers: Arc::new(self.customers()),
            orders: Arc::new(self.orders()),
            fast_path: Arc::new(self.fast_path()),
            inventory: Arc::new(self.inventory()),
            events: Arc::new(self.events()),
        }
    }

    #[must_use]
    pub fn customers(&self) -> MemoryCustomerStore {
        MemoryCustomerStore {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn orders(&self) -> MemoryOrderStore {
        MemoryOrderStore {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn fast_path(&self) -> MemoryFastPathStore {
        MemoryFastPathStore {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn inventory(&self) -> MemoryInventoryStore {
        MemoryInventoryStore {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn events(&self) -> MemoryEventStore {
        MemoryEventStore {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Seed a variant with available stock and no reservations.
    pub fn seed_variant(&self, sku: &str, available: i32) {
        self.seed_variant_stock(sku, available, 0);
    }

    /// Seed a variant with both stock counters.
    pub fn seed_variant_stock(&self, sku: &str, available: i32, reserved: i32) {
        lock(&self.inner.inventory).insert(
            sku.to_owned(),
            VariantStock {
                available,
                reserved,
            },
        );
    }

    /// Make the next order insert fail after validation, simulating a write
    /// error mid-transaction.
    pub fn fail_next_order_insert(&self) {
        self.inner
            .fail_next_order_insert
            .store(true, Ordering::SeqCst);
    }

    /// Count of stored canonical orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        lock(&self.inner.orders).len()
    }

    /// Count of stored order lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        lock(&self.inner.lines).len()
    }
}

#[derive(Clone)]
pub struct MemoryCustomerStore {
    inner: Arc<Inner>,
}

#[async_trait]
impl CustomerStore for MemoryCustomerStore {
    async fn upsert(&self, new: NewCustomer) -> Result<Customer, StoreError> {
        let mut customers = lock(&self.inner.customers);
        if let Some(existing) = customers.iter_mut().find(|c| c.email == new.email) {
            if new.first_name.is_some() {
                existing.first_name = new.first_name;
            }
            if new.last_name.is_some() {
                existing.last_name = new.last_name;
            }
            if new.phone.is_some() {
                existing.phone = new.phone;
            }
            if new.processor_customer_id.is_some() {
                existing.processor_customer_id = new.processor_customer_id;
            }
            return Ok(existing.clone());
        }

        let customer = Customer {
            id: Uuid::new_v4(),
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            phone: new.phone,
            processor_customer_id: new.processor_customer_id,
            created_at: Utc::now(),
        };
        customers.push(customer.clone());
        Ok(customer)
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        Ok(lock(&self.inner.customers)
            .iter()
            .find(|c| c.email == *email)
            .cloned())
    }
}

#[derive(Clone)]
pub struct MemoryOrderStore {
    inner: Arc<Inner>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, new: NewOrder) -> Result<Order, StoreError> {
        let mut orders = lock(&self.inner.orders);

        if orders.iter().any(|o| o.order_number == new.order_number) {
            return Err(unique_violation(constraints::ORDERS_ORDER_NUMBER));
        }
        if let Some(session) = &new.checkout_session_id
            && orders
                .iter()
                .any(|o| o.checkout_session_id.as_deref() == Some(session))
        {
            return Err(unique_violation(constraints::ORDERS_CHECKOUT_SESSION));
        }
        if self
            .inner
            .fail_next_order_insert
            .swap(false, Ordering::SeqCst)
        {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "injected write failure".into(),
            )));
        }

        let order_id = Uuid::new_v4();
        let order = Order {
            id: order_id,
            order_number: new.order_number,
            customer_id: new.customer_id,
            guest_email: new.guest_email,
            status: new.status,
            payment_status: new.payment_status,
            order_type: new.order_type,
            source: new.source,
            subtotal: new.subtotal,
            tax: new.tax,
            shipping: new.shipping,
            discount: new.discount,
            total: new.total,
            currency: new.currency,
            checkout_session_id: new.checkout_session_id,
            payment_intent_id: new.payment_intent_id,
            bundle_type: new.bundle_type,
            shipping_address: new.shipping_address,
            billing_address: new.billing_address,
            confirmed_at: new.confirmed_at,
            created_at: Utc::now(),
        };
        orders.push(order.clone());

        let mut lines = lock(&self.inner.lines);
        for line in new.lines {
            lines.push(OrderLine {
                id: Uuid::new_v4(),
                order_id,
                product_sku: line.product_sku,
                product_name: line.product_name,
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.total_price,
                size: line.size,
                color: line.color,
                attributes: line.attributes,
            });
        }

        Ok(order)
    }

    async fn get_by_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(lock(&self.inner.orders)
            .iter()
            .find(|o| o.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(lock(&self.inner.orders)
            .iter()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn get_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(lock(&self.inner.orders)
            .iter()
            .find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, StoreError> {
        Ok(lock(&self.inner.lines)
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut orders = lock(&self.inner.orders);
        if let Some(order) = orders.iter_mut().find(|o| o.id == order_id) {
            order.status = status;
        }
        Ok(())
    }

    async fn mark_paid(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut orders = lock(&self.inner.orders);
        if let Some(order) = orders.iter_mut().find(|o| o.id == order_id) {
            order.payment_status = PaymentStatus::Paid;
            if order.confirmed_at.is_none() {
                order.confirmed_at = Some(at);
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryFastPathStore {
    inner: Arc<Inner>,
}

#[async_trait]
impl FastPathStore for MemoryFastPathStore {
    async fn insert(&self, new: NewFastPathOrder) -> Result<FastPathOrder, StoreError> {
        let order = {
            let mut fast_path = lock(&self.inner.fast_path);
            if fast_path.iter().any(|o| o.order_number == new.order_number) {
                return Err(unique_violation(constraints::FAST_PATH_ORDER_NUMBER));
            }
            let order = FastPathOrder {
                id: Uuid::new_v4(),
                order_number: new.order_number,
                checkout_session_id: new.checkout_session_id,
                customer_email: new.customer_email,
                items: new.items,
                total: new.total,
                status: new.status,
                payment_status: new.payment_status,
                shipping_address: new.shipping_address,
                metadata: FastPathMetadata::default(),
                created_at: Utc::now(),
            };
            fast_path.push(order.clone());
            order
        };

        if order.payment_status == PaymentStatus::Paid {
            let mut watchers = lock(&self.inner.paid_watchers);
            watchers.retain(|tx| tx.try_send(order.clone()).is_ok());
        }

        Ok(order)
    }

    async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<FastPathOrder>, StoreError> {
        Ok(lock(&self.inner.fast_path)
            .iter()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_unsynced_paid(&self) -> Result<Vec<FastPathOrder>, StoreError> {
        Ok(lock(&self.inner.fast_path)
            .iter()
            .filter(|o| o.payment_status == PaymentStatus::Paid && !o.metadata.synced_to_main)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut fast_path = lock(&self.inner.fast_path);
        if let Some(order) = fast_path.iter_mut().find(|o| o.id == id) {
            order.metadata.synced_to_main = true;
            order.metadata.synced_at = Some(at);
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        let mut fast_path = lock(&self.inner.fast_path);
        if let Some(order) = fast_path.iter_mut().find(|o| o.id == id) {
            order.status = status.to_owned();
        }
        Ok(())
    }

    async fn watch_paid(&self) -> Result<mpsc::Receiver<FastPathOrder>, StoreError> {
        let (tx, rx) = mpsc::channel(64);
        lock(&self.inner.paid_watchers).push(tx);
        Ok(rx)
    }
}

#[derive(Clone)]
pub struct MemoryInventoryStore {
    inner: Arc<Inner>,
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn decrement_for_sale(
        &self,
        sku: &str,
        quantity: i32,
    ) -> Result<Option<InventoryAdjustment>, StoreError> {
        let mut inventory = lock(&self.inner.inventory);
        let Some(stock) = inventory.get_mut(sku) else {
            return Ok(None);
        };
        let before = *stock;
        stock.available = (before.available - quantity).max(0);
        stock.reserved = (before.reserved - quantity).max(0);
        Ok(Some(InventoryAdjustment {
            sku: sku.to_owned(),
            available_before: before.available,
            available_after: stock.available,
            reserved_before: before.reserved,
            reserved_after: stock.reserved,
        }))
    }

    async fn available(&self, sku: &str) -> Result<Option<i32>, StoreError> {
        Ok(lock(&self.inner.inventory).get(sku).map(|s| s.available))
    }

    async fn reserved(&self, sku: &str) -> Result<Option<i32>, StoreError> {
        Ok(lock(&self.inner.inventory).get(sku).map(|s| s.reserved))
    }
}

#[derive(Clone)]
pub struct MemoryEventStore {
    inner: Arc<Inner>,
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event_id: &str, _event_type: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.inner.events).insert(event_id.to_owned()))
    }

    async fn forget(&self, event_id: &str) -> Result<(), StoreError> {
        lock(&self.inner.events).remove(event_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kct_core::Money;

    use super::*;

    fn paid_fast_path(number: &str) -> NewFastPathOrder {
        NewFastPathOrder {
            order_number: number.to_owned(),
            checkout_session_id: None,
            customer_email: "buyer@example.com".to_owned(),
            items: vec![],
            total: Money::from_minor(12_500),
            status: "pending".to_owned(),
            payment_status: PaymentStatus::Paid,
            shipping_address: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_order_number_raises_named_constraint() {
        let mem = MemoryStores::new();
        let store = mem.fast_path();
        store.insert(paid_fast_path("KCT-2025-000001")).await.unwrap();
        let err = store
            .insert(paid_fast_path("KCT-2025-000001"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on(constraints::FAST_PATH_ORDER_NUMBER));
    }

    #[tokio::test]
    async fn test_watch_paid_sees_new_paid_inserts() {
        let mem = MemoryStores::new();
        let store = mem.fast_path();
        let mut feed = store.watch_paid().await.unwrap();

        let mut unpaid = paid_fast_path("KCT-2025-000002");
        unpaid.payment_status = PaymentStatus::Pending;
        store.insert(unpaid).await.unwrap();
        store.insert(paid_fast_path("KCT-2025-000003")).await.unwrap();

        let seen = feed.recv().await.unwrap();
        assert_eq!(seen.order_number, "KCT-2025-000003");
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inventory_floors_at_zero() {
        let mem = MemoryStores::new();
        mem.seed_variant_stock("KCT-TIES-RED", 2, 1);
        let inventory = mem.inventory();

        let adj = inventory
            .decrement_for_sale("KCT-TIES-RED", 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adj.available_before, 2);
        assert_eq!(adj.available_after, 0);
        assert_eq!(adj.reserved_before, 1);
        assert_eq!(adj.reserved_after, 0);
        assert!(adj.oversold(5));
        assert_eq!(inventory.available("KCT-TIES-RED").await.unwrap(), Some(0));
        assert_eq!(inventory.reserved("KCT-TIES-RED").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_sale_releases_reservation_with_stock() {
        let mem = MemoryStores::new();
        mem.seed_variant_stock("KCT-SUITS-NAVY-40R", 5, 3);
        let inventory = mem.inventory();

        let adj = inventory
            .decrement_for_sale("KCT-SUITS-NAVY-40R", 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adj.available_after, 3);
        assert_eq!(adj.reserved_after, 1);
        assert_eq!(
            inventory.reserved("KCT-SUITS-NAVY-40R").await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_event_record_deduplicates() {
        let mem = MemoryStores::new();
        let events = mem.events();
        assert!(events.record("evt_1", "checkout.completed").await.unwrap());
        assert!(!events.record("evt_1", "checkout.completed").await.unwrap());
    }

    #[tokio::test]
    async fn test_customer_upsert_keeps_existing_fields() {
        let mem = MemoryStores::new();
        let customers = mem.customers();
        let email = Email::parse("Buyer@Example.com").unwrap();

        let mut first = NewCustomer::from_email(email.clone());
        first.first_name = Some("Ada".to_owned());
        first.phone = Some("+15551234".to_owned());
        customers.upsert(first).await.unwrap();

        let second = NewCustomer::from_email(email.clone());
        let updated = customers.upsert(second).await.unwrap();
        assert_eq!(updated.first_name.as_deref(), Some("Ada"));
        assert_eq!(updated.phone.as_deref(), Some("+15551234"));
        assert_eq!(lock(&mem.inner.customers).len(), 1);
    }
}
