//! Storage for the pipeline's two `PostgreSQL` stores.
//!
//! # Databases
//!
//! - Canonical store: `customers`, `orders`, `order_lines`,
//!   `product_variants`, `webhook_events`
//! - Fast-path store: `fast_path_orders` (JSON items and metadata)
//!
//! Handlers talk to storage through the traits below so tests can run
//! against [`memory`] without a database. Migrations live in
//! `crates/pipeline/migrations/` and run via:
//! ```bash
//! cargo run -p kct-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kct_core::{Email, OrderStatus};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{
    Customer, FastPathOrder, NewCustomer, NewFastPathOrder, NewOrder, Order, OrderLine,
};

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Errors surfaced by the store traits.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write. The constraint name lets
    /// callers tell an order-number collision from a duplicate session.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON document failed to decode.
    #[error("stored document could not be decoded: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether this error is a unique violation on the named constraint.
    #[must_use]
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        matches!(self, Self::UniqueViolation { constraint } if constraint == name)
    }
}

/// Unique constraint names shared by the Postgres schema and the in-memory
/// store, so conflict handling behaves identically against both.
pub mod constraints {
    pub const CUSTOMERS_EMAIL: &str = "customers_email_key";
    pub const ORDERS_ORDER_NUMBER: &str = "orders_order_number_key";
    pub const ORDERS_CHECKOUT_SESSION: &str = "orders_checkout_session_id_key";
    pub const FAST_PATH_ORDER_NUMBER: &str = "fast_path_orders_order_number_key";
    pub const WEBHOOK_EVENTS_EVENT_ID: &str = "webhook_events_event_id_key";
}

/// Customer lookup and upsert, keyed by normalized email.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Insert or update a customer. Present fields overwrite, absent fields
    /// keep their stored values.
    async fn upsert(&self, new: NewCustomer) -> Result<Customer, StoreError>;

    async fn get_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError>;
}

/// Canonical orders and their lines.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order together with its lines in one transaction.
    async fn insert(&self, new: NewOrder) -> Result<Order, StoreError>;

    async fn get_by_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn get_by_order_number(&self, order_number: &str)
    -> Result<Option<Order>, StoreError>;

    async fn get_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, StoreError>;

    async fn update_status(&self, order_id: Uuid, status: OrderStatus)
    -> Result<(), StoreError>;

    /// Mark an order paid and stamp `confirmed_at` if not already set.
    async fn mark_paid(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Fast-path order records and the paid-order feed.
#[async_trait]
pub trait FastPathStore: Send + Sync {
    async fn insert(&self, new: NewFastPathOrder) -> Result<FastPathOrder, StoreError>;

    async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<FastPathOrder>, StoreError>;

    /// All paid orders whose metadata does not yet carry the synced flag.
    async fn list_unsynced_paid(&self) -> Result<Vec<FastPathOrder>, StoreError>;

    /// Set `synced_to_main` and `synced_at` in the metadata document.
    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), StoreError>;

    /// Subscribe to newly inserted paid orders. The feed is best-effort;
    /// the periodic sweep catches anything it misses.
    async fn watch_paid(&self) -> Result<mpsc::Receiver<FastPathOrder>, StoreError>;
}

/// Result of an inventory decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryAdjustment {
    pub sku: String,
    pub available_before: i32,
    pub available_after: i32,
    pub reserved_before: i32,
    pub reserved_after: i32,
}

impl InventoryAdjustment {
    /// Whether the decrement asked for more units than were available.
    #[must_use]
    pub const fn oversold(&self, requested: i32) -> bool {
        self.available_before < requested
    }
}

/// Stock levels per variant SKU.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Decrement available stock and the reservation counter for a sold
    /// SKU in one atomic update, flooring both at zero. A checkout holds a
    /// reservation until the sale lands, so the sale releases it. Returns
    /// `None` when no variant with that SKU exists.
    async fn decrement_for_sale(
        &self,
        sku: &str,
        quantity: i32,
    ) -> Result<Option<InventoryAdjustment>, StoreError>;

    /// Current available stock, or `None` for an unknown SKU.
    async fn available(&self, sku: &str) -> Result<Option<i32>, StoreError>;

    /// Current reservation count, or `None` for an unknown SKU.
    async fn reserved(&self, sku: &str) -> Result<Option<i32>, StoreError>;
}

/// Processed-event log used to deduplicate webhook deliveries.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record an event id. Returns `false` if the id was already recorded,
    /// meaning this delivery is a duplicate.
    async fn record(&self, event_id: &str, event_type: &str) -> Result<bool, StoreError>;

    /// Drop a recorded event id so a redelivery is processed again. Used to
    /// compensate when handling fails after the id was recorded.
    async fn forget(&self, event_id: &str) -> Result<(), StoreError>;
}

/// Aggregate handle passed around the application.
#[derive(Clone)]
pub struct Stores {
    pub customers: Arc<dyn CustomerStore>,
    pub orders: Arc<dyn OrderStore>,
    pub fast_path: Arc<dyn FastPathStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub events: Arc<dyn EventStore>,
}

impl Stores {
    /// Stores backed by the two Postgres pools.
    #[must_use]
    pub fn postgres(canonical: PgPool, fast_path: PgPool) -> Self {
        Self {
            customers: Arc::new(postgres::PgCustomerStore::new(canonical.clone())),
            orders: Arc::new(postgres::PgOrderStore::new(canonical.clone())),
            fast_path: Arc::new(postgres::PgFastPathStore::new(fast_path)),
            inventory: Arc::new(postgres::PgInventoryStore::new(canonical.clone())),
            events: Arc::new(postgres::PgEventStore::new(canonical)),
        }
    }

    /// Fully in-memory stores for tests and local development.
    #[must_use]
    pub fn in_memory() -> Self {
        let mem = memory::MemoryStores::new();
        Self {
            customers: Arc::new(mem.customers()),
            orders: Arc::new(mem.orders()),
            fast_path: Arc::new(mem.fast_path()),
            inventory: Arc::new(mem.inventory()),
            events: Arc::new(mem.events()),
        }
    }
}
