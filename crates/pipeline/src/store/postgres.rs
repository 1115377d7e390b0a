//! Postgres store implementations.
//!
//! Queries are plain runtime `sqlx::query_as` calls with positional binds.
//! Unique-constraint violations are mapped to
//! [`StoreError::UniqueViolation`] carrying the constraint name so callers
//! can distinguish an order-number collision from a duplicate checkout
//! session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kct_core::{Email, OrderStatus};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    CustomerStore, EventStore, FastPathStore, InventoryAdjustment, InventoryStore, OrderStore,
    StoreError,
};
use crate::models::{
    Customer, FastPathOrder, NewCustomer, NewFastPathOrder, NewOrder, Order, OrderLine,
};

/// Postgres channel carrying ids of newly inserted paid fast-path orders.
/// A trigger installed by the fast-path migrations does the `pg_notify`.
const PAID_CHANNEL: &str = "fast_path_paid";

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.code().as_deref() == Some("23505")
    {
        return StoreError::UniqueViolation {
            constraint: db.constraint().unwrap_or("unknown").to_owned(),
        };
    }
    StoreError::Database(err)
}

pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    async fn upsert(&self, new: NewCustomer) -> Result<Customer, StoreError> {
        sqlx::query_as::<_, Customer>(
            r"
            INSERT INTO customers (email, first_name, last_name, phone, processor_customer_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE SET
                first_name = COALESCE(EXCLUDED.first_name, customers.first_name),
                last_name = COALESCE(EXCLUDED.last_name, customers.last_name),
                phone = COALESCE(EXCLUDED.phone, customers.phone),
                processor_customer_id =
                    COALESCE(EXCLUDED.processor_customer_id, customers.processor_customer_id)
            RETURNING *
            ",
        )
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.phone)
        .bind(&new.processor_customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, new: NewOrder) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let order = sqlx::query_as::<_, Order>(
            r"
            INSERT INTO orders (
                order_number, customer_id, guest_email, status, payment_status,
                order_type, source, subtotal, tax, shipping, discount, total,
                currency, checkout_session_id, payment_intent_id, bundle_type,
                shipping_address, billing_address, confirmed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19)
            RETURNING *
            ",
        )
        .bind(&new.order_number)
        .bind(new.customer_id)
        .bind(&new.guest_email)
        .bind(new.status.as_str())
        .bind(new.payment_status.as_str())
        .bind(new.order_type.as_str())
        .bind(new.source.as_str())
        .bind(new.subtotal)
        .bind(new.tax)
        .bind(new.shipping)
        .bind(new.discount)
        .bind(new.total)
        .bind(&new.currency)
        .bind(&new.checkout_session_id)
        .bind(&new.payment_intent_id)
        .bind(&new.bundle_type)
        .bind(new.shipping_address.as_ref().map(Json))
        .bind(new.billing_address.as_ref().map(Json))
        .bind(new.confirmed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;

        for line in &new.lines {
            sqlx::query(
                r"
                INSERT INTO order_lines (
                    order_id, product_sku, product_name, variant_id, quantity,
                    unit_price, total_price, size, color, attributes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(order.id)
            .bind(&line.product_sku)
            .bind(&line.product_name)
            .bind(line.variant_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total_price)
            .bind(&line.size)
            .bind(&line.color)
            .bind(Json(&line.attributes))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        tx.commit().await.map_err(map_err)?;
        Ok(order)
    }

    async fn get_by_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE checkout_session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn get_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE payment_intent_id = $1")
            .bind(payment_intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, StoreError> {
        sqlx::query_as::<_, OrderLine>(
            "SELECT * FROM order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn mark_paid(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE orders
            SET payment_status = 'paid',
                confirmed_at = COALESCE(confirmed_at, $2)
            WHERE id = $1
            ",
        )
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }
}

pub struct PgFastPathStore {
    pool: PgPool,
}

impl PgFastPathStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FastPathStore for PgFastPathStore {
    async fn insert(&self, new: NewFastPathOrder) -> Result<FastPathOrder, StoreError> {
        sqlx::query_as::<_, FastPathOrder>(
            r"
            INSERT INTO fast_path_orders (
                order_number, checkout_session_id, customer_email, items,
                total, status, payment_status, shipping_address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            ",
        )
        .bind(&new.order_number)
        .bind(&new.checkout_session_id)
        .bind(&new.customer_email)
        .bind(Json(&new.items))
        .bind(new.total)
        .bind(&new.status)
        .bind(new.payment_status.as_str())
        .bind(&new.shipping_address)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<FastPathOrder>, StoreError> {
        sqlx::query_as::<_, FastPathOrder>(
            "SELECT * FROM fast_path_orders WHERE order_number = $1",
        )
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_unsynced_paid(&self) -> Result<Vec<FastPathOrder>, StoreError> {
        sqlx::query_as::<_, FastPathOrder>(
            r"
            SELECT * FROM fast_path_orders
            WHERE payment_status = 'paid'
              AND COALESCE((metadata->>'synced_to_main')::boolean, false) = false
            ORDER BY created_at
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE fast_path_orders
            SET metadata = metadata
                || jsonb_build_object('synced_to_main', true, 'synced_at', to_jsonb($2::timestamptz))
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE fast_path_orders SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn watch_paid(&self) -> Result<mpsc::Receiver<FastPathOrder>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(map_err)?;
        listener.listen(PAID_CHANNEL).await.map_err(map_err)?;

        let (tx, rx) = mpsc::channel(64);
        let pool = self.pool.clone();
        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(error) => {
                        tracing::warn!(%error, "paid-order listener dropped, relying on sweep");
                        break;
                    }
                };
                let Ok(id) = notification.payload().parse::<Uuid>() else {
                    tracing::warn!(payload = notification.payload(), "unparseable notify payload");
                    continue;
                };
                let row = sqlx::query_as::<_, FastPathOrder>(
                    "SELECT * FROM fast_path_orders WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&pool)
                .await;
                match row {
                    Ok(Some(order)) => {
                        if tx.send(order).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(%error, %id, "failed to load notified fast-path order");
                    }
                }
            }
        });

        Ok(rx)
    }
}

pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn decrement_for_sale(
        &self,
        sku: &str,
        quantity: i32,
    ) -> Result<Option<InventoryAdjustment>, StoreError> {
        // Single statement so concurrent decrements serialize on the row
        // lock and the floor at zero holds for both counters.
        let row = sqlx::query_as::<_, (String, i32, i32, i32, i32)>(
            r"
            UPDATE product_variants AS v
            SET available = GREATEST(v.available - $2, 0),
                reserved = GREATEST(v.reserved - $2, 0)
            FROM (
                SELECT id, available, reserved
                FROM product_variants WHERE sku = $1 FOR UPDATE
            ) AS prev
            WHERE v.id = prev.id
            RETURNING v.sku, prev.available, v.available, prev.reserved, v.reserved
            ",
        )
        .bind(sku)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(row.map(
            |(sku, available_before, available_after, reserved_before, reserved_after)| {
                InventoryAdjustment {
                    sku,
                    available_before,
                    available_after,
                    reserved_before,
                    reserved_after,
                }
            },
        ))
    }

    async fn available(&self, sku: &str) -> Result<Option<i32>, StoreError> {
        let row = sqlx::query_as::<_, (i32,)>(
            "SELECT available FROM product_variants WHERE sku = $1",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.map(|(available,)| available))
    }

    async fn reserved(&self, sku: &str) -> Result<Option<i32>, StoreError> {
        let row = sqlx::query_as::<_, (i32,)>(
            "SELECT reserved FROM product_variants WHERE sku = $1",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.map(|(reserved,)| reserved))
    }
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn record(&self, event_id: &str, event_type: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO webhook_events (event_id, event_type)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn forget(&self, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM webhook_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}
