//! Cross-store synchronization.
//!
//! Every fast-path order that reaches `paid` must end up mirrored into the
//! canonical store exactly once. Two drivers share one idempotent mirror
//! routine: a real-time subscription on paid inserts, and a periodic sweep
//! that catches whatever the subscription missed (dropped connection,
//! restart). The canonical order-number unique constraint is the actual
//! exactly-once guard; the existence check in front of it is an
//! optimization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kct_core::{Email, OrderSource, OrderStatus, PaymentStatus};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::models::{FastPathOrder, NewOrder, NewOrderLine};
use crate::store::{StoreError, Stores, constraints};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub mirrored: usize,
    pub failed: usize,
}

struct Inner {
    stores: Stores,
    sweep_interval: Duration,
}

/// The synchronizer, with an explicit start/stop lifecycle.
pub struct SyncService {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    #[must_use]
    pub fn new(stores: Stores, sweep_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                stores,
                sweep_interval,
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch the real-time subscription task and the sweep task.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the paid-order subscription cannot be
    /// established.
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut handles = self.handles.lock().await;

        let mut feed = self.inner.stores.fast_path.watch_paid().await?;
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    order = feed.recv() => {
                        let Some(order) = order else {
                            tracing::warn!("paid-order feed closed, sweep will cover");
                            break;
                        };
                        if let Err(error) = mirror(&inner.stores, &order).await {
                            tracing::error!(
                                %error,
                                order_number = %order.order_number,
                                "real-time mirror failed, sweep will retry"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup work
            // (like a failed-queue flush) settles first.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = sweep(&inner.stores).await;
                        if report.examined > 0 {
                            tracing::info!(
                                examined = report.examined,
                                mirrored = report.mirrored,
                                failed = report.failed,
                                "sync sweep complete"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));

        tracing::info!(interval = ?self.inner.sweep_interval, "sync service started");
        Ok(())
    }

    /// Signal both tasks and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "sync task did not stop cleanly");
            }
        }
        tracing::info!("sync service stopped");
    }

    /// Run one sweep pass now. Also used by the operator CLI.
    pub async fn sweep_once(&self) -> SweepReport {
        sweep(&self.inner.stores).await
    }

    /// Propagate a status change to both stores, canonical first. A failure
    /// on the second write is logged, not rolled back; the stores drift
    /// until the next sweep or retry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the canonical write fails.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_number: &str,
        status: OrderStatus,
    ) -> Result<(), SyncError> {
        let stores = &self.inner.stores;
        if let Some(order) = stores.orders.get_by_order_number(order_number).await? {
            stores.orders.update_status(order.id, status).await?;
        } else {
            tracing::warn!(order_number, "status update for unknown canonical order");
        }

        match stores.fast_path.get_by_order_number(order_number).await {
            Ok(Some(fast)) => {
                if let Err(error) = stores.fast_path.update_status(fast.id, status.as_str()).await
                {
                    tracing::error!(%error, order_number, "fast-path status write failed");
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(%error, order_number, "fast-path lookup failed");
            }
        }
        Ok(())
    }
}

/// One reconciliation pass over unsynced paid fast-path orders,
/// continue-on-error.
async fn sweep(stores: &Stores) -> SweepReport {
    let pending = match stores.fast_path.list_unsynced_paid().await {
        Ok(pending) => pending,
        Err(error) => {
            tracing::error!(%error, "could not list unsynced paid orders");
            return SweepReport::default();
        }
    };

    let mut report = SweepReport {
        examined: pending.len(),
        ..SweepReport::default()
    };
    for order in &pending {
        match mirror(stores, order).await {
            Ok(true) => report.mirrored += 1,
            Ok(false) => {}
            Err(error) => {
                report.failed += 1;
                tracing::error!(
                    %error,
                    order_number = %order.order_number,
                    "mirror failed, continuing with next order"
                );
            }
        }
    }
    report
}

/// Mirror one paid fast-path order into the canonical store. Returns
/// `Ok(true)` when a canonical order was inserted, `Ok(false)` when it
/// already existed. The sync flag is set only after a confirmed write.
#[instrument(skip(stores, fast), fields(order_number = %fast.order_number))]
async fn mirror(stores: &Stores, fast: &FastPathOrder) -> Result<bool, SyncError> {
    if fast.is_synced() {
        return Ok(false);
    }

    if stores
        .orders
        .get_by_order_number(&fast.order_number)
        .await?
        .is_some()
    {
        stores.fast_path.mark_synced(fast.id, Utc::now()).await?;
        return Ok(false);
    }

    let inserted = match stores.orders.insert(to_canonical(fast)).await {
        Ok(_) => true,
        Err(e) if e.is_unique_violation_on(constraints::ORDERS_ORDER_NUMBER) => {
            // Raced the other driver; the order is there, just mark the flag.
            tracing::debug!("canonical order appeared concurrently");
            false
        }
        Err(e) => return Err(e.into()),
    };

    stores.fast_path.mark_synced(fast.id, Utc::now()).await?;
    if inserted {
        tracing::info!("fast-path order mirrored");
    }
    Ok(inserted)
}

/// Fast-path to canonical field mapping. The only place the two schemas
/// meet; status goes through the fixed lookup table.
fn to_canonical(fast: &FastPathOrder) -> NewOrder {
    let lines = fast
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| NewOrderLine {
            product_sku: item
                .sku
                .clone()
                .unwrap_or_else(|| format!("UNKNOWN-{index}")),
            product_name: item.name.clone(),
            variant_id: None,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.unit_price.mul_quantity(i64::from(item.quantity)),
            size: item.size.clone(),
            color: item.color.clone(),
            attributes: serde_json::json!({}),
        })
        .collect();

    NewOrder {
        order_number: fast.order_number.clone(),
        customer_id: None,
        guest_email: Email::parse(&fast.customer_email).ok(),
        status: OrderStatus::from_fast_path(&fast.status),
        payment_status: fast.payment_status,
        order_type: kct_core::OrderType::Standard,
        source: OrderSource::ChatCommerce,
        subtotal: fast.total,
        tax: kct_core::Money::ZERO,
        shipping: kct_core::Money::ZERO,
        discount: kct_core::Money::ZERO,
        total: fast.total,
        currency: "USD".to_owned(),
        checkout_session_id: fast.checkout_session_id.clone(),
        payment_intent_id: None,
        bundle_type: None,
        shipping_address: None,
        billing_address: None,
        confirmed_at: (fast.payment_status == PaymentStatus::Paid).then_some(fast.created_at),
        lines,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kct_core::Money;

    use super::*;
    use crate::models::{FastPathItem, NewFastPathOrder};
    use crate::store::memory::MemoryStores;

    fn paid_order(number: &str) -> NewFastPathOrder {
        NewFastPathOrder {
            order_number: number.to_owned(),
            checkout_session_id: None,
            customer_email: "buyer@example.com".to_owned(),
            items: vec![FastPathItem {
                name: "Burgundy Vest".to_owned(),
                sku: Some("KCT-VESTS-BURGUNDY-L".to_owned()),
                quantity: 1,
                unit_price: Money::from_minor(7_500),
                size: Some("L".to_owned()),
                color: Some("burgundy".to_owned()),
            }],
            total: Money::from_minor(7_500),
            status: "pending".to_owned(),
            payment_status: PaymentStatus::Paid,
            shipping_address: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_mirrors_paid_orders_and_sets_flag() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        let fast = stores.fast_path.insert(paid_order("KCT-2024-000123")).await.unwrap();

        let report = sweep(&stores).await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.mirrored, 1);
        assert_eq!(report.failed, 0);

        let canonical = stores
            .orders
            .get_by_order_number("KCT-2024-000123")
            .await
            .unwrap()
            .expect("canonical order mirrored");
        assert_eq!(canonical.status, OrderStatus::Pending);
        assert_eq!(canonical.source, OrderSource::ChatCommerce);
        assert_eq!(canonical.total, Money::from_minor(7_500));

        let lines = stores.orders.lines(canonical.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_sku, "KCT-VESTS-BURGUNDY-L");

        let synced = stores
            .fast_path
            .get_by_order_number(&fast.order_number)
            .await
            .unwrap()
            .unwrap();
        assert!(synced.is_synced());
        assert!(synced.metadata.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_unpaid_orders_not_swept() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        let mut unpaid = paid_order("KCT-2024-000124");
        unpaid.payment_status = PaymentStatus::Pending;
        stores.fast_path.insert(unpaid).await.unwrap();

        let report = sweep(&stores).await;
        assert_eq!(report.examined, 0);
        assert!(
            stores
                .orders
                .get_by_order_number("KCT-2024-000124")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_noop() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        stores.fast_path.insert(paid_order("KCT-2024-000125")).await.unwrap();

        let first = sweep(&stores).await;
        assert_eq!(first.mirrored, 1);
        let second = sweep(&stores).await;
        assert_eq!(second.examined, 0);
        assert_eq!(second.mirrored, 0);
        assert_eq!(mem.order_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_drivers_mirror_exactly_once() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        let fast = stores.fast_path.insert(paid_order("KCT-2024-000126")).await.unwrap();

        let a = mirror(&stores, &fast);
        let b = mirror(&stores, &fast);
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        assert_eq!(mem.order_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failing_order() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        stores.fast_path.insert(paid_order("KCT-2024-000127")).await.unwrap();
        stores.fast_path.insert(paid_order("KCT-2024-000128")).await.unwrap();

        // First canonical insert fails; the sweep must still mirror the
        // other order.
        mem.fail_next_order_insert();
        let report = sweep(&stores).await;
        assert_eq!(report.examined, 2);
        assert_eq!(report.mirrored, 1);
        assert_eq!(report.failed, 1);

        // The failed one is retried on the next pass.
        let report = sweep(&stores).await;
        assert_eq!(report.mirrored, 1);
        assert_eq!(mem.order_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_fast_path_status_maps_to_pending() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        let mut order = paid_order("KCT-2024-000129");
        order.status = "awaiting_stylist".to_owned();
        stores.fast_path.insert(order).await.unwrap();

        sweep(&stores).await;
        let canonical = stores
            .orders
            .get_by_order_number("KCT-2024-000129")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canonical.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_realtime_path_mirrors_on_insert() {
        let mem = MemoryStores::new();
        let service = SyncService::new(mem.stores(), Duration::from_secs(3600));
        service.start().await.unwrap();

        mem.stores()
            .fast_path
            .insert(paid_order("KCT-2024-000130"))
            .await
            .unwrap();

        // Give the subscription task a chance to run.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if mem.order_count() == 1 {
                break;
            }
        }
        assert_eq!(mem.order_count(), 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_status_update_writes_both_stores() {
        let mem = MemoryStores::new();
        let stores = mem.stores();
        let fast = stores.fast_path.insert(paid_order("KCT-2024-000131")).await.unwrap();
        sweep(&stores).await;

        let service = SyncService::new(stores.clone(), Duration::from_secs(3600));
        service
            .update_status("KCT-2024-000131", OrderStatus::Shipped)
            .await
            .unwrap();

        let canonical = stores
            .orders
            .get_by_order_number("KCT-2024-000131")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canonical.status, OrderStatus::Shipped);

        let fast = stores
            .fast_path
            .get_by_order_number(&fast.order_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fast.status, "shipped");
    }
}
