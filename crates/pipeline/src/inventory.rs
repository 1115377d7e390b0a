//! Inventory adjustment for sold line items.
//!
//! Adjustments are a side effect of an order that is already financially
//! real, so nothing here fails the caller: a missing variant, an oversell,
//! or a store error all log and move on. The decrement itself is a single
//! conditional update in the store, which is what keeps concurrent sales of
//! the same variant from losing updates.

use std::sync::Arc;

use tracing::instrument;

use crate::store::{InventoryAdjustment, InventoryStore};

pub struct InventoryCoordinator {
    inventory: Arc<dyn InventoryStore>,
}

impl InventoryCoordinator {
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryStore>) -> Self {
        Self { inventory }
    }

    /// Decrement available stock and release the checkout reservation for
    /// one sold line. Returns the adjustment when a variant matched, `None`
    /// otherwise.
    #[instrument(skip(self))]
    pub async fn record_sale(&self, sku: &str, quantity: i32) -> Option<InventoryAdjustment> {
        match self.inventory.decrement_for_sale(sku, quantity).await {
            Ok(Some(adjustment)) => {
                if adjustment.oversold(quantity) {
                    tracing::warn!(
                        sku,
                        requested = quantity,
                        available = adjustment.available_before,
                        overshoot = quantity - adjustment.available_before,
                        "oversell, stock floored at zero"
                    );
                } else {
                    tracing::debug!(
                        sku,
                        quantity,
                        remaining = adjustment.available_after,
                        "stock decremented"
                    );
                }
                Some(adjustment)
            }
            Ok(None) => {
                tracing::warn!(sku, "no variant for sold SKU, stock not adjusted");
                None
            }
            Err(error) => {
                tracing::warn!(%error, sku, "stock adjustment failed");
                None
            }
        }
    }
}
