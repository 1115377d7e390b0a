//! Fast-path reconciliation: paid chat-commerce orders end up mirrored in
//! the canonical store exactly once, through either driver.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use kct_core::{Money, OrderSource, OrderStatus, PaymentStatus};
use kct_integration_tests::TestContext;
use kct_pipeline::models::{FastPathItem, NewFastPathOrder};
use kct_pipeline::sync::SyncService;

fn paid_fast_path(number: &str) -> NewFastPathOrder {
    NewFastPathOrder {
        order_number: number.to_owned(),
        checkout_session_id: None,
        customer_email: "chat-buyer@example.com".to_owned(),
        items: vec![FastPathItem {
            name: "Charcoal Suit".to_owned(),
            sku: Some("KCT-SUITS-CHARCOAL-42L".to_owned()),
            quantity: 1,
            unit_price: Money::from_minor(29_900),
            size: Some("42L".to_owned()),
            color: Some("charcoal".to_owned()),
        }],
        total: Money::from_minor(29_900),
        status: "pending".to_owned(),
        payment_status: PaymentStatus::Paid,
        shipping_address: Some("1 Main St, Detroit MI 48201".to_owned()),
    }
}

#[tokio::test]
async fn sweep_mirrors_unsynced_paid_order() {
    let ctx = TestContext::new().await;
    let stores = ctx.state.stores().clone();
    stores
        .fast_path
        .insert(paid_fast_path("KCT-2024-000123"))
        .await
        .unwrap();

    let service = SyncService::new(stores.clone(), Duration::from_secs(3600));
    let report = service.sweep_once().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.mirrored, 1);

    let order = stores
        .orders
        .get_by_order_number("KCT-2024-000123")
        .await
        .unwrap()
        .expect("mirrored into canonical store");
    assert_eq!(order.source, OrderSource::ChatCommerce);
    assert_eq!(order.total, Money::from_minor(29_900));
    assert!(
        order.guest_email.is_some(),
        "chat buyer carried as guest email"
    );

    let fast = stores
        .fast_path
        .get_by_order_number("KCT-2024-000123")
        .await
        .unwrap()
        .unwrap();
    assert!(fast.is_synced());
}

#[tokio::test]
async fn mirrored_order_survives_repeat_sweeps() {
    let ctx = TestContext::new().await;
    let stores = ctx.state.stores().clone();
    stores
        .fast_path
        .insert(paid_fast_path("KCT-2024-000200"))
        .await
        .unwrap();

    let service = SyncService::new(stores, Duration::from_secs(3600));
    service.sweep_once().await;
    let second = service.sweep_once().await;
    assert_eq!(second.examined, 0);
    assert_eq!(ctx.memory.order_count(), 1);
}

#[tokio::test]
async fn running_service_mirrors_inserts_in_realtime() {
    let ctx = TestContext::new().await;
    let stores = ctx.state.stores().clone();

    let service = SyncService::new(stores.clone(), Duration::from_secs(3600));
    service.start().await.unwrap();

    stores
        .fast_path
        .insert(paid_fast_path("KCT-2024-000300"))
        .await
        .unwrap();

    for _ in 0..50 {
        tokio::task::yield_now().await;
        if ctx.memory.order_count() == 1 {
            break;
        }
    }
    assert_eq!(ctx.memory.order_count(), 1);
    service.stop().await;
}

#[tokio::test]
async fn status_update_propagates_to_both_stores() {
    let ctx = TestContext::new().await;
    let stores = ctx.state.stores().clone();
    stores
        .fast_path
        .insert(paid_fast_path("KCT-2024-000400"))
        .await
        .unwrap();

    let service = SyncService::new(stores.clone(), Duration::from_secs(3600));
    service.sweep_once().await;
    service
        .update_status("KCT-2024-000400", OrderStatus::Shipped)
        .await
        .unwrap();

    let canonical = stores
        .orders
        .get_by_order_number("KCT-2024-000400")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(canonical.status, OrderStatus::Shipped);

    let fast = stores
        .fast_path
        .get_by_order_number("KCT-2024-000400")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast.status, "shipped");
}

#[tokio::test]
async fn checkout_and_fast_path_orders_coexist() {
    let ctx = TestContext::new().await;
    let stores = ctx.state.stores().clone();

    ctx.deliver_expect(
        &kct_integration_tests::checkout_event("evt_1", "cs_mix", "a@b.com"),
        axum::http::StatusCode::OK,
    )
    .await;

    stores
        .fast_path
        .insert(paid_fast_path("KCT-2024-000500"))
        .await
        .unwrap();
    let service = SyncService::new(stores, Duration::from_secs(3600));
    service.sweep_once().await;

    assert_eq!(ctx.memory.order_count(), 2);
}
