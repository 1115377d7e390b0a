//! End-to-end checkout materialization through the webhook endpoint.
//!
//! Covers the happy path: a signed `checkout.session.completed` delivery
//! becomes a confirmed canonical order with customer, lines, inventory
//! decrement, and a confirmation notification.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use kct_core::{Email, NotificationKind, OrderSource, OrderStatus, PaymentStatus};
use kct_integration_tests::{TestContext, checkout_event};

#[tokio::test]
async fn materializes_order_with_customer_and_lines() {
    let ctx = TestContext::new().await;

    ctx.deliver_expect(&checkout_event("evt_1", "cs_123", "a@b.com"), StatusCode::OK)
        .await;

    let order = ctx
        .state
        .stores()
        .orders
        .get_by_checkout_session("cs_123")
        .await
        .unwrap()
        .expect("order materialized");

    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.source, OrderSource::Checkout);
    assert_eq!(order.subtotal.minor(), 2500);
    assert_eq!(order.total.minor(), 2500);
    assert_eq!(order.currency, "USD");
    assert!(order.order_number.starts_with("KCT-"));
    assert!(order.confirmed_at.is_some());

    // Customer resolved from the buyer email
    let customer_id = order.customer_id.expect("customer attached");
    let email = Email::parse("a@b.com").unwrap();
    let customer = ctx
        .state
        .stores()
        .customers
        .get_by_email(&email)
        .await
        .unwrap()
        .expect("customer upserted");
    assert_eq!(customer.id, customer_id);

    // Lines carry derived SKUs and per-line totals
    let lines = ctx.state.stores().orders.lines(order.id).await.unwrap();
    assert_eq!(lines.len(), 2);
    let suit = lines.iter().find(|l| l.product_name == "Navy Suit").unwrap();
    assert_eq!(suit.product_sku, "KCT-SUITS-NAVY-40R");
    assert_eq!(suit.quantity, 2);
    assert_eq!(suit.unit_price.minor(), 1000);
    assert_eq!(suit.total_price.minor(), 2000);
    let tie = lines.iter().find(|l| l.product_name == "Silk Tie").unwrap();
    assert_eq!(tie.product_sku, "KCT-TIES-BURGUNDY");
    assert_eq!(tie.total_price.minor(), 500);
}

#[tokio::test]
async fn decrements_inventory_for_each_line() {
    let ctx = TestContext::new().await;
    ctx.memory.seed_variant("KCT-SUITS-NAVY-40R", 5);
    ctx.memory.seed_variant("KCT-TIES-BURGUNDY", 3);

    ctx.deliver_expect(&checkout_event("evt_1", "cs_inv", "a@b.com"), StatusCode::OK)
        .await;

    let stores = ctx.state.stores();
    assert_eq!(
        stores.inventory.available("KCT-SUITS-NAVY-40R").await.unwrap(),
        Some(3)
    );
    assert_eq!(
        stores.inventory.available("KCT-TIES-BURGUNDY").await.unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn sale_releases_checkout_reservations() {
    let ctx = TestContext::new().await;
    // Checkout holds 3 suit reservations and 1 tie reservation; the sale
    // (2 suits, 1 tie) releases what it sold.
    ctx.memory.seed_variant_stock("KCT-SUITS-NAVY-40R", 5, 3);
    ctx.memory.seed_variant_stock("KCT-TIES-BURGUNDY", 3, 1);

    ctx.deliver_expect(&checkout_event("evt_1", "cs_res", "a@b.com"), StatusCode::OK)
        .await;

    let stores = ctx.state.stores();
    assert_eq!(
        stores.inventory.available("KCT-SUITS-NAVY-40R").await.unwrap(),
        Some(3)
    );
    assert_eq!(
        stores.inventory.reserved("KCT-SUITS-NAVY-40R").await.unwrap(),
        Some(1)
    );
    assert_eq!(
        stores.inventory.available("KCT-TIES-BURGUNDY").await.unwrap(),
        Some(2)
    );
    assert_eq!(
        stores.inventory.reserved("KCT-TIES-BURGUNDY").await.unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn logs_confirmation_notification() {
    let ctx = TestContext::new().await;

    ctx.deliver_expect(&checkout_event("evt_1", "cs_note", "a@b.com"), StatusCode::OK)
        .await;

    let log = ctx.state.notifier().log_snapshot().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, NotificationKind::OrderUpdate);
    assert!(!log[0].read);
    let order_number = log[0].data["order_number"].as_str().unwrap();
    assert!(order_number.starts_with("KCT-"));
}

#[tokio::test]
async fn payment_succeeded_moves_order_to_processing() {
    let ctx = TestContext::new().await;
    ctx.deliver_expect(&checkout_event("evt_1", "cs_pay", "a@b.com"), StatusCode::OK)
        .await;

    let body = serde_json::json!({
        "id": "evt_2",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_cs_pay", "amount": 2500 } }
    })
    .to_string();
    ctx.deliver_expect(&body, StatusCode::OK).await;

    let order = ctx
        .state
        .stores()
        .orders
        .get_by_checkout_session("cs_pay")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
}

#[tokio::test]
async fn customer_created_upserts_by_email() {
    let ctx = TestContext::new().await;

    let body = serde_json::json!({
        "id": "evt_c",
        "type": "customer.created",
        "data": { "object": {
            "id": "cus_42",
            "email": "grace@example.com",
            "name": "Grace Hopper",
            "phone": "+13135550100"
        }}
    })
    .to_string();
    ctx.deliver_expect(&body, StatusCode::OK).await;

    let email = Email::parse("grace@example.com").unwrap();
    let customer = ctx
        .state
        .stores()
        .customers
        .get_by_email(&email)
        .await
        .unwrap()
        .expect("customer upserted");
    assert_eq!(customer.first_name.as_deref(), Some("Grace"));
    assert_eq!(customer.last_name.as_deref(), Some("Hopper"));
    assert_eq!(customer.processor_customer_id.as_deref(), Some("cus_42"));
}
