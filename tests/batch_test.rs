mod common;

use assert_matches::assert_matches;
use common::{seed_inventory, seed_order, seed_order_item, seed_site, setup};
use fulfillment_core::entities::batch::BatchStatus;
use fulfillment_core::entities::order::{Entity as Order, OrderStatus};
use fulfillment_core::entities::stock_lock::{self, Entity as StockLock, LockStatus, OperationType};
use fulfillment_core::errors::ServiceError;
use fulfillment_core::services::batching::CreateBatchesRequest;
use fulfillment_core::services::stock_locks::ReserveRequest;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

#[tokio::test]
async fn order_cap_splits_batches_first_fit() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    // 10 orders of 6 items each against caps of 8 orders / 50 items:
    // the order cap seals the first batch at 8.
    for minute in 0..10 {
        let order = seed_order(&ctx.db, site.id, "NORMAL", None, minute).await;
        seed_order_item(&ctx.db, order.id, "SKU-1", 6, "A-01-01").await;
    }

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(result.total_orders, 10);
    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.batches[0].total_orders, 8);
    assert_eq!(result.batches[0].total_items, 48);
    assert_eq!(result.batches[1].total_orders, 2);
    assert_eq!(result.batches[1].total_items, 12);
}

#[tokio::test]
async fn item_cap_seals_before_adding_the_overflowing_order() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    // 30 + 15 fit; adding 10 more would cross 50, so the third order
    // opens a new batch even though the order cap is far away.
    for (minute, quantity) in [(0, 30), (1, 15), (2, 10)] {
        let order = seed_order(&ctx.db, site.id, "NORMAL", None, minute).await;
        seed_order_item(&ctx.db, order.id, "SKU-1", quantity, "A-01-01").await;
    }

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.batches[0].total_items, 45);
    assert_eq!(result.batches[1].total_items, 10);
}

#[tokio::test]
async fn couriers_are_batched_separately() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    for (minute, courier) in [(0, Some("DHL")), (1, Some("UPS")), (2, None), (3, Some("DHL"))] {
        let order = seed_order(&ctx.db, site.id, "NORMAL", courier, minute).await;
        seed_order_item(&ctx.db, order.id, "SKU-1", 1, "A-01-01").await;
    }

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(result.batches.len(), 3);
    let couriers: Vec<Option<&str>> = result
        .batches
        .iter()
        .map(|b| b.courier.as_deref())
        .collect();
    assert!(couriers.contains(&Some("DHL")));
    assert!(couriers.contains(&Some("UPS")));
    assert!(couriers.contains(&None));

    let dhl = result
        .batches
        .iter()
        .find(|b| b.courier.as_deref() == Some("DHL"))
        .unwrap();
    assert_eq!(dhl.total_orders, 2);
}

#[tokio::test]
async fn urgent_orders_fill_earlier_batches_and_set_batch_priority() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    // Eight NORMAL orders arrive first, then one URGENT; with an order cap
    // of 8 the URGENT order must displace a NORMAL one from the first batch.
    for minute in 0..8 {
        let order = seed_order(&ctx.db, site.id, "NORMAL", None, minute).await;
        seed_order_item(&ctx.db, order.id, "SKU-1", 1, "A-01-01").await;
    }
    let urgent = seed_order(&ctx.db, site.id, "URGENT", None, 8).await;
    seed_order_item(&ctx.db, urgent.id, "SKU-1", 1, "A-01-01").await;

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.batches[0].priority, "URGENT");
    let first_members = ctx
        .batching
        .member_order_ids(result.batches[0].id)
        .await
        .unwrap();
    assert!(first_members.contains(&urgent.id));
}

#[tokio::test]
async fn zones_collect_distinct_bin_prefixes() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    let order = seed_order(&ctx.db, site.id, "NORMAL", None, 0).await;
    seed_order_item(&ctx.db, order.id, "SKU-1", 1, "A-01-01").await;
    seed_order_item(&ctx.db, order.id, "SKU-2", 1, "C-04-02").await;
    seed_order_item(&ctx.db, order.id, "SKU-3", 1, "A-07-01").await;

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    let zones: Vec<String> =
        serde_json::from_value(result.batches[0].zones.clone()).unwrap();
    assert_eq!(zones, vec!["A".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn batched_orders_are_not_rebatched() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    let order = seed_order(&ctx.db, site.id, "NORMAL", None, 0).await;
    seed_order_item(&ctx.db, order.id, "SKU-1", 1, "A-01-01").await;

    ctx.batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();
    let second = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();

    assert!(second.batches.is_empty());
    assert_eq!(second.total_orders, 0);
}

#[tokio::test]
async fn start_and_complete_move_member_orders() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    let order = seed_order(&ctx.db, site.id, "NORMAL", None, 0).await;
    seed_order_item(&ctx.db, order.id, "SKU-1", 1, "A-01-01").await;

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();
    let batch_id = result.batches[0].id;
    let picker = Uuid::new_v4();

    // Only PENDING batches can start.
    assert_matches!(
        ctx.batching.complete_batch(batch_id, picker).await,
        Err(ServiceError::InvalidStatus(_))
    );

    let started = ctx.batching.start_batch(batch_id, picker).await.unwrap();
    assert_eq!(started.status, BatchStatus::InProgress.as_str());
    let ord = Order::find_by_id(order.id)
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, OrderStatus::Picking.as_str());
    assert_eq!(ord.picked_by, Some(picker));

    let completed = ctx.batching.complete_batch(batch_id, picker).await.unwrap();
    assert_eq!(completed.status, BatchStatus::Completed.as_str());
    let ord = Order::find_by_id(order.id)
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, OrderStatus::Packed.as_str());
}

#[tokio::test]
async fn cancel_releases_member_locks_and_reverts_orders() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let order = seed_order(&ctx.db, site.id, "NORMAL", None, 0).await;
    seed_order_item(&ctx.db, order.id, "SKU-1", 3, "A-01-01").await;

    let result = ctx
        .batching
        .create_batches(CreateBatchesRequest::with_defaults(site.id, Uuid::new_v4()))
        .await
        .unwrap();
    let batch_id = result.batches[0].id;
    ctx.batching
        .start_batch(batch_id, Uuid::new_v4())
        .await
        .unwrap();

    // Simulate a pick in flight: the order holds a lock.
    ctx.stock_locks
        .reserve(ReserveRequest {
            sku: "SKU-1".to_string(),
            quantity: 3,
            bin_location: "A-01-01".to_string(),
            operation_type: OperationType::OrderPick,
            operator_id: Uuid::new_v4(),
            order_id: Some(order.id),
            transfer_id: None,
        })
        .await
        .unwrap();

    let (cancelled, outcomes) = ctx
        .batching
        .cancel_batch(batch_id, Uuid::new_v4(), "picker unavailable")
        .await
        .unwrap();

    assert_eq!(cancelled.status, BatchStatus::Cancelled.as_str());
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].released);

    let remaining = StockLock::find()
        .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let ord = Order::find_by_id(order.id)
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, OrderStatus::Confirmed.as_str());
    assert!(ord.picked_by.is_none());

    // Terminal: a cancelled batch stays cancelled.
    assert_matches!(
        ctx.batching
            .cancel_batch(batch_id, Uuid::new_v4(), "again")
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
}
