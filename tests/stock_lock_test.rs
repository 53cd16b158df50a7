mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{seed_inventory, seed_site, setup};
use fulfillment_core::entities::inventory_item::{self, Entity as InventoryItem, InventoryStatus};
use fulfillment_core::entities::inventory_transaction::{self, Entity as InventoryTransaction};
use fulfillment_core::entities::stock_lock::{Entity as StockLock, LockStatus, OperationType};
use fulfillment_core::errors::ServiceError;
use fulfillment_core::services::stock_locks::ReserveRequest;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

fn pick_request(sku: &str, bin: &str, quantity: i32) -> ReserveRequest {
    ReserveRequest {
        sku: sku.to_string(),
        quantity,
        bin_location: bin.to_string(),
        operation_type: OperationType::Pick,
        operator_id: Uuid::new_v4(),
        order_id: None,
        transfer_id: None,
    }
}

#[tokio::test]
async fn reserve_holds_availability_without_deducting() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    ctx.stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 4))
        .await
        .unwrap();

    // The hold is visible through the lock-aware view only.
    let view = ctx
        .stock_locks
        .available_with_locks("SKU-1", "A-01-01")
        .await
        .unwrap();
    assert_eq!(view.available, 6);
    assert_eq!(view.locked, 4);
    assert_eq!(view.total, 10);

    let row = InventoryItem::find()
        .filter(inventory_item::Column::Sku.eq("SKU-1"))
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.quantity_available, 10, "reserve must not deduct");
    assert_eq!(row.quantity_reserved, 0);
}

#[tokio::test]
async fn commit_deducts_and_writes_exactly_one_audit_row() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let operator = Uuid::new_v4();
    let lock_id = ctx
        .stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 4))
        .await
        .unwrap();
    ctx.stock_locks.commit(lock_id, operator).await.unwrap();

    let row = InventoryItem::find()
        .filter(inventory_item::Column::Sku.eq("SKU-1"))
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.quantity_available, 6);
    assert_eq!(row.quantity_reserved, 4);
    assert_eq!(
        row.quantity_total,
        row.quantity_available + row.quantity_reserved
    );

    let audits = InventoryTransaction::find()
        .filter(inventory_transaction::Column::Sku.eq("SKU-1"))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].quantity, 4);
    assert_eq!(audits[0].operation_type, OperationType::Pick.as_str());

    let lock = ctx.stock_locks.get_lock(lock_id).await.unwrap();
    assert_eq!(lock.lock.status, LockStatus::Committed.as_str());
}

#[tokio::test]
async fn terminal_locks_reject_further_transitions() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let operator = Uuid::new_v4();
    let committed = ctx
        .stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 2))
        .await
        .unwrap();
    ctx.stock_locks.commit(committed, operator).await.unwrap();

    assert_matches!(
        ctx.stock_locks.commit(committed, operator).await,
        Err(ServiceError::InvalidLockState { .. })
    );
    assert_matches!(
        ctx.stock_locks.release(committed, operator, "late").await,
        Err(ServiceError::InvalidLockState { .. })
    );

    let released = ctx
        .stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 2))
        .await
        .unwrap();
    ctx.stock_locks
        .release(released, operator, "changed mind")
        .await
        .unwrap();
    assert_matches!(
        ctx.stock_locks.commit(released, operator).await,
        Err(ServiceError::InvalidLockState { .. })
    );
}

#[tokio::test]
async fn release_leaves_quantities_and_audit_untouched() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let lock_id = ctx
        .stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 5))
        .await
        .unwrap();
    ctx.stock_locks
        .release(lock_id, Uuid::new_v4(), "not needed")
        .await
        .unwrap();

    let view = ctx
        .stock_locks
        .available_with_locks("SKU-1", "A-01-01")
        .await
        .unwrap();
    assert_eq!(view.available, 10);
    assert_eq!(view.locked, 0);

    let audits = InventoryTransaction::find().all(ctx.db.as_ref()).await.unwrap();
    assert!(audits.is_empty(), "release must not write audit rows");
}

#[tokio::test]
async fn expired_lock_fails_commit_and_frees_the_hold() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let lock_id = ctx
        .stock_locks
        .reserve(pick_request("SKU-1", "A-01-01", 8))
        .await
        .unwrap();

    ctx.clock.advance(Duration::minutes(31));

    assert_matches!(
        ctx.stock_locks.commit(lock_id, Uuid::new_v4()).await,
        Err(ServiceError::LockExpired(id)) if id == lock_id
    );
    let lock = ctx.stock_locks.get_lock(lock_id).await.unwrap();
    assert_eq!(lock.lock.status, LockStatus::Expired.as_str());

    // The expired hold no longer counts against availability.
    let view = ctx
        .stock_locks
        .available_with_locks("SKU-1", "A-01-01")
        .await
        .unwrap();
    assert_eq!(view.available, 10);
}

#[tokio::test]
async fn expire_sweep_is_idempotent() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    for quantity in [1, 2, 3] {
        ctx.stock_locks
            .reserve(pick_request("SKU-1", "A-01-01", quantity))
            .await
            .unwrap();
    }

    ctx.clock.advance(Duration::minutes(31));

    assert_eq!(ctx.stock_locks.expire_sweep().await.unwrap(), 3);
    assert_eq!(ctx.stock_locks.expire_sweep().await.unwrap(), 0);

    let locks = StockLock::find().all(ctx.db.as_ref()).await.unwrap();
    assert!(locks
        .iter()
        .all(|l| l.status == LockStatus::Expired.as_str()));
}

#[tokio::test]
async fn missing_or_blocked_inventory_rejects_reservation() {
    let ctx = setup().await;

    assert_matches!(
        ctx.stock_locks
            .reserve(pick_request("SKU-GHOST", "A-01-01", 1))
            .await,
        Err(ServiceError::InsufficientStock {
            available: 0,
            requested: 1,
            ..
        })
    );

    assert_matches!(
        ctx.stock_locks
            .reserve(pick_request("SKU-1", "A-01-01", 0))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    let blocked = seed_inventory(&ctx.db, site.id, "SKU-B", "B-01-01", 5, 5, 0).await;
    let mut active: inventory_item::ActiveModel = blocked.into();
    active.status = Set(InventoryStatus::Blocked.as_str().to_string());
    active.update(ctx.db.as_ref()).await.unwrap();

    assert_matches!(
        ctx.stock_locks
            .reserve(pick_request("SKU-B", "B-01-01", 1))
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
}

#[tokio::test]
async fn concurrent_reservations_never_oversubscribe() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 10, 10, 0).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = ctx.stock_locks.clone();
        handles.push(tokio::spawn(async move {
            service.reserve(pick_request("SKU-1", "A-01-01", 1)).await
        }));
    }

    let mut granted = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(ServiceError::InsufficientStock { .. }) => denied += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 10, "exactly the available units may be held");
    assert_eq!(denied, 10);

    let view = ctx
        .stock_locks
        .available_with_locks("SKU-1", "A-01-01")
        .await
        .unwrap();
    assert_eq!(view.available, 0);
    assert_eq!(view.locked, 10);
}
