mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{seed_inventory, seed_site, setup};
use fulfillment_core::entities::discrepancy::{DiscrepancyStatus, Entity as Discrepancy};
use fulfillment_core::entities::inventory_item::{self, Entity as InventoryItem};
use fulfillment_core::entities::inventory_transaction::{self, Entity as InventoryTransaction};
use fulfillment_core::errors::ServiceError;
use fulfillment_core::services::discrepancies::DetectRequest;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

fn detect_request(sku: &str, expected: i32, actual: i32, site_id: Uuid) -> DetectRequest {
    DetectRequest {
        sku: sku.to_string(),
        expected_quantity: expected,
        actual_quantity: actual,
        bin_location: "A-01-01".to_string(),
        site_id,
        detected_by: Uuid::new_v4(),
        reason: "Count variance".to_string(),
        order_id: None,
        transfer_id: None,
    }
}

#[tokio::test]
async fn detection_is_threshold_gated() {
    let ctx = setup().await;
    let site_id = Uuid::new_v4();

    // 4% variance: reported but not recorded.
    let below = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 100, 96, site_id))
        .await
        .unwrap();
    assert_eq!(below.variance, 4);
    assert_eq!(below.variance_percent, 0.04);
    assert!(below.discrepancy.is_none());

    // 6% variance: an OPEN discrepancy is created.
    let above = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 100, 94, site_id))
        .await
        .unwrap();
    assert_eq!(above.variance, 6);
    assert_eq!(above.variance_percent, 0.06);
    let disc = above.discrepancy.expect("threshold crossed");
    assert_eq!(disc.status, DiscrepancyStatus::Open.as_str());
    assert_eq!(disc.variance, 6);
}

#[tokio::test]
async fn zero_expectation_has_defined_variance() {
    let ctx = setup().await;
    let site_id = Uuid::new_v4();

    let clean = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 0, 0, site_id))
        .await
        .unwrap();
    assert_eq!(clean.variance_percent, 0.0);
    assert!(clean.discrepancy.is_none());

    // Anything found where nothing was expected is a total mismatch.
    let surprise = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 0, 5, site_id))
        .await
        .unwrap();
    assert_eq!(surprise.variance_percent, 1.0);
    assert!(surprise.discrepancy.is_some());
}

#[tokio::test]
async fn resolution_requires_investigation_first() {
    let ctx = setup().await;
    let site_id = Uuid::new_v4();

    let disc = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 100, 90, site_id))
        .await
        .unwrap()
        .discrepancy
        .unwrap();

    assert_matches!(
        ctx.discrepancies
            .resolve(disc.id, Uuid::new_v4(), "too eager", false)
            .await,
        Err(ServiceError::DiscrepancyState { .. })
    );

    let investigating = ctx
        .discrepancies
        .investigate(disc.id, Uuid::new_v4(), "Checked the bin", Some("mispick"))
        .await
        .unwrap();
    assert_eq!(investigating.status, DiscrepancyStatus::Investigating.as_str());

    // A second investigation is not allowed either.
    assert_matches!(
        ctx.discrepancies
            .investigate(disc.id, Uuid::new_v4(), "again", None)
            .await,
        Err(ServiceError::DiscrepancyState { .. })
    );

    let resolved = ctx
        .discrepancies
        .resolve(disc.id, Uuid::new_v4(), "Written off", false)
        .await
        .unwrap();
    assert_eq!(resolved.status, DiscrepancyStatus::Resolved.as_str());
}

#[tokio::test]
async fn resolving_with_adjustment_reconciles_inventory() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 100, 100, 0).await;

    let disc = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 100, 90, site.id))
        .await
        .unwrap()
        .discrepancy
        .unwrap();
    ctx.discrepancies
        .investigate(disc.id, Uuid::new_v4(), "Shelf recount", Some("shrinkage"))
        .await
        .unwrap();
    ctx.discrepancies
        .resolve(disc.id, Uuid::new_v4(), "Count is correct", true)
        .await
        .unwrap();

    let row = InventoryItem::find()
        .filter(inventory_item::Column::Sku.eq("SKU-1"))
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.quantity_total, 90);
    assert_eq!(row.quantity_available, 90);
    assert!(row.last_counted_at.is_some());

    let audits = InventoryTransaction::find()
        .filter(inventory_transaction::Column::OperationType.eq("ADJUSTMENT_OUT"))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].quantity, 10);
}

#[tokio::test]
async fn close_skips_adjustment_and_blocks_terminal_states() {
    let ctx = setup().await;
    let site_id = Uuid::new_v4();

    let disc = ctx
        .discrepancies
        .detect(detect_request("SKU-1", 100, 90, site_id))
        .await
        .unwrap()
        .discrepancy
        .unwrap();

    let closed = ctx
        .discrepancies
        .close(disc.id, Uuid::new_v4(), "Known recount error")
        .await
        .unwrap();
    assert_eq!(closed.status, DiscrepancyStatus::Closed.as_str());

    assert_matches!(
        ctx.discrepancies
            .close(disc.id, Uuid::new_v4(), "again")
            .await,
        Err(ServiceError::DiscrepancyState { .. })
    );
}

#[tokio::test]
async fn cycle_count_targets_the_most_troubled_pairs() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-HOT", "A-01-01", 40, 40, 0).await;

    // An old discrepancy outside the trailing window must not count.
    let mut old = detect_request("SKU-COLD", 100, 50, site.id);
    old.bin_location = "D-09-01".to_string();
    ctx.discrepancies.detect(old).await.unwrap();
    ctx.clock.advance(Duration::days(40));

    // SKU-HOT fails three recent counts, SKU-WARM one.
    for actual in [90, 85, 80] {
        let mut req = detect_request("SKU-HOT", 100, actual, site.id);
        req.bin_location = "A-01-01".to_string();
        ctx.discrepancies.detect(req).await.unwrap();
    }
    let mut warm = detect_request("SKU-WARM", 100, 90, site.id);
    warm.bin_location = "B-02-01".to_string();
    ctx.discrepancies.detect(warm).await.unwrap();

    let (take, items) = ctx
        .discrepancies
        .generate_cycle_count(site.id, Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(take.status, "PENDING");
    assert_eq!(items.len(), 2, "stale discrepancies are excluded");
    assert_eq!(items[0].sku, "SKU-HOT", "most discrepancies first");
    assert_eq!(items[0].expected_quantity, 40, "expectation from inventory");
    assert_eq!(items[1].sku, "SKU-WARM");
    assert_eq!(items[1].expected_quantity, 0, "no inventory row seeds zero");
}

#[tokio::test]
async fn sync_from_count_creates_then_reconciles() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;

    // First count materializes the row.
    let first = ctx
        .discrepancies
        .sync_from_count("SKU-NEW", "C-03-01", site.id, 12, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(first.item.quantity_total, 12);
    assert_eq!(first.item.quantity_available, 12);
    assert!(first.discrepancy.is_none());

    // Reserve some of it, then count short.
    let row = InventoryItem::find()
        .filter(inventory_item::Column::Sku.eq("SKU-NEW"))
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.quantity_reserved, 0);

    let second = ctx
        .discrepancies
        .sync_from_count("SKU-NEW", "C-03-01", site.id, 10, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(second.adjustment, -2);
    assert_eq!(second.item.quantity_available, 10);
    assert_eq!(second.item.quantity_total, 10);
    // 2 of 12 is past the 5% threshold.
    assert!(second.discrepancy.is_some());

    let audits = InventoryTransaction::find()
        .filter(inventory_transaction::Column::OperationType.eq("ADJUSTMENT_OUT"))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].quantity, 2);
}

#[tokio::test]
async fn sync_records_discrepancy_and_adjustment_together() {
    let ctx = setup().await;
    let site = seed_site(&ctx.db, Uuid::new_v4(), "Main").await;
    seed_inventory(&ctx.db, site.id, "SKU-1", "A-01-01", 100, 100, 0).await;

    let outcome = ctx
        .discrepancies
        .sync_from_count("SKU-1", "A-01-01", site.id, 90, Uuid::new_v4())
        .await
        .unwrap();

    // The recorded discrepancy mirrors the adjustment from the same count.
    let disc = outcome.discrepancy.expect("10% variance crosses the threshold");
    assert_eq!(disc.expected_quantity, 100);
    assert_eq!(disc.actual_quantity, 90);
    assert_eq!(disc.variance, 10);
    assert_eq!(disc.status, DiscrepancyStatus::Open.as_str());
    assert_eq!(disc.reason, "Physical count variance");

    let audits = InventoryTransaction::find()
        .filter(inventory_transaction::Column::OperationType.eq("ADJUSTMENT_OUT"))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].quantity, disc.variance);

    // A sub-threshold recount still adjusts but opens nothing.
    let outcome = ctx
        .discrepancies
        .sync_from_count("SKU-1", "A-01-01", site.id, 87, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(outcome.adjustment, -3);
    assert!(outcome.discrepancy.is_none());

    let discrepancies = Discrepancy::find().all(ctx.db.as_ref()).await.unwrap();
    assert_eq!(discrepancies.len(), 1, "only the threshold-crossing count is recorded");
}
