#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use fulfillment_core::clock::ManualClock;
use fulfillment_core::db::ensure_schema;
use fulfillment_core::entities::inventory_item::{self, InventoryStatus};
use fulfillment_core::entities::order::{self, OrderStatus};
use fulfillment_core::entities::order_item;
use fulfillment_core::entities::site;
use fulfillment_core::events::{self, EventSender};
use fulfillment_core::services::batching::BatchPickingService;
use fulfillment_core::services::discrepancies::DiscrepancyService;
use fulfillment_core::services::stock_locks::StockLockService;
use fulfillment_core::services::transfers::TransferService;
use fulfillment_core::services::waves::WaveService;
use fulfillment_core::services::KeyedMutexes;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::sync::Arc;
use uuid::Uuid;

pub const VARIANCE_THRESHOLD: f64 = 0.05;
pub const CYCLE_COUNT_ITEMS: usize = 20;

/// Shared wiring for integration tests: one in-memory database, one event
/// channel, one manually advanced clock, and every service built on them.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub clock: Arc<ManualClock>,
    pub events: EventSender,
    pub key_mutexes: KeyedMutexes,
    pub stock_locks: StockLockService,
    pub batching: BatchPickingService,
    pub waves: WaveService,
    pub transfers: TransferService,
    pub discrepancies: DiscrepancyService,
}

/// Fixed test epoch; tests advance the clock from here.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap()
}

pub async fn setup() -> TestContext {
    // A single connection keeps every query on the same in-memory database.
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).sqlx_logging(false);
    let db = Arc::new(
        Database::connect(opts)
            .await
            .expect("in-memory database should connect"),
    );
    ensure_schema(&db).await.expect("schema bootstrap");

    let (events, rx) = events::channel(256);
    tokio::spawn(events::process_events(rx));

    let clock = Arc::new(ManualClock::new(test_epoch()));
    let key_mutexes = KeyedMutexes::new();

    let stock_locks = StockLockService::new(
        db.clone(),
        events.clone(),
        clock.clone(),
        Duration::minutes(30),
        key_mutexes.clone(),
    );
    let batching = BatchPickingService::new(
        db.clone(),
        events.clone(),
        clock.clone(),
        stock_locks.clone(),
    );
    let waves = WaveService::new(
        db.clone(),
        events.clone(),
        clock.clone(),
        stock_locks.clone(),
        batching.clone(),
    );
    let transfers = TransferService::new(
        db.clone(),
        events.clone(),
        clock.clone(),
        stock_locks.clone(),
        key_mutexes.clone(),
    );
    let discrepancies = DiscrepancyService::new(
        db.clone(),
        events.clone(),
        clock.clone(),
        key_mutexes.clone(),
        VARIANCE_THRESHOLD,
        CYCLE_COUNT_ITEMS,
    );

    TestContext {
        db,
        clock,
        events,
        key_mutexes,
        stock_locks,
        batching,
        waves,
        transfers,
        discrepancies,
    }
}

pub async fn seed_site(db: &DatabaseConnection, company_id: Uuid, name: &str) -> site::Model {
    site::ActiveModel {
        id: Set(Uuid::new_v4()),
        company_id: Set(company_id),
        name: Set(name.to_string()),
        is_primary: Set(false),
        created_at: Set(test_epoch()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed site")
}

pub async fn seed_inventory(
    db: &DatabaseConnection,
    site_id: Uuid,
    sku: &str,
    bin_location: &str,
    total: i32,
    available: i32,
    reserved: i32,
) -> inventory_item::Model {
    inventory_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        sku: Set(sku.to_string()),
        bin_location: Set(bin_location.to_string()),
        site_id: Set(site_id),
        quantity_total: Set(total),
        quantity_available: Set(available),
        quantity_reserved: Set(reserved),
        status: Set(InventoryStatus::Normal.as_str().to_string()),
        last_counted_at: Set(None),
        created_at: Set(test_epoch()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed inventory")
}

/// Seeds a CONFIRMED order created `minute_offset` minutes after the test
/// epoch, so creation order is controllable.
pub async fn seed_order(
    db: &DatabaseConnection,
    site_id: Uuid,
    priority: &str,
    courier: Option<&str>,
    minute_offset: i64,
) -> order::Model {
    order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(format!("ORD-{:04}", minute_offset)),
        site_id: Set(site_id),
        status: Set(OrderStatus::Confirmed.as_str().to_string()),
        priority: Set(priority.to_string()),
        courier: Set(courier.map(str::to_string)),
        picked_by: Set(None),
        created_at: Set(test_epoch() + Duration::minutes(minute_offset)),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed order")
}

pub async fn seed_order_item(
    db: &DatabaseConnection,
    order_id: Uuid,
    sku: &str,
    quantity: i32,
    bin_location: &str,
) -> order_item::Model {
    order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        sku: Set(sku.to_string()),
        quantity: Set(quantity),
        bin_location: Set(bin_location.to_string()),
    }
    .insert(db)
    .await
    .expect("seed order item")
}
