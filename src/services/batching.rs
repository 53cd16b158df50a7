//! Batch assembly: groups fulfillable orders into bounded pick batches.
//!
//! Batching never touches inventory quantities — stock is reserved per pick
//! in the order-picking flow — but batch cancellation sweeps any stock locks
//! still held by member orders.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::batch::{self, BatchStatus, Entity as Batch};
use crate::entities::batch_order::{self, Entity as BatchOrder};
use crate::entities::order::{self, Entity as Order, OrderPriority, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::{LockReleaseOutcome, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::stock_locks::StockLockService;

pub const MAX_ORDERS_PER_BATCH: u32 = 8;
pub const MAX_ITEMS_PER_BATCH: u32 = 50;
const NO_COURIER: &str = "NO_COURIER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchesRequest {
    pub site_id: Uuid,
    pub max_orders: u32,
    pub max_items: u32,
    pub group_by_courier: bool,
    pub priority_first: bool,
    pub created_by: Uuid,
}

impl CreateBatchesRequest {
    /// Default caps (8 orders, 50 summed items), courier grouping and
    /// priority sorting enabled.
    pub fn with_defaults(site_id: Uuid, created_by: Uuid) -> Self {
        Self {
            site_id,
            max_orders: MAX_ORDERS_PER_BATCH,
            max_items: MAX_ITEMS_PER_BATCH,
            group_by_courier: true,
            priority_first: true,
            created_by,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreationResult {
    pub batches: Vec<batch::Model>,
    pub total_orders: usize,
}

#[derive(Clone)]
pub struct BatchPickingService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    stock_locks: StockLockService,
}

impl BatchPickingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        stock_locks: StockLockService,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            stock_locks,
        }
    }

    /// Greedy first-fit binning of fulfillable orders into pick batches.
    ///
    /// Orders already committed to a pending/active batch are skipped. With
    /// `priority_first`, orders sort URGENT > OVERNIGHT > NORMAL > LOW,
    /// FIFO within a rank. With `group_by_courier`, each courier partition
    /// is binned independently (orders without a courier group together).
    #[instrument(skip(self, request), fields(site_id = %request.site_id))]
    pub async fn create_batches(
        &self,
        request: CreateBatchesRequest,
    ) -> Result<BatchCreationResult, ServiceError> {
        let db = self.db.as_ref();

        let mut orders = Order::find()
            .filter(order::Column::SiteId.eq(request.site_id))
            .filter(order::Column::Status.eq(OrderStatus::Confirmed.as_str()))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;

        let batched_order_ids = self.order_ids_in_active_batches(request.site_id).await?;
        orders.retain(|o| !batched_order_ids.contains(&o.id));

        self.create_batches_for_orders(request, orders).await
    }

    /// Bins an explicit order list, bypassing the fulfillable-order query.
    /// Wave batching uses this to batch exactly its member orders, which are
    /// already past CONFIRMED.
    #[instrument(skip(self, request, orders), fields(site_id = %request.site_id, orders = orders.len()))]
    pub async fn create_batches_for_orders(
        &self,
        request: CreateBatchesRequest,
        mut orders: Vec<order::Model>,
    ) -> Result<BatchCreationResult, ServiceError> {
        if request.max_orders == 0 || request.max_items == 0 {
            return Err(ServiceError::ValidationError(
                "Batch caps must be positive".to_string(),
            ));
        }

        if orders.is_empty() {
            return Ok(BatchCreationResult {
                batches: Vec::new(),
                total_orders: 0,
            });
        }

        orders.sort_by_key(|o| o.created_at);
        let items_by_order = self.load_items(&orders).await?;

        if request.priority_first {
            // Stable sort: created_at ordering from the query survives
            // within each priority rank.
            orders.sort_by_key(|o| OrderPriority::rank(&o.priority));
        }

        let groups: Vec<(Option<String>, Vec<order::Model>)> = if request.group_by_courier {
            partition_by_courier(orders)
        } else {
            vec![(None, orders)]
        };

        let mut batches = Vec::new();
        let mut total_orders = 0usize;

        for (courier, group) in groups {
            let mut current: Vec<order::Model> = Vec::new();
            let mut current_items = 0u32;

            for ord in group {
                let order_items: u32 = items_by_order
                    .get(&ord.id)
                    .map(|items| items.iter().map(|i| i.quantity.max(0) as u32).sum())
                    .unwrap_or(0);

                if current.len() as u32 >= request.max_orders
                    || current_items + order_items > request.max_items
                {
                    if !current.is_empty() {
                        let sealed = self
                            .seal_batch(&request, courier.clone(), &current, current_items, &items_by_order)
                            .await?;
                        total_orders += current.len();
                        batches.push(sealed);
                        current = Vec::new();
                        current_items = 0;
                    }
                }

                current_items += order_items;
                current.push(ord);
            }

            if !current.is_empty() {
                let sealed = self
                    .seal_batch(&request, courier.clone(), &current, current_items, &items_by_order)
                    .await?;
                total_orders += current.len();
                batches.push(sealed);
            }
        }

        info!(
            batch_count = batches.len(),
            total_orders = total_orders,
            "Pick batches created"
        );
        self.events
            .emit(Event::BatchesCreated {
                batch_count: batches.len(),
                total_orders,
            })
            .await;

        Ok(BatchCreationResult {
            batches,
            total_orders,
        })
    }

    /// PENDING → IN_PROGRESS; member orders move to PICKING.
    #[instrument(skip(self))]
    pub async fn start_batch(
        &self,
        batch_id: Uuid,
        picker_id: Uuid,
    ) -> Result<batch::Model, ServiceError> {
        let batch = self.find_batch(batch_id).await?;
        if BatchStatus::from_str(&batch.status) != Some(BatchStatus::Pending) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot start batch in {} status",
                batch.status
            )));
        }

        let now = self.clock.now();
        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::InProgress.as_str().to_string());
        active.picker_id = Set(Some(picker_id));
        active.started_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        self.update_member_orders(batch_id, OrderStatus::Picking, Some(picker_id))
            .await?;

        info!(batch_id = %batch_id, picker_id = %picker_id, "Batch started");
        self.events
            .emit(Event::BatchStarted {
                batch_id,
                picker_id,
            })
            .await;

        Ok(updated)
    }

    /// IN_PROGRESS → COMPLETED; member orders move to PACKED.
    #[instrument(skip(self))]
    pub async fn complete_batch(
        &self,
        batch_id: Uuid,
        _picker_id: Uuid,
    ) -> Result<batch::Model, ServiceError> {
        let batch = self.find_batch(batch_id).await?;
        if BatchStatus::from_str(&batch.status) != Some(BatchStatus::InProgress) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot complete batch in {} status",
                batch.status
            )));
        }

        let now = self.clock.now();
        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Completed.as_str().to_string());
        active.completed_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        self.update_member_orders(batch_id, OrderStatus::Packed, None)
            .await?;

        info!(batch_id = %batch_id, "Batch completed");
        self.events.emit(Event::BatchCompleted(batch_id)).await;

        Ok(updated)
    }

    /// Cancels a batch: member orders revert to CONFIRMED and any stock
    /// locks they still hold are released in a best-effort sweep. A
    /// COMPLETED batch cannot be cancelled.
    #[instrument(skip(self, reason))]
    pub async fn cancel_batch(
        &self,
        batch_id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
    ) -> Result<(batch::Model, Vec<LockReleaseOutcome>), ServiceError> {
        let batch = self.find_batch(batch_id).await?;
        match BatchStatus::from_str(&batch.status) {
            Some(BatchStatus::Completed) => {
                return Err(ServiceError::InvalidStatus(
                    "Cannot cancel completed batch".to_string(),
                ));
            }
            Some(BatchStatus::Cancelled) => {
                return Err(ServiceError::InvalidStatus(
                    "Batch is already cancelled".to_string(),
                ));
            }
            _ => {}
        }

        let member_ids = self.member_order_ids(batch_id).await?;
        let mut outcomes = Vec::new();
        for order_id in &member_ids {
            let locks = self.stock_locks.locked_locks_for_order(*order_id).await?;
            for lock in locks {
                match self
                    .stock_locks
                    .release(lock.id, cancelled_by, "Batch cancelled")
                    .await
                {
                    Ok(()) => outcomes.push(LockReleaseOutcome::ok(lock.id)),
                    Err(e) => {
                        error!(lock_id = %lock.id, error = %e, "Failed to release lock during batch cancel");
                        outcomes.push(LockReleaseOutcome::failed(lock.id, &e));
                    }
                }
            }
        }

        self.revert_member_orders(&member_ids).await?;

        let now = self.clock.now();
        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Cancelled.as_str().to_string());
        active.cancelled_at = Set(Some(now));
        active.cancelled_by = Set(Some(cancelled_by));
        active.cancel_reason = Set(Some(reason.to_string()));
        let updated = active.update(self.db.as_ref()).await?;

        info!(batch_id = %batch_id, reason = reason, "Batch cancelled");
        self.events
            .emit(Event::BatchCancelled {
                batch_id,
                locks_released: outcomes.iter().filter(|o| o.released).count(),
            })
            .await;

        Ok((updated, outcomes))
    }

    /// Order ids linked to one batch.
    pub async fn member_order_ids(&self, batch_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let links = BatchOrder::find()
            .filter(batch_order::Column::BatchId.eq(batch_id))
            .all(self.db.as_ref())
            .await?;
        Ok(links.into_iter().map(|l| l.order_id).collect())
    }

    async fn seal_batch(
        &self,
        request: &CreateBatchesRequest,
        courier: Option<String>,
        members: &[order::Model],
        total_items: u32,
        items_by_order: &HashMap<Uuid, Vec<order_item::Model>>,
    ) -> Result<batch::Model, ServiceError> {
        let zones: BTreeSet<String> = members
            .iter()
            .filter_map(|o| items_by_order.get(&o.id))
            .flatten()
            .filter_map(|i| i.bin_location.split('-').next().map(str::to_string))
            .collect();

        let priority = members
            .iter()
            .min_by_key(|o| OrderPriority::rank(&o.priority))
            .map(|o| o.priority.clone())
            .unwrap_or_else(|| "NORMAL".to_string());

        let now = self.clock.now();
        let batch_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        let model = batch::ActiveModel {
            id: Set(batch_id),
            site_id: Set(request.site_id),
            status: Set(BatchStatus::Pending.as_str().to_string()),
            priority: Set(priority),
            courier: Set(courier),
            total_orders: Set(members.len() as i32),
            total_items: Set(total_items as i32),
            zones: Set(serde_json::json!(zones.iter().collect::<Vec<_>>())),
            picker_id: Set(None),
            created_by: Set(request.created_by),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            cancelled_by: Set(None),
            cancel_reason: Set(None),
        };
        let inserted = model.insert(&txn).await?;

        for member in members {
            let link = batch_order::ActiveModel {
                id: Set(Uuid::new_v4()),
                batch_id: Set(batch_id),
                order_id: Set(member.id),
            };
            link.insert(&txn).await?;
        }

        txn.commit().await?;
        Ok(inserted)
    }

    async fn order_ids_in_active_batches(
        &self,
        site_id: Uuid,
    ) -> Result<BTreeSet<Uuid>, ServiceError> {
        let active_batches = Batch::find()
            .filter(batch::Column::SiteId.eq(site_id))
            .filter(batch::Column::Status.is_in([
                BatchStatus::Pending.as_str(),
                BatchStatus::InProgress.as_str(),
            ]))
            .all(self.db.as_ref())
            .await?;

        if active_batches.is_empty() {
            return Ok(BTreeSet::new());
        }

        let batch_ids: Vec<Uuid> = active_batches.iter().map(|b| b.id).collect();
        let links = BatchOrder::find()
            .filter(batch_order::Column::BatchId.is_in(batch_ids))
            .all(self.db.as_ref())
            .await?;

        Ok(links.into_iter().map(|l| l.order_id).collect())
    }

    async fn load_items(
        &self,
        orders: &[order::Model],
    ) -> Result<HashMap<Uuid, Vec<order_item::Model>>, ServiceError> {
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(self.db.as_ref())
            .await?;

        let mut by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }
        Ok(by_order)
    }

    async fn update_member_orders(
        &self,
        batch_id: Uuid,
        status: OrderStatus,
        picked_by: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let member_ids = self.member_order_ids(batch_id).await?;
        let now = self.clock.now();
        for order_id in member_ids {
            if let Some(ord) = Order::find_by_id(order_id).one(self.db.as_ref()).await? {
                let mut active: order::ActiveModel = ord.into();
                active.status = Set(status.as_str().to_string());
                if let Some(picker) = picked_by {
                    active.picked_by = Set(Some(picker));
                }
                active.updated_at = Set(Some(now));
                active.update(self.db.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn revert_member_orders(&self, member_ids: &[Uuid]) -> Result<(), ServiceError> {
        let now = self.clock.now();
        for order_id in member_ids {
            if let Some(ord) = Order::find_by_id(*order_id).one(self.db.as_ref()).await? {
                let mut active: order::ActiveModel = ord.into();
                active.status = Set(OrderStatus::Confirmed.as_str().to_string());
                active.picked_by = Set(None);
                active.updated_at = Set(Some(now));
                active.update(self.db.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn find_batch(&self, batch_id: Uuid) -> Result<batch::Model, ServiceError> {
        Batch::find_by_id(batch_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))
    }
}

/// Partitions orders by courier, preserving first-appearance group order so
/// binning stays deterministic. Orders without a courier share one group.
fn partition_by_courier(orders: Vec<order::Model>) -> Vec<(Option<String>, Vec<order::Model>)> {
    let mut groups: Vec<(String, Vec<order::Model>)> = Vec::new();
    for ord in orders {
        let key = ord.courier.clone().unwrap_or_else(|| NO_COURIER.to_string());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(ord),
            None => groups.push((key, vec![ord])),
        }
    }
    groups
        .into_iter()
        .map(|(k, members)| {
            let courier = if k == NO_COURIER { None } else { Some(k) };
            (courier, members)
        })
        .collect()
}
