//! Wave orchestration: criteria-selected order groups released together.
//!
//! Release is the interesting part: it reserves stock for every line of
//! every member order and rolls the whole set back if any single
//! reservation fails, so a wave never goes out half-reserved.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::stock_lock::OperationType;
use crate::entities::wave::{self, Entity as Wave, WaveStatus};
use crate::entities::wave_order::{self, Entity as WaveOrder};
use crate::errors::{LockReleaseOutcome, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::batching::{BatchPickingService, CreateBatchesRequest};
use crate::services::stock_locks::{ReserveRequest, StockLockService};

/// Selection criteria for a new wave. Filters are conjunctive; `None`
/// matches everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWaveRequest {
    pub site_id: Uuid,
    pub name: String,
    pub courier: Option<String>,
    pub priority: Option<String>,
    pub cutoff_time: Option<chrono::DateTime<Utc>>,
    pub created_by: Uuid,
}

#[derive(Clone)]
pub struct WaveService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    stock_locks: StockLockService,
    batching: BatchPickingService,
}

impl WaveService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        stock_locks: StockLockService,
        batching: BatchPickingService,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            stock_locks,
            batching,
        }
    }

    /// Selects CONFIRMED orders matching the criteria into a PENDING wave.
    ///
    /// Orders already committed to a pending/released/in-progress wave are
    /// skipped. A cutoff in the past is rejected; an empty selection is an
    /// error rather than an empty wave.
    #[instrument(skip(self, request), fields(site_id = %request.site_id, name = %request.name))]
    pub async fn create_wave(&self, request: CreateWaveRequest) -> Result<wave::Model, ServiceError> {
        let now = self.clock.now();
        if let Some(cutoff) = request.cutoff_time {
            if cutoff <= now {
                return Err(ServiceError::InvalidCutoff);
            }
        }

        let db = self.db.as_ref();

        let mut query = Order::find()
            .filter(order::Column::SiteId.eq(request.site_id))
            .filter(order::Column::Status.eq(OrderStatus::Confirmed.as_str()));
        if let Some(courier) = &request.courier {
            query = query.filter(order::Column::Courier.eq(courier));
        }
        if let Some(priority) = &request.priority {
            query = query.filter(order::Column::Priority.eq(priority));
        }
        if let Some(cutoff) = request.cutoff_time {
            query = query.filter(order::Column::CreatedAt.lte(cutoff));
        }

        let mut orders = query.order_by_asc(order::Column::CreatedAt).all(db).await?;

        let waved = self.order_ids_in_active_waves().await?;
        orders.retain(|o| !waved.contains(&o.id));

        if orders.is_empty() {
            return Err(ServiceError::NoMatchingOrders);
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let total_items: i32 = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
            .all(db)
            .await?
            .iter()
            .map(|i| i.quantity.max(0))
            .sum();

        let wave_id = Uuid::new_v4();
        let txn = db.begin().await?;

        let model = wave::ActiveModel {
            id: Set(wave_id),
            site_id: Set(request.site_id),
            name: Set(request.name.clone()),
            status: Set(WaveStatus::Pending.as_str().to_string()),
            courier: Set(request.courier.clone()),
            priority: Set(request.priority.clone()),
            cutoff_time: Set(request.cutoff_time),
            total_orders: Set(orders.len() as i32),
            total_items: Set(total_items),
            batches_count: Set(0),
            created_by: Set(request.created_by),
            created_at: Set(now),
            released_at: Set(None),
            released_by: Set(None),
            batched_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            cancelled_by: Set(None),
            cancel_reason: Set(None),
        };
        let inserted = model.insert(&txn).await?;

        for order_id in &order_ids {
            let link = wave_order::ActiveModel {
                id: Set(Uuid::new_v4()),
                wave_id: Set(wave_id),
                order_id: Set(*order_id),
            };
            link.insert(&txn).await?;
        }

        txn.commit().await?;

        info!(
            wave_id = %wave_id,
            total_orders = orders.len(),
            total_items = total_items,
            "Wave created"
        );
        self.events
            .emit(Event::WaveCreated {
                wave_id,
                total_orders: orders.len() as i32,
                total_items,
            })
            .await;

        Ok(inserted)
    }

    /// Releases a PENDING wave: reserves stock for every line of every
    /// member order, all or nothing.
    ///
    /// Reservations run line by line; each acquired lock id is recorded
    /// before the next attempt. If any reservation fails, every lock
    /// acquired so far is released (best effort) and the triggering error
    /// is returned with the wave back in PENDING. On success the wave moves
    /// to RELEASED and member orders to ALLOTTED.
    #[instrument(skip(self))]
    pub async fn release_wave(
        &self,
        wave_id: Uuid,
        released_by: Uuid,
    ) -> Result<wave::Model, ServiceError> {
        let wave = self.find_wave(wave_id).await?;
        if WaveStatus::from_str(&wave.status) != Some(WaveStatus::Pending) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot release wave in {} status",
                wave.status
            )));
        }

        // Claim the wave with a conditional flip before reserving anything,
        // so two concurrent releases cannot both pass the status check and
        // double-reserve every line. The claim is reverted on failure.
        let claimed = Wave::update_many()
            .col_expr(
                wave::Column::Status,
                Expr::value(WaveStatus::Released.as_str()),
            )
            .filter(wave::Column::Id.eq(wave_id))
            .filter(wave::Column::Status.eq(WaveStatus::Pending.as_str()))
            .exec(self.db.as_ref())
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(
                "Wave is already being released".to_string(),
            ));
        }

        let member_ids = self.member_order_ids(wave_id).await?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(member_ids.clone()))
            .order_by_asc(order_item::Column::Id)
            .all(self.db.as_ref())
            .await?;

        let mut acquired: Vec<Uuid> = Vec::with_capacity(items.len());
        for item in &items {
            let request = ReserveRequest {
                sku: item.sku.clone(),
                quantity: item.quantity,
                bin_location: item.bin_location.clone(),
                operation_type: OperationType::OrderPick,
                operator_id: released_by,
                order_id: Some(item.order_id),
                transfer_id: None,
            };
            match self.stock_locks.reserve(request).await {
                Ok(lock_id) => acquired.push(lock_id),
                Err(e) => {
                    warn!(
                        wave_id = %wave_id,
                        sku = %item.sku,
                        bin = %item.bin_location,
                        error = %e,
                        "Wave release failed, rolling back acquired locks"
                    );
                    self.rollback_locks(&acquired, released_by).await;
                    self.unclaim_wave(wave_id).await;
                    return Err(e);
                }
            }
        }

        let now = self.clock.now();
        let locks_acquired = acquired.len();
        let mut active: wave::ActiveModel = wave.into();
        active.status = Set(WaveStatus::Released.as_str().to_string());
        active.released_at = Set(Some(now));
        active.released_by = Set(Some(released_by));
        let updated = active.update(self.db.as_ref()).await?;

        self.set_member_status(&member_ids, OrderStatus::Allotted, false)
            .await?;

        info!(wave_id = %wave_id, locks_acquired = locks_acquired, "Wave released");
        self.events
            .emit(Event::WaveReleased {
                wave_id,
                locks_acquired,
            })
            .await;

        Ok(updated)
    }

    /// Batches a RELEASED wave's member orders and moves it to IN_PROGRESS.
    #[instrument(skip(self))]
    pub async fn batch_wave(
        &self,
        wave_id: Uuid,
        created_by: Uuid,
    ) -> Result<wave::Model, ServiceError> {
        let wave = self.find_wave(wave_id).await?;
        if WaveStatus::from_str(&wave.status) != Some(WaveStatus::Released) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot batch wave in {} status",
                wave.status
            )));
        }

        let member_ids = self.member_order_ids(wave_id).await?;
        let orders = Order::find()
            .filter(order::Column::Id.is_in(member_ids))
            .all(self.db.as_ref())
            .await?;

        let request = CreateBatchesRequest::with_defaults(wave.site_id, created_by);
        let result = self
            .batching
            .create_batches_for_orders(request, orders)
            .await?;

        let now = self.clock.now();
        let batches_count = result.batches.len() as i32;
        let mut active: wave::ActiveModel = wave.into();
        active.status = Set(WaveStatus::InProgress.as_str().to_string());
        active.batches_count = Set(batches_count);
        active.batched_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        info!(wave_id = %wave_id, batches_count = batches_count, "Wave batched");
        self.events
            .emit(Event::WaveBatched {
                wave_id,
                batches_count,
            })
            .await;

        Ok(updated)
    }

    /// IN_PROGRESS → COMPLETED.
    #[instrument(skip(self))]
    pub async fn complete_wave(&self, wave_id: Uuid) -> Result<wave::Model, ServiceError> {
        let wave = self.find_wave(wave_id).await?;
        if WaveStatus::from_str(&wave.status) != Some(WaveStatus::InProgress) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot complete wave in {} status",
                wave.status
            )));
        }

        let now = self.clock.now();
        let mut active: wave::ActiveModel = wave.into();
        active.status = Set(WaveStatus::Completed.as_str().to_string());
        active.completed_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        info!(wave_id = %wave_id, "Wave completed");
        self.events.emit(Event::WaveCompleted(wave_id)).await;

        Ok(updated)
    }

    /// Cancels a wave in any non-terminal state.
    ///
    /// Stock locks still held by member orders are released in a
    /// best-effort sweep; individual release failures are reported in the
    /// outcome list, never aborting the cancellation. Member orders revert
    /// to CONFIRMED.
    #[instrument(skip(self, reason))]
    pub async fn cancel_wave(
        &self,
        wave_id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
    ) -> Result<(wave::Model, Vec<LockReleaseOutcome>), ServiceError> {
        let wave = self.find_wave(wave_id).await?;
        match WaveStatus::from_str(&wave.status) {
            Some(WaveStatus::Completed) => {
                return Err(ServiceError::InvalidStatus(
                    "Cannot cancel completed wave".to_string(),
                ));
            }
            Some(WaveStatus::Cancelled) => {
                return Err(ServiceError::InvalidStatus(
                    "Wave is already cancelled".to_string(),
                ));
            }
            _ => {}
        }

        let member_ids = self.member_order_ids(wave_id).await?;
        let mut outcomes = Vec::new();
        for order_id in &member_ids {
            let locks = self.stock_locks.locked_locks_for_order(*order_id).await?;
            for lock in locks {
                match self
                    .stock_locks
                    .release(lock.id, cancelled_by, "Wave cancelled")
                    .await
                {
                    Ok(()) => outcomes.push(LockReleaseOutcome::ok(lock.id)),
                    Err(e) => {
                        error!(lock_id = %lock.id, error = %e, "Failed to release lock during wave cancel");
                        outcomes.push(LockReleaseOutcome::failed(lock.id, &e));
                    }
                }
            }
        }

        self.set_member_status(&member_ids, OrderStatus::Confirmed, true)
            .await?;

        let now = self.clock.now();
        let mut active: wave::ActiveModel = wave.into();
        active.status = Set(WaveStatus::Cancelled.as_str().to_string());
        active.cancelled_at = Set(Some(now));
        active.cancelled_by = Set(Some(cancelled_by));
        active.cancel_reason = Set(Some(reason.to_string()));
        let updated = active.update(self.db.as_ref()).await?;

        info!(
            wave_id = %wave_id,
            reason = reason,
            locks_released = outcomes.iter().filter(|o| o.released).count(),
            "Wave cancelled"
        );
        self.events
            .emit(Event::WaveCancelled {
                wave_id,
                locks_released: outcomes.iter().filter(|o| o.released).count(),
            })
            .await;

        Ok((updated, outcomes))
    }

    /// Order ids linked to one wave.
    pub async fn member_order_ids(&self, wave_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let links = WaveOrder::find()
            .filter(wave_order::Column::WaveId.eq(wave_id))
            .all(self.db.as_ref())
            .await?;
        Ok(links.into_iter().map(|l| l.order_id).collect())
    }

    /// Reverts the release claim after a failed reservation pass, putting
    /// the wave back in PENDING. Best effort; a failure here is logged and
    /// the triggering reservation error is still what the caller sees.
    async fn unclaim_wave(&self, wave_id: Uuid) {
        let result = Wave::update_many()
            .col_expr(
                wave::Column::Status,
                Expr::value(WaveStatus::Pending.as_str()),
            )
            .filter(wave::Column::Id.eq(wave_id))
            .filter(wave::Column::Status.eq(WaveStatus::Released.as_str()))
            .exec(self.db.as_ref())
            .await;
        if let Err(e) = result {
            error!(wave_id = %wave_id, error = %e, "Failed to revert wave release claim");
        }
    }

    /// Best-effort rollback after a partial release. Failures are logged;
    /// the lock expiry sweep eventually collects anything left behind.
    async fn rollback_locks(&self, lock_ids: &[Uuid], operator_id: Uuid) {
        for lock_id in lock_ids {
            if let Err(e) = self
                .stock_locks
                .release(*lock_id, operator_id, "Wave release rolled back")
                .await
            {
                error!(lock_id = %lock_id, error = %e, "Failed to roll back wave release lock");
            }
        }
    }

    async fn set_member_status(
        &self,
        member_ids: &[Uuid],
        status: OrderStatus,
        clear_picker: bool,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now();
        for order_id in member_ids {
            if let Some(ord) = Order::find_by_id(*order_id).one(self.db.as_ref()).await? {
                let mut active: order::ActiveModel = ord.into();
                active.status = Set(status.as_str().to_string());
                if clear_picker {
                    active.picked_by = Set(None);
                }
                active.updated_at = Set(Some(now));
                active.update(self.db.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn order_ids_in_active_waves(&self) -> Result<BTreeSet<Uuid>, ServiceError> {
        let active = Wave::find()
            .filter(wave::Column::Status.is_in(WaveStatus::active()))
            .all(self.db.as_ref())
            .await?;
        if active.is_empty() {
            return Ok(BTreeSet::new());
        }
        let wave_ids: Vec<Uuid> = active.iter().map(|w| w.id).collect();
        let links = WaveOrder::find()
            .filter(wave_order::Column::WaveId.is_in(wave_ids))
            .all(self.db.as_ref())
            .await?;
        Ok(links.into_iter().map(|l| l.order_id).collect())
    }

    async fn find_wave(&self, wave_id: Uuid) -> Result<wave::Model, ServiceError> {
        Wave::find_by_id(wave_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wave {} not found", wave_id)))
    }
}
