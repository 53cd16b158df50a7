//! Stock-lock protocol: the reservation ledger.
//!
//! The only component allowed to mutate committed inventory quantities.
//! Reserving holds availability without deducting it; committing performs
//! the actual deduction plus an audit transaction; releasing and expiring
//! leave quantities untouched. Every higher-level orchestrator (picks,
//! waves, transfers) fans in through this service.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::inventory_item::{self, Entity as InventoryItem, InventoryStatus};
use crate::entities::inventory_transaction;
use crate::entities::stock_lock::{self, Entity as StockLock, LockStatus, OperationType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::KeyedMutexes;

/// Inputs for a reservation. Order and transfer ids back-link the lock to
/// the operation that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub sku: String,
    pub quantity: i32,
    pub bin_location: String,
    pub operation_type: OperationType,
    pub operator_id: Uuid,
    pub order_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
}

/// Read-only availability view combining committed quantities with the
/// stock currently held by unexpired locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityView {
    pub available: i32,
    pub total: i32,
    pub locked: i32,
    pub reserved: i32,
}

/// Lock details plus a clock-relative expiry flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockView {
    #[serde(flatten)]
    pub lock: stock_lock::Model,
    pub is_expired: bool,
}

#[derive(Clone)]
pub struct StockLockService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    key_mutexes: KeyedMutexes,
}

impl StockLockService {
    /// `key_mutexes` is shared with every other writer of inventory rows
    /// (adjustments, transfer receipts) so commits serialize against them.
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
        key_mutexes: KeyedMutexes,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            lock_timeout,
            key_mutexes,
        }
    }

    /// Reserves stock for an operation without deducting it.
    ///
    /// The availability check subtracts every other unexpired LOCKED lock on
    /// the same (sku, bin) pair, so concurrent operations cannot double-count
    /// the same units. Check and insert run under the pair's mutex.
    #[instrument(skip(self, request), fields(sku = %request.sku, bin = %request.bin_location, quantity = request.quantity))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Uuid, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let pair_mutex = self
            .key_mutexes
            .for_pair(&request.sku, &request.bin_location);
        let _guard = pair_mutex.lock().await;

        let now = self.clock.now();
        let db = self.db.as_ref();

        let inventory = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(&request.sku))
            .filter(inventory_item::Column::BinLocation.eq(&request.bin_location))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::InsufficientStock {
                sku: request.sku.clone(),
                bin_location: request.bin_location.clone(),
                available: 0,
                requested: request.quantity,
            })?;

        if InventoryStatus::from_str(&inventory.status) == Some(InventoryStatus::Blocked) {
            return Err(ServiceError::InvalidStatus(format!(
                "Inventory {} at {} is blocked",
                request.sku, request.bin_location
            )));
        }

        let locked_quantity = self
            .active_locked_quantity(&request.sku, &request.bin_location, now)
            .await?;
        let available_after_locks = inventory.quantity_available - locked_quantity;

        if available_after_locks < request.quantity {
            return Err(ServiceError::InsufficientStock {
                sku: request.sku.clone(),
                bin_location: request.bin_location.clone(),
                available: available_after_locks,
                requested: request.quantity,
            });
        }

        let lock_id = Uuid::new_v4();
        let lock = stock_lock::ActiveModel {
            id: Set(lock_id),
            sku: Set(request.sku.clone()),
            bin_location: Set(request.bin_location.clone()),
            quantity: Set(request.quantity),
            operation_type: Set(request.operation_type.as_str().to_string()),
            status: Set(LockStatus::Locked.as_str().to_string()),
            operator_id: Set(request.operator_id),
            order_id: Set(request.order_id),
            transfer_id: Set(request.transfer_id),
            reason: Set(None),
            created_at: Set(now),
            expires_at: Set(now + self.lock_timeout),
            committed_at: Set(None),
            released_at: Set(None),
        };
        lock.insert(db).await?;

        info!(lock_id = %lock_id, "Stock reserved");
        self.events
            .emit(Event::StockReserved {
                lock_id,
                sku: request.sku,
                bin_location: request.bin_location,
                quantity: request.quantity,
            })
            .await;

        Ok(lock_id)
    }

    /// Commits a lock: deducts the reserved quantity from availability,
    /// appends the audit transaction, and marks the lock COMMITTED. The
    /// only path that changes committed stock numbers.
    #[instrument(skip(self))]
    pub async fn commit(&self, lock_id: Uuid, operator_id: Uuid) -> Result<(), ServiceError> {
        let lock = self.find_lock(lock_id).await?;

        // Fast-fail outside the critical section; re-checked inside it.
        self.check_lockable(&lock)?;

        if lock.is_expired(self.clock.now()) {
            if self.mark_expired(&lock, "Lock expired before commit").await? {
                return Err(ServiceError::LockExpired(lock_id));
            }
            // Another transition won between the read and the flip; the
            // re-read under the mutex below reports the real state.
        }

        let pair_mutex = self.key_mutexes.for_pair(&lock.sku, &lock.bin_location);
        let _guard = pair_mutex.lock().await;

        // Re-read under the mutex: another commit/release may have won.
        let lock = self.find_lock(lock_id).await?;
        self.check_lockable(&lock)?;
        let now = self.clock.now();
        if lock.is_expired(now) {
            self.mark_expired(&lock, "Lock expired before commit").await?;
            return Err(ServiceError::LockExpired(lock_id));
        }

        let db = self.db.as_ref();
        let inventory = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(&lock.sku))
            .filter(inventory_item::Column::BinLocation.eq(&lock.bin_location))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Inventory item {} at {} not found",
                    lock.sku, lock.bin_location
                ))
            })?;

        if inventory.quantity_available < lock.quantity {
            return Err(ServiceError::InsufficientStock {
                sku: lock.sku.clone(),
                bin_location: lock.bin_location.clone(),
                available: inventory.quantity_available,
                requested: lock.quantity,
            });
        }

        let txn = db.begin().await?;

        let mut item: inventory_item::ActiveModel = inventory.clone().into();
        item.quantity_available = Set(inventory.quantity_available - lock.quantity);
        item.quantity_reserved = Set(inventory.quantity_reserved + lock.quantity);
        item.updated_at = Set(Some(now));
        item.update(&txn).await?;

        let audit = inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(lock.sku.clone()),
            quantity: Set(lock.quantity),
            bin_location: Set(lock.bin_location.clone()),
            operation_type: Set(lock.operation_type.clone()),
            operator_id: Set(operator_id),
            site_id: Set(inventory.site_id),
            order_id: Set(lock.order_id),
            transfer_id: Set(lock.transfer_id),
            reason: Set(format!("Commit lock {}", lock.id)),
            created_at: Set(now),
        };
        audit.insert(&txn).await?;

        let mut active: stock_lock::ActiveModel = lock.clone().into();
        active.status = Set(LockStatus::Committed.as_str().to_string());
        active.committed_at = Set(Some(now));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(lock_id = %lock_id, sku = %lock.sku, quantity = lock.quantity, "Stock committed");
        self.events
            .emit(Event::StockCommitted {
                lock_id,
                sku: lock.sku,
                quantity: lock.quantity,
            })
            .await;

        Ok(())
    }

    /// Releases a LOCKED lock without touching inventory quantities; the
    /// held availability simply becomes visible to other reservations.
    #[instrument(skip(self, reason))]
    pub async fn release(
        &self,
        lock_id: Uuid,
        _operator_id: Uuid,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let lock = self.find_lock(lock_id).await?;
        let pair_mutex = self.key_mutexes.for_pair(&lock.sku, &lock.bin_location);
        let _guard = pair_mutex.lock().await;

        let lock = self.find_lock(lock_id).await?;
        self.check_lockable(&lock)?;

        let now = self.clock.now();
        let mut active: stock_lock::ActiveModel = lock.clone().into();
        active.status = Set(LockStatus::Released.as_str().to_string());
        active.released_at = Set(Some(now));
        active.reason = Set(Some(reason.to_string()));
        active.update(self.db.as_ref()).await?;

        info!(lock_id = %lock_id, reason = reason, "Stock lock released");
        self.events
            .emit(Event::StockLockReleased {
                lock_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(())
    }

    /// Marks every LOCKED lock past its expiry as EXPIRED. Idempotent;
    /// meant to be invoked by the cron collaborator every sweep interval.
    #[instrument(skip(self))]
    pub async fn expire_sweep(&self) -> Result<u64, ServiceError> {
        let now = self.clock.now();
        let expired = StockLock::find()
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .filter(stock_lock::Column::ExpiresAt.lt(now))
            .all(self.db.as_ref())
            .await?;

        for lock in &expired {
            warn!(
                lock_id = %lock.id,
                sku = %lock.sku,
                bin = %lock.bin_location,
                quantity = lock.quantity,
                "Lock expired"
            );
        }

        // One conditional statement: a lock committed or released between
        // the read above and this write keeps its terminal state.
        let result = StockLock::update_many()
            .col_expr(
                stock_lock::Column::Status,
                Expr::value(LockStatus::Expired.as_str()),
            )
            .col_expr(stock_lock::Column::ReleasedAt, Expr::value(now))
            .col_expr(
                stock_lock::Column::Reason,
                Expr::value("Lock timeout (30 minutes)"),
            )
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .filter(stock_lock::Column::ExpiresAt.lt(now))
            .exec(self.db.as_ref())
            .await?;

        let count = result.rows_affected;
        self.events.emit(Event::LocksExpired { count }).await;
        Ok(count)
    }

    /// Availability at one (sku, bin) pair net of unexpired locks. Missing
    /// rows report zeroes rather than an error: callers use this view for
    /// display, not for decisions.
    #[instrument(skip(self))]
    pub async fn available_with_locks(
        &self,
        sku: &str,
        bin_location: &str,
    ) -> Result<AvailabilityView, ServiceError> {
        let inventory = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(sku))
            .filter(inventory_item::Column::BinLocation.eq(bin_location))
            .one(self.db.as_ref())
            .await?;

        let Some(inventory) = inventory else {
            return Ok(AvailabilityView {
                available: 0,
                total: 0,
                locked: 0,
                reserved: 0,
            });
        };

        let locked = self
            .active_locked_quantity(sku, bin_location, self.clock.now())
            .await?;

        Ok(AvailabilityView {
            available: inventory.quantity_available - locked,
            total: inventory.quantity_total,
            locked,
            reserved: inventory.quantity_reserved,
        })
    }

    /// Fetches one lock with its expiry evaluated against the clock.
    pub async fn get_lock(&self, lock_id: Uuid) -> Result<LockView, ServiceError> {
        let lock = self.find_lock(lock_id).await?;
        let is_expired = lock.is_expired(self.clock.now());
        Ok(LockView { lock, is_expired })
    }

    /// Unexpired LOCKED locks on a pair, oldest first.
    pub async fn active_locks(
        &self,
        sku: &str,
        bin_location: &str,
    ) -> Result<Vec<stock_lock::Model>, ServiceError> {
        let now = self.clock.now();
        let locks = StockLock::find()
            .filter(stock_lock::Column::Sku.eq(sku))
            .filter(stock_lock::Column::BinLocation.eq(bin_location))
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .filter(stock_lock::Column::ExpiresAt.gte(now))
            .order_by_asc(stock_lock::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(locks)
    }

    /// LOCKED locks owned by one order (used by cancellation sweeps).
    pub async fn locked_locks_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<stock_lock::Model>, ServiceError> {
        let locks = StockLock::find()
            .filter(stock_lock::Column::OrderId.eq(order_id))
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .all(self.db.as_ref())
            .await?;
        Ok(locks)
    }

    /// Back-links a lock to the transfer created after the reservation.
    pub async fn attach_transfer(
        &self,
        lock_id: Uuid,
        transfer_id: Uuid,
    ) -> Result<(), ServiceError> {
        let lock = self.find_lock(lock_id).await?;
        let mut active: stock_lock::ActiveModel = lock.into();
        active.transfer_id = Set(Some(transfer_id));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    async fn find_lock(&self, lock_id: Uuid) -> Result<stock_lock::Model, ServiceError> {
        StockLock::find_by_id(lock_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::LockNotFound(lock_id))
    }

    fn check_lockable(&self, lock: &stock_lock::Model) -> Result<(), ServiceError> {
        match LockStatus::from_str(&lock.status) {
            Some(LockStatus::Locked) => Ok(()),
            _ => Err(ServiceError::InvalidLockState {
                lock_id: lock.id,
                status: lock.status.clone(),
            }),
        }
    }

    /// Flips a lock to EXPIRED only if it is still LOCKED, so a commit or
    /// release that won the race keeps its terminal state. Returns whether
    /// the flip applied.
    async fn mark_expired(
        &self,
        lock: &stock_lock::Model,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let result = StockLock::update_many()
            .col_expr(
                stock_lock::Column::Status,
                Expr::value(LockStatus::Expired.as_str()),
            )
            .col_expr(stock_lock::Column::ReleasedAt, Expr::value(self.clock.now()))
            .col_expr(stock_lock::Column::Reason, Expr::value(reason))
            .filter(stock_lock::Column::Id.eq(lock.id))
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn active_locked_quantity(
        &self,
        sku: &str,
        bin_location: &str,
        now: DateTime<Utc>,
    ) -> Result<i32, ServiceError> {
        let locks = StockLock::find()
            .filter(stock_lock::Column::Sku.eq(sku))
            .filter(stock_lock::Column::BinLocation.eq(bin_location))
            .filter(stock_lock::Column::Status.eq(LockStatus::Locked.as_str()))
            .filter(stock_lock::Column::ExpiresAt.gte(now))
            .all(self.db.as_ref())
            .await?;
        Ok(locks.iter().map(|l| l.quantity).sum())
    }
}
