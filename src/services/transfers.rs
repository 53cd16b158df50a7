//! Cross-site transfer coordination.
//!
//! A transfer rides on a source-side stock lock: creation reserves the
//! stock, shipping commits the lock (the actual source deduction), and
//! receipt credits the destination. Receiving fewer or more units than
//! were shipped opens a discrepancy instead of silently absorbing the
//! difference.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::discrepancy::{self, DiscrepancyStatus};
use crate::entities::inventory_item::{self, Entity as InventoryItem, InventoryStatus};
use crate::entities::inventory_transaction;
use crate::entities::inventory_transfer::{self, Entity as InventoryTransfer, TransferStatus};
use crate::entities::site::{self, Entity as Site};
use crate::entities::stock_lock::OperationType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_locks::{ReserveRequest, StockLockService};
use crate::services::KeyedMutexes;

/// Bin where received transfer stock lands unless the caller names one.
pub const DEFAULT_RECEIVING_BIN: &str = "STAGING";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub sku: String,
    pub quantity: i32,
    pub from_site_id: Uuid,
    pub to_site_id: Uuid,
    pub requested_by: Uuid,
    pub reason: Option<String>,
}

/// Per-site availability line in a multi-site view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteAvailability {
    pub site_id: Uuid,
    pub site_name: String,
    pub total: i32,
    pub available: i32,
    pub reserved: i32,
}

/// Company-wide inventory position for one SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSiteAvailability {
    pub sku: String,
    pub sites: Vec<SiteAvailability>,
    pub total: i32,
    pub available: i32,
    pub reserved: i32,
}

#[derive(Clone)]
pub struct TransferService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    stock_locks: StockLockService,
    key_mutexes: KeyedMutexes,
}

impl TransferService {
    /// `key_mutexes` must be the same registry the reservation ledger uses:
    /// destination credits are inventory writes and serialize on it.
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        stock_locks: StockLockService,
        key_mutexes: KeyedMutexes,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            stock_locks,
            key_mutexes,
        }
    }

    /// Creates a PENDING transfer backed by a source-side reservation.
    ///
    /// Both sites must exist and belong to the same company. The source
    /// bin with the deepest availability is reserved; the ledger enforces
    /// sufficiency against concurrent locks.
    #[instrument(skip(self, request), fields(sku = %request.sku, quantity = request.quantity))]
    pub async fn create_transfer(
        &self,
        request: CreateTransferRequest,
    ) -> Result<(inventory_transfer::Model, Uuid), ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Transfer quantity must be positive".to_string(),
            ));
        }
        if request.from_site_id == request.to_site_id {
            return Err(ServiceError::ValidationError(
                "Source and destination site are the same".to_string(),
            ));
        }

        let from_site = self.find_site(request.from_site_id).await?;
        let to_site = self.find_site(request.to_site_id).await?;
        if from_site.company_id != to_site.company_id {
            return Err(ServiceError::CrossCompanyTransfer {
                from_site_id: request.from_site_id,
                to_site_id: request.to_site_id,
            });
        }

        let source = self
            .deepest_source_bin(&request.sku, request.from_site_id)
            .await?
            .ok_or_else(|| ServiceError::InsufficientStock {
                sku: request.sku.clone(),
                bin_location: String::new(),
                available: 0,
                requested: request.quantity,
            })?;

        let lock_id = self
            .stock_locks
            .reserve(ReserveRequest {
                sku: request.sku.clone(),
                quantity: request.quantity,
                bin_location: source.bin_location.clone(),
                operation_type: OperationType::TransferOut,
                operator_id: request.requested_by,
                order_id: None,
                transfer_id: None,
            })
            .await?;

        let now = self.clock.now();
        let transfer_id = Uuid::new_v4();
        let model = inventory_transfer::ActiveModel {
            id: Set(transfer_id),
            sku: Set(request.sku.clone()),
            quantity: Set(request.quantity),
            from_site_id: Set(request.from_site_id),
            to_site_id: Set(request.to_site_id),
            status: Set(TransferStatus::Pending.as_str().to_string()),
            lock_id: Set(lock_id),
            requested_by: Set(request.requested_by),
            reason: Set(request.reason.clone()),
            approved_by: Set(None),
            approved_at: Set(None),
            shipped_by: Set(None),
            shipped_at: Set(None),
            tracking_number: Set(None),
            received_by: Set(None),
            received_at: Set(None),
            actual_quantity: Set(None),
            discrepancy_id: Set(None),
            created_at: Set(now),
        };
        let inserted = model.insert(self.db.as_ref()).await?;

        self.stock_locks.attach_transfer(lock_id, transfer_id).await?;

        info!(transfer_id = %transfer_id, lock_id = %lock_id, "Transfer created");
        self.events
            .emit(Event::TransferCreated {
                transfer_id,
                sku: request.sku,
                quantity: request.quantity,
            })
            .await;

        Ok((inserted, lock_id))
    }

    /// PENDING → APPROVED.
    #[instrument(skip(self))]
    pub async fn approve_transfer(
        &self,
        transfer_id: Uuid,
        approved_by: Uuid,
    ) -> Result<inventory_transfer::Model, ServiceError> {
        let transfer = self.find_transfer(transfer_id).await?;
        if TransferStatus::from_str(&transfer.status) != Some(TransferStatus::Pending) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot approve transfer in {} status",
                transfer.status
            )));
        }

        let now = self.clock.now();
        let mut active: inventory_transfer::ActiveModel = transfer.into();
        active.status = Set(TransferStatus::Approved.as_str().to_string());
        active.approved_by = Set(Some(approved_by));
        active.approved_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        info!(transfer_id = %transfer_id, "Transfer approved");
        self.events.emit(Event::TransferApproved(transfer_id)).await;

        Ok(updated)
    }

    /// APPROVED → IN_TRANSIT. Committing the transfer's lock performs the
    /// source deduction; if the lock has expired meanwhile the ship fails
    /// and the transfer stays APPROVED.
    #[instrument(skip(self, tracking_number))]
    pub async fn ship_transfer(
        &self,
        transfer_id: Uuid,
        shipped_by: Uuid,
        tracking_number: &str,
    ) -> Result<inventory_transfer::Model, ServiceError> {
        let transfer = self.find_transfer(transfer_id).await?;
        if TransferStatus::from_str(&transfer.status) != Some(TransferStatus::Approved) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot ship transfer in {} status",
                transfer.status
            )));
        }

        self.stock_locks.commit(transfer.lock_id, shipped_by).await?;

        let now = self.clock.now();
        let mut active: inventory_transfer::ActiveModel = transfer.into();
        active.status = Set(TransferStatus::InTransit.as_str().to_string());
        active.shipped_by = Set(Some(shipped_by));
        active.shipped_at = Set(Some(now));
        active.tracking_number = Set(Some(tracking_number.to_string()));
        let updated = active.update(self.db.as_ref()).await?;

        info!(transfer_id = %transfer_id, tracking_number = tracking_number, "Transfer shipped");
        self.events
            .emit(Event::TransferShipped {
                transfer_id,
                tracking_number: tracking_number.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Receives an IN_TRANSIT transfer at the destination.
    ///
    /// Credits the destination inventory row (created on first receipt,
    /// defaulting to the STAGING bin) by the counted quantity and appends
    /// the TRANSFER_IN audit row. A count that differs from the requested
    /// quantity opens a discrepancy and lands the transfer in
    /// RECEIVED_WITH_DISCREPANCY instead of COMPLETED.
    #[instrument(skip(self))]
    pub async fn receive_transfer(
        &self,
        transfer_id: Uuid,
        received_by: Uuid,
        actual_quantity: i32,
        bin_location: Option<&str>,
    ) -> Result<inventory_transfer::Model, ServiceError> {
        if actual_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Received quantity cannot be negative".to_string(),
            ));
        }

        let transfer = self.find_transfer(transfer_id).await?;
        if TransferStatus::from_str(&transfer.status) != Some(TransferStatus::InTransit) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot receive transfer in {} status",
                transfer.status
            )));
        }

        let bin = bin_location.unwrap_or(DEFAULT_RECEIVING_BIN);
        let pair_mutex = self.key_mutexes.for_pair(&transfer.sku, bin);
        let _guard = pair_mutex.lock().await;

        let now = self.clock.now();
        let db = self.db.as_ref();
        let txn = db.begin().await?;

        let existing = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(&transfer.sku))
            .filter(inventory_item::Column::BinLocation.eq(bin))
            .filter(inventory_item::Column::SiteId.eq(transfer.to_site_id))
            .one(&txn)
            .await?;

        let destination_site_id = transfer.to_site_id;
        match existing {
            Some(item) => {
                let mut active: inventory_item::ActiveModel = item.clone().into();
                active.quantity_total = Set(item.quantity_total + actual_quantity);
                active.quantity_available = Set(item.quantity_available + actual_quantity);
                active.last_counted_at = Set(Some(now));
                active.updated_at = Set(Some(now));
                active.update(&txn).await?;
            }
            None => {
                let item = inventory_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    sku: Set(transfer.sku.clone()),
                    bin_location: Set(bin.to_string()),
                    site_id: Set(destination_site_id),
                    quantity_total: Set(actual_quantity),
                    quantity_available: Set(actual_quantity),
                    quantity_reserved: Set(0),
                    status: Set(InventoryStatus::Normal.as_str().to_string()),
                    last_counted_at: Set(Some(now)),
                    created_at: Set(now),
                    updated_at: Set(None),
                };
                item.insert(&txn).await?;
            }
        }

        let audit = inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(transfer.sku.clone()),
            quantity: Set(actual_quantity),
            bin_location: Set(bin.to_string()),
            operation_type: Set("TRANSFER_IN".to_string()),
            operator_id: Set(received_by),
            site_id: Set(destination_site_id),
            order_id: Set(None),
            transfer_id: Set(Some(transfer_id)),
            reason: Set(format!("Receive transfer {}", transfer_id)),
            created_at: Set(now),
        };
        audit.insert(&txn).await?;

        let with_discrepancy = actual_quantity != transfer.quantity;
        let discrepancy_id = if with_discrepancy {
            let variance = (transfer.quantity - actual_quantity).abs();
            let variance_percent = f64::from(variance) / f64::from(transfer.quantity);
            warn!(
                transfer_id = %transfer_id,
                requested = transfer.quantity,
                actual = actual_quantity,
                "Transfer received with quantity mismatch"
            );
            let id = Uuid::new_v4();
            let row = discrepancy::ActiveModel {
                id: Set(id),
                sku: Set(transfer.sku.clone()),
                expected_quantity: Set(transfer.quantity),
                actual_quantity: Set(actual_quantity),
                variance: Set(variance),
                variance_percent: Set(variance_percent),
                bin_location: Set(bin.to_string()),
                site_id: Set(destination_site_id),
                status: Set(DiscrepancyStatus::Open.as_str().to_string()),
                reported_by: Set(received_by),
                reason: Set("Transfer receipt quantity mismatch".to_string()),
                order_id: Set(None),
                transfer_id: Set(Some(transfer_id)),
                investigated_by: Set(None),
                investigated_at: Set(None),
                investigation_notes: Set(None),
                root_cause: Set(None),
                resolved_by: Set(None),
                resolved_at: Set(None),
                resolution: Set(None),
                created_at: Set(now),
            };
            row.insert(&txn).await?;
            Some(id)
        } else {
            None
        };

        let final_status = if with_discrepancy {
            TransferStatus::ReceivedWithDiscrepancy
        } else {
            TransferStatus::Completed
        };

        let mut active: inventory_transfer::ActiveModel = transfer.clone().into();
        active.status = Set(final_status.as_str().to_string());
        active.received_by = Set(Some(received_by));
        active.received_at = Set(Some(now));
        active.actual_quantity = Set(Some(actual_quantity));
        active.discrepancy_id = Set(discrepancy_id);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            transfer_id = %transfer_id,
            actual_quantity = actual_quantity,
            with_discrepancy = with_discrepancy,
            "Transfer received"
        );
        self.events
            .emit(Event::TransferReceived {
                transfer_id,
                actual_quantity,
                with_discrepancy,
            })
            .await;
        if let Some(id) = discrepancy_id {
            self.events
                .emit(Event::DiscrepancyOpened {
                    discrepancy_id: id,
                    sku: updated.sku.clone(),
                    variance_percent: f64::from((updated.quantity - actual_quantity).abs())
                        / f64::from(updated.quantity),
                })
                .await;
        }

        Ok(updated)
    }

    /// Per-site availability rows plus company-wide totals for one SKU.
    #[instrument(skip(self))]
    pub async fn multi_site_availability(
        &self,
        company_id: Uuid,
        sku: &str,
    ) -> Result<MultiSiteAvailability, ServiceError> {
        let sites = Site::find()
            .filter(site::Column::CompanyId.eq(company_id))
            .order_by_asc(site::Column::Name)
            .all(self.db.as_ref())
            .await?;

        let mut rows = Vec::with_capacity(sites.len());
        let mut total = 0;
        let mut available = 0;
        let mut reserved = 0;

        for s in sites {
            let items = InventoryItem::find()
                .filter(inventory_item::Column::Sku.eq(sku))
                .filter(inventory_item::Column::SiteId.eq(s.id))
                .all(self.db.as_ref())
                .await?;

            let site_total: i32 = items.iter().map(|i| i.quantity_total).sum();
            let site_available: i32 = items.iter().map(|i| i.quantity_available).sum();
            let site_reserved: i32 = items.iter().map(|i| i.quantity_reserved).sum();

            total += site_total;
            available += site_available;
            reserved += site_reserved;

            rows.push(SiteAvailability {
                site_id: s.id,
                site_name: s.name,
                total: site_total,
                available: site_available,
                reserved: site_reserved,
            });
        }

        Ok(MultiSiteAvailability {
            sku: sku.to_string(),
            sites: rows,
            total,
            available,
            reserved,
        })
    }

    pub async fn get_transfer(
        &self,
        transfer_id: Uuid,
    ) -> Result<inventory_transfer::Model, ServiceError> {
        self.find_transfer(transfer_id).await
    }

    /// Source bin with the most availability for one SKU at one site.
    async fn deepest_source_bin(
        &self,
        sku: &str,
        site_id: Uuid,
    ) -> Result<Option<inventory_item::Model>, ServiceError> {
        let item = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(sku))
            .filter(inventory_item::Column::SiteId.eq(site_id))
            .order_by_desc(inventory_item::Column::QuantityAvailable)
            .one(self.db.as_ref())
            .await?;
        Ok(item)
    }

    async fn find_transfer(
        &self,
        transfer_id: Uuid,
    ) -> Result<inventory_transfer::Model, ServiceError> {
        InventoryTransfer::find_by_id(transfer_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transfer {} not found", transfer_id)))
    }

    async fn find_site(&self, site_id: Uuid) -> Result<site::Model, ServiceError> {
        Site::find_by_id(site_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::InvalidSite(site_id))
    }
}
