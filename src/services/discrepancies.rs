//! Discrepancy detection and reconciliation.
//!
//! A discrepancy is a threshold-gated mismatch between what the system
//! expects at a (sku, bin) pair and what a human counted. Besides the
//! OPEN → INVESTIGATING → RESOLVED workflow, this service owns the only
//! inventory-adjustment path outside the reservation ledger, and it
//! schedules cycle counts for the pairs that go wrong most often.

use chrono::Duration;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::discrepancy::{self, DiscrepancyStatus, Entity as Discrepancy};
use crate::entities::inventory_item::{self, Entity as InventoryItem, InventoryStatus};
use crate::entities::inventory_transaction;
use crate::entities::stock_take::{self, StockTakeType};
use crate::entities::stock_take_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::KeyedMutexes;

/// Trailing window for cycle-count candidate selection.
const CYCLE_COUNT_WINDOW_DAYS: i64 = 30;

/// Inputs for a detection check against a counted quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub sku: String,
    pub expected_quantity: i32,
    pub actual_quantity: i32,
    pub bin_location: String,
    pub site_id: Uuid,
    pub detected_by: Uuid,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
}

/// Result of a detection check. `discrepancy` is present only when the
/// variance crossed the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub variance: i32,
    pub variance_percent: f64,
    pub discrepancy: Option<discrepancy::Model>,
}

/// Result of syncing inventory from a physical count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountSyncOutcome {
    pub item: inventory_item::Model,
    pub adjustment: i32,
    pub discrepancy: Option<discrepancy::Model>,
}

#[derive(Clone)]
pub struct DiscrepancyService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    key_mutexes: KeyedMutexes,
    variance_threshold: f64,
    cycle_count_items: usize,
}

impl DiscrepancyService {
    /// `key_mutexes` must be the same registry the reservation ledger uses:
    /// adjustments are inventory writes and serialize on it.
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        key_mutexes: KeyedMutexes,
        variance_threshold: f64,
        cycle_count_items: usize,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            key_mutexes,
            variance_threshold,
            cycle_count_items,
        }
    }

    /// Checks a counted quantity against the expectation and opens an OPEN
    /// discrepancy when the variance fraction reaches the threshold.
    /// Sub-threshold variances only report the computed numbers.
    #[instrument(skip(self, request), fields(sku = %request.sku, bin = %request.bin_location))]
    pub async fn detect(&self, request: DetectRequest) -> Result<DetectionOutcome, ServiceError> {
        let variance = (request.expected_quantity - request.actual_quantity).abs();
        let percent = variance_fraction(request.expected_quantity, request.actual_quantity);

        if percent < self.variance_threshold {
            return Ok(DetectionOutcome {
                variance,
                variance_percent: percent,
                discrepancy: None,
            });
        }

        let created = self.create_discrepancy(request).await?;
        Ok(DetectionOutcome {
            variance,
            variance_percent: percent,
            discrepancy: Some(created),
        })
    }

    /// Unconditionally records an OPEN discrepancy, bypassing the
    /// threshold. For mismatches reported by a human rather than detected.
    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_discrepancy(
        &self,
        request: DetectRequest,
    ) -> Result<discrepancy::Model, ServiceError> {
        let variance = (request.expected_quantity - request.actual_quantity).abs();
        let percent = variance_fraction(request.expected_quantity, request.actual_quantity);
        let now = self.clock.now();
        let id = Uuid::new_v4();

        let model = discrepancy::ActiveModel {
            id: Set(id),
            sku: Set(request.sku.clone()),
            expected_quantity: Set(request.expected_quantity),
            actual_quantity: Set(request.actual_quantity),
            variance: Set(variance),
            variance_percent: Set(percent),
            bin_location: Set(request.bin_location.clone()),
            site_id: Set(request.site_id),
            status: Set(DiscrepancyStatus::Open.as_str().to_string()),
            reported_by: Set(request.detected_by),
            reason: Set(request.reason.clone()),
            order_id: Set(request.order_id),
            transfer_id: Set(request.transfer_id),
            investigated_by: Set(None),
            investigated_at: Set(None),
            investigation_notes: Set(None),
            root_cause: Set(None),
            resolved_by: Set(None),
            resolved_at: Set(None),
            resolution: Set(None),
            created_at: Set(now),
        };
        let inserted = model.insert(self.db.as_ref()).await?;

        warn!(
            discrepancy_id = %id,
            sku = %request.sku,
            expected = request.expected_quantity,
            actual = request.actual_quantity,
            variance_percent = percent,
            "Discrepancy opened"
        );
        self.events
            .emit(Event::DiscrepancyOpened {
                discrepancy_id: id,
                sku: request.sku,
                variance_percent: percent,
            })
            .await;

        Ok(inserted)
    }

    /// OPEN → INVESTIGATING. Resolution requires an investigation first.
    #[instrument(skip(self, notes, root_cause))]
    pub async fn investigate(
        &self,
        discrepancy_id: Uuid,
        investigated_by: Uuid,
        notes: &str,
        root_cause: Option<&str>,
    ) -> Result<discrepancy::Model, ServiceError> {
        let disc = self.find_discrepancy(discrepancy_id).await?;
        if DiscrepancyStatus::from_str(&disc.status) != Some(DiscrepancyStatus::Open) {
            return Err(ServiceError::DiscrepancyState {
                discrepancy_id,
                status: disc.status,
            });
        }

        let now = self.clock.now();
        let mut active: discrepancy::ActiveModel = disc.into();
        active.status = Set(DiscrepancyStatus::Investigating.as_str().to_string());
        active.investigated_by = Set(Some(investigated_by));
        active.investigated_at = Set(Some(now));
        active.investigation_notes = Set(Some(notes.to_string()));
        active.root_cause = Set(root_cause.map(str::to_string));
        let updated = active.update(self.db.as_ref()).await?;

        info!(discrepancy_id = %discrepancy_id, "Discrepancy under investigation");
        Ok(updated)
    }

    /// INVESTIGATING → RESOLVED.
    ///
    /// With `adjust_inventory`, the counted reality wins: the difference
    /// (actual − expected) is applied to the inventory row's total and
    /// available quantities with an adjustment audit row. The status moves
    /// to RESOLVED whether or not an adjustment was requested.
    #[instrument(skip(self, resolution))]
    pub async fn resolve(
        &self,
        discrepancy_id: Uuid,
        resolved_by: Uuid,
        resolution: &str,
        adjust_inventory: bool,
    ) -> Result<discrepancy::Model, ServiceError> {
        let disc = self.find_discrepancy(discrepancy_id).await?;
        if DiscrepancyStatus::from_str(&disc.status) != Some(DiscrepancyStatus::Investigating) {
            return Err(ServiceError::DiscrepancyState {
                discrepancy_id,
                status: disc.status,
            });
        }

        let adjustment = disc.actual_quantity - disc.expected_quantity;
        if adjust_inventory && adjustment != 0 {
            self.apply_adjustment(
                &disc.sku,
                &disc.bin_location,
                disc.site_id,
                adjustment,
                resolved_by,
                &format!("Resolve discrepancy {}", discrepancy_id),
            )
            .await?;
        }

        let now = self.clock.now();
        let mut active: discrepancy::ActiveModel = disc.into();
        active.status = Set(DiscrepancyStatus::Resolved.as_str().to_string());
        active.resolved_by = Set(Some(resolved_by));
        active.resolved_at = Set(Some(now));
        active.resolution = Set(Some(resolution.to_string()));
        let updated = active.update(self.db.as_ref()).await?;

        info!(
            discrepancy_id = %discrepancy_id,
            adjusted = adjust_inventory && adjustment != 0,
            "Discrepancy resolved"
        );
        self.events
            .emit(Event::DiscrepancyResolved {
                discrepancy_id,
                adjusted: adjust_inventory && adjustment != 0,
            })
            .await;

        Ok(updated)
    }

    /// Closes a discrepancy from any non-terminal state without touching
    /// inventory. For mismatches written off rather than reconciled.
    #[instrument(skip(self, notes))]
    pub async fn close(
        &self,
        discrepancy_id: Uuid,
        closed_by: Uuid,
        notes: &str,
    ) -> Result<discrepancy::Model, ServiceError> {
        let disc = self.find_discrepancy(discrepancy_id).await?;
        match DiscrepancyStatus::from_str(&disc.status) {
            Some(s) if s.is_terminal() => {
                return Err(ServiceError::DiscrepancyState {
                    discrepancy_id,
                    status: disc.status,
                });
            }
            _ => {}
        }

        let now = self.clock.now();
        let mut active: discrepancy::ActiveModel = disc.into();
        active.status = Set(DiscrepancyStatus::Closed.as_str().to_string());
        active.resolved_by = Set(Some(closed_by));
        active.resolved_at = Set(Some(now));
        active.resolution = Set(Some(notes.to_string()));
        let updated = active.update(self.db.as_ref()).await?;

        info!(discrepancy_id = %discrepancy_id, "Discrepancy closed");
        Ok(updated)
    }

    /// Schedules a cycle count for the (sku, bin) pairs with the most
    /// discrepancies over the trailing 30 days, most troubled first.
    /// Returns the PENDING stock take and its seeded items.
    #[instrument(skip(self))]
    pub async fn generate_cycle_count(
        &self,
        site_id: Uuid,
        generated_by: Uuid,
    ) -> Result<(stock_take::Model, Vec<stock_take_item::Model>), ServiceError> {
        let now = self.clock.now();
        let window_start = now - Duration::days(CYCLE_COUNT_WINDOW_DAYS);

        let recent = Discrepancy::find()
            .filter(discrepancy::Column::SiteId.eq(site_id))
            .filter(discrepancy::Column::CreatedAt.gte(window_start))
            .all(self.db.as_ref())
            .await?;

        let mut counts: HashMap<(String, String), usize> = HashMap::new();
        for disc in &recent {
            *counts
                .entry((disc.sku.clone(), disc.bin_location.clone()))
                .or_default() += 1;
        }

        let mut ranked: Vec<((String, String), usize)> = counts.into_iter().collect();
        // Most discrepancies first; key order breaks ties deterministically.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.cycle_count_items);

        let stock_take_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        let take = stock_take::ActiveModel {
            id: Set(stock_take_id),
            site_id: Set(site_id),
            status: Set("PENDING".to_string()),
            take_type: Set(StockTakeType::CycleCount.as_str().to_string()),
            reason: Set("Cycle count from discrepancy history".to_string()),
            created_by: Set(generated_by),
            created_at: Set(now),
        };
        let inserted_take = take.insert(&txn).await?;

        let mut items = Vec::with_capacity(ranked.len());
        for ((sku, bin_location), _) in &ranked {
            let expected = InventoryItem::find()
                .filter(inventory_item::Column::Sku.eq(sku))
                .filter(inventory_item::Column::BinLocation.eq(bin_location))
                .filter(inventory_item::Column::SiteId.eq(site_id))
                .one(&txn)
                .await?
                .map(|i| i.quantity_total)
                .unwrap_or(0);

            let item = stock_take_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                stock_take_id: Set(stock_take_id),
                sku: Set(sku.clone()),
                bin_location: Set(bin_location.clone()),
                expected_quantity: Set(expected),
                actual_quantity: Set(0),
                status: Set("PENDING".to_string()),
            };
            items.push(item.insert(&txn).await?);
        }

        txn.commit().await?;

        info!(
            stock_take_id = %stock_take_id,
            item_count = items.len(),
            "Cycle count generated"
        );
        self.events
            .emit(Event::CycleCountGenerated {
                stock_take_id,
                item_count: items.len(),
            })
            .await;

        Ok((inserted_take, items))
    }

    /// Reconciles one (sku, bin) pair to a physical count.
    ///
    /// A first count creates the inventory row outright. Otherwise the
    /// count is checked against the recorded availability (opening a
    /// discrepancy past the threshold), availability is set to the counted
    /// value, and the difference is audited as an adjustment. Runs under
    /// the pair's mutex like every other inventory write.
    #[instrument(skip(self))]
    pub async fn sync_from_count(
        &self,
        sku: &str,
        bin_location: &str,
        site_id: Uuid,
        actual_quantity: i32,
        counted_by: Uuid,
    ) -> Result<CountSyncOutcome, ServiceError> {
        if actual_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Counted quantity cannot be negative".to_string(),
            ));
        }

        let pair_mutex = self.key_mutexes.for_pair(sku, bin_location);
        let _guard = pair_mutex.lock().await;

        let now = self.clock.now();
        let db = self.db.as_ref();

        let existing = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(sku))
            .filter(inventory_item::Column::BinLocation.eq(bin_location))
            .filter(inventory_item::Column::SiteId.eq(site_id))
            .one(db)
            .await?;

        let Some(item) = existing else {
            let model = inventory_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                sku: Set(sku.to_string()),
                bin_location: Set(bin_location.to_string()),
                site_id: Set(site_id),
                quantity_total: Set(actual_quantity),
                quantity_available: Set(actual_quantity),
                quantity_reserved: Set(0),
                status: Set(InventoryStatus::Normal.as_str().to_string()),
                last_counted_at: Set(Some(now)),
                created_at: Set(now),
                updated_at: Set(None),
            };
            let inserted = model.insert(db).await?;
            info!(sku = sku, bin = bin_location, "Inventory row created from first count");
            return Ok(CountSyncOutcome {
                item: inserted,
                adjustment: actual_quantity,
                discrepancy: None,
            });
        };

        let expected = item.quantity_available;
        let adjustment = actual_quantity - expected;
        let variance = adjustment.abs();
        let percent = variance_fraction(expected, actual_quantity);

        let txn = db.begin().await?;

        let mut active: inventory_item::ActiveModel = item.clone().into();
        active.quantity_available = Set(actual_quantity);
        active.quantity_total = Set(actual_quantity + item.quantity_reserved);
        active.last_counted_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        if adjustment != 0 {
            let operation = if adjustment > 0 {
                "ADJUSTMENT_IN"
            } else {
                "ADJUSTMENT_OUT"
            };
            let audit = inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                sku: Set(sku.to_string()),
                quantity: Set(adjustment.abs()),
                bin_location: Set(bin_location.to_string()),
                operation_type: Set(operation.to_string()),
                operator_id: Set(counted_by),
                site_id: Set(site_id),
                order_id: Set(None),
                transfer_id: Set(None),
                reason: Set("Sync from physical count".to_string()),
                created_at: Set(now),
            };
            audit.insert(&txn).await?;
        }

        // The discrepancy rides the same transaction as the adjustment so
        // neither can land without the other.
        let opened = if percent >= self.variance_threshold {
            let discrepancy_id = Uuid::new_v4();
            let model = discrepancy::ActiveModel {
                id: Set(discrepancy_id),
                sku: Set(sku.to_string()),
                expected_quantity: Set(expected),
                actual_quantity: Set(actual_quantity),
                variance: Set(variance),
                variance_percent: Set(percent),
                bin_location: Set(bin_location.to_string()),
                site_id: Set(site_id),
                status: Set(DiscrepancyStatus::Open.as_str().to_string()),
                reported_by: Set(counted_by),
                reason: Set("Physical count variance".to_string()),
                order_id: Set(None),
                transfer_id: Set(None),
                investigated_by: Set(None),
                investigated_at: Set(None),
                investigation_notes: Set(None),
                root_cause: Set(None),
                resolved_by: Set(None),
                resolved_at: Set(None),
                resolution: Set(None),
                created_at: Set(now),
            };
            Some(model.insert(&txn).await?)
        } else {
            None
        };

        txn.commit().await?;

        if let Some(disc) = &opened {
            warn!(
                discrepancy_id = %disc.id,
                sku = sku,
                expected = expected,
                actual = actual_quantity,
                variance_percent = percent,
                "Discrepancy opened"
            );
            self.events
                .emit(Event::DiscrepancyOpened {
                    discrepancy_id: disc.id,
                    sku: sku.to_string(),
                    variance_percent: percent,
                })
                .await;
        }

        info!(
            sku = sku,
            bin = bin_location,
            adjustment = adjustment,
            "Inventory synced from count"
        );

        Ok(CountSyncOutcome {
            item: updated,
            adjustment,
            discrepancy: opened,
        })
    }

    /// Applies a signed quantity adjustment to one inventory row with its
    /// audit record. The counted reality may not drive availability below
    /// zero; reserved stock is untouched.
    async fn apply_adjustment(
        &self,
        sku: &str,
        bin_location: &str,
        site_id: Uuid,
        adjustment: i32,
        operator_id: Uuid,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let pair_mutex = self.key_mutexes.for_pair(sku, bin_location);
        let _guard = pair_mutex.lock().await;

        let now = self.clock.now();
        let db = self.db.as_ref();

        let item = InventoryItem::find()
            .filter(inventory_item::Column::Sku.eq(sku))
            .filter(inventory_item::Column::BinLocation.eq(bin_location))
            .filter(inventory_item::Column::SiteId.eq(site_id))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Inventory item {} at {} not found",
                    sku, bin_location
                ))
            })?;

        let new_available = item.quantity_available + adjustment;
        if new_available < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Adjustment of {} would drive availability of {} at {} below zero",
                adjustment, sku, bin_location
            )));
        }

        let txn = db.begin().await?;

        let mut active: inventory_item::ActiveModel = item.clone().into();
        active.quantity_total = Set(item.quantity_total + adjustment);
        active.quantity_available = Set(new_available);
        active.last_counted_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        let operation = if adjustment > 0 {
            "ADJUSTMENT_IN"
        } else {
            "ADJUSTMENT_OUT"
        };
        let audit = inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            quantity: Set(adjustment.abs()),
            bin_location: Set(bin_location.to_string()),
            operation_type: Set(operation.to_string()),
            operator_id: Set(operator_id),
            site_id: Set(site_id),
            order_id: Set(None),
            transfer_id: Set(None),
            reason: Set(reason.to_string()),
            created_at: Set(now),
        };
        audit.insert(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn find_discrepancy(
        &self,
        discrepancy_id: Uuid,
    ) -> Result<discrepancy::Model, ServiceError> {
        Discrepancy::find_by_id(discrepancy_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Discrepancy {} not found", discrepancy_id))
            })
    }
}

/// Variance as a fraction of the expected quantity. A zero expectation is
/// a perfect match when nothing was counted and a total mismatch otherwise.
fn variance_fraction(expected: i32, actual: i32) -> f64 {
    if expected == 0 {
        return if actual == 0 { 0.0 } else { 1.0 };
    }
    f64::from((expected - actual).abs()) / f64::from(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_fraction_is_relative_to_expectation() {
        assert_eq!(variance_fraction(100, 94), 0.06);
        assert_eq!(variance_fraction(100, 96), 0.04);
        assert_eq!(variance_fraction(50, 50), 0.0);
    }

    #[test]
    fn zero_expectation_edge_cases() {
        assert_eq!(variance_fraction(0, 0), 0.0);
        assert_eq!(variance_fraction(0, 7), 1.0);
    }
}
