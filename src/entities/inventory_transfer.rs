use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Approved,
    InTransit,
    ReceivedWithDiscrepancy,
    Completed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::InTransit => "IN_TRANSIT",
            TransferStatus::ReceivedWithDiscrepancy => "RECEIVED_WITH_DISCREPANCY",
            TransferStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransferStatus::Pending),
            "APPROVED" => Some(TransferStatus::Approved),
            "IN_TRANSIT" => Some(TransferStatus::InTransit),
            "RECEIVED_WITH_DISCREPANCY" => Some(TransferStatus::ReceivedWithDiscrepancy),
            "COMPLETED" => Some(TransferStatus::Completed),
            _ => None,
        }
    }
}

/// A cross-site move of one SKU. Created with a source-side stock lock;
/// shipping commits that lock (the actual source deduction); receipt
/// credits the destination and may open a discrepancy.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_transfers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub quantity: i32,
    pub from_site_id: Uuid,
    pub to_site_id: Uuid,
    pub status: String,
    pub lock_id: Uuid,
    pub requested_by: Uuid,
    pub reason: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_by: Option<Uuid>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub received_by: Option<Uuid>,
    pub received_at: Option<DateTime<Utc>>,
    pub actual_quantity: Option<i32>,
    pub discrepancy_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
