use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow status of a discrepancy. OPEN discrepancies must be
/// investigated before they can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl DiscrepancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyStatus::Open => "OPEN",
            DiscrepancyStatus::Investigating => "INVESTIGATING",
            DiscrepancyStatus::Resolved => "RESOLVED",
            DiscrepancyStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(DiscrepancyStatus::Open),
            "INVESTIGATING" => Some(DiscrepancyStatus::Investigating),
            "RESOLVED" => Some(DiscrepancyStatus::Resolved),
            "CLOSED" => Some(DiscrepancyStatus::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscrepancyStatus::Resolved | DiscrepancyStatus::Closed)
    }
}

/// A threshold-gated mismatch between expected and counted quantity.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discrepancies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub expected_quantity: i32,
    pub actual_quantity: i32,
    pub variance: i32,
    pub variance_percent: f64,
    pub bin_location: String,
    pub site_id: Uuid,
    pub status: String,
    pub reported_by: Uuid,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
    pub investigated_by: Option<Uuid>,
    pub investigated_at: Option<DateTime<Utc>>,
    pub investigation_notes: Option<String>,
    pub root_cause: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
