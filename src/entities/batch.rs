use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::InProgress => "IN_PROGRESS",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BatchStatus::Pending),
            "IN_PROGRESS" => Some(BatchStatus::InProgress),
            "COMPLETED" => Some(BatchStatus::Completed),
            "CANCELLED" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }
}

/// A bounded group of orders assigned to one picker. `zones` holds the
/// distinct bin-zone prefixes touched by the batch, as a JSON array.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub site_id: Uuid,
    pub status: String,
    pub priority: String,
    pub courier: Option<String>,
    pub total_orders: i32,
    pub total_items: i32,
    #[sea_orm(column_type = "Json")]
    pub zones: Json,
    pub picker_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::batch_order::Entity")]
    BatchOrders,
}

impl Related<super::batch_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
