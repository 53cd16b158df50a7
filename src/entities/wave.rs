use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveStatus {
    Pending,
    Released,
    InProgress,
    Completed,
    Cancelled,
}

impl WaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveStatus::Pending => "PENDING",
            WaveStatus::Released => "RELEASED",
            WaveStatus::InProgress => "IN_PROGRESS",
            WaveStatus::Completed => "COMPLETED",
            WaveStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WaveStatus::Pending),
            "RELEASED" => Some(WaveStatus::Released),
            "IN_PROGRESS" => Some(WaveStatus::InProgress),
            "COMPLETED" => Some(WaveStatus::Completed),
            "CANCELLED" => Some(WaveStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses that keep member orders committed to the wave.
    pub fn active() -> [&'static str; 3] {
        ["PENDING", "RELEASED", "IN_PROGRESS"]
    }
}

/// A criteria-selected group of orders released together. Release reserves
/// inventory across every member order atomically.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "waves")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub status: String,
    pub courier: Option<String>,
    pub priority: Option<String>,
    pub cutoff_time: Option<DateTime<Utc>>,
    pub total_orders: i32,
    pub total_items: i32,
    pub batches_count: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<Uuid>,
    pub batched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wave_order::Entity")]
    WaveOrders,
}

impl Related<super::wave_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WaveOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
