use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order fulfillment status as seen by the orchestrators. `Confirmed`
/// orders are fulfillable; waves move them to `Allotted`, batches through
/// `Picking` to `Packed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Confirmed,
    Allotted,
    Picking,
    Packed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Allotted => "ALLOTTED",
            OrderStatus::Picking => "PICKING",
            OrderStatus::Packed => "PACKED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "ALLOTTED" => Some(OrderStatus::Allotted),
            "PICKING" => Some(OrderStatus::Picking),
            "PACKED" => Some(OrderStatus::Packed),
            _ => None,
        }
    }
}

/// Order priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPriority {
    Urgent,
    Overnight,
    Normal,
    Low,
}

impl OrderPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPriority::Urgent => "URGENT",
            OrderPriority::Overnight => "OVERNIGHT",
            OrderPriority::Normal => "NORMAL",
            OrderPriority::Low => "LOW",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "URGENT" => Some(OrderPriority::Urgent),
            "OVERNIGHT" => Some(OrderPriority::Overnight),
            "NORMAL" => Some(OrderPriority::Normal),
            "LOW" => Some(OrderPriority::Low),
            _ => None,
        }
    }

    /// Sort rank, 0 = most urgent. Unknown strings sort last.
    pub fn rank(s: &str) -> usize {
        match Self::from_str(s) {
            Some(OrderPriority::Urgent) => 0,
            Some(OrderPriority::Overnight) => 1,
            Some(OrderPriority::Normal) => 2,
            Some(OrderPriority::Low) => 3,
            None => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub site_id: Uuid,
    pub status: String,
    pub priority: String,
    pub courier: Option<String>,
    pub picked_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
