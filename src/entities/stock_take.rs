use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTakeType {
    CycleCount,
    FullCount,
}

impl StockTakeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockTakeType::CycleCount => "CYCLE_COUNT",
            StockTakeType::FullCount => "FULL_COUNT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CYCLE_COUNT" => Some(StockTakeType::CycleCount),
            "FULL_COUNT" => Some(StockTakeType::FullCount),
            _ => None,
        }
    }
}

/// A planned re-count of selected (sku, bin) pairs at one site.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_takes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub site_id: Uuid,
    pub status: String,
    pub take_type: String,
    pub reason: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_take_item::Entity")]
    Items,
}

impl Related<super::stock_take_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
