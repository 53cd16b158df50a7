use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryStatus {
    Normal,
    Blocked,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Normal => "NORMAL",
            InventoryStatus::Blocked => "BLOCKED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NORMAL" => Some(InventoryStatus::Normal),
            "BLOCKED" => Some(InventoryStatus::Blocked),
            _ => None,
        }
    }
}

/// On-hand inventory for one SKU at one bin at one site.
///
/// At every committed state `quantity_total == quantity_available +
/// quantity_reserved` and `quantity_available >= 0`. Rows are created on
/// first receipt/count and never deleted, only zeroed. The only writers of
/// the quantity columns are the reservation ledger's commit path and the
/// discrepancy reconciler's adjustment path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub bin_location: String,
    pub site_id: Uuid,
    pub quantity_total: i32,
    pub quantity_available: i32,
    pub quantity_reserved: i32,
    pub status: String,
    pub last_counted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::site::Entity",
        from = "Column::SiteId",
        to = "super::site::Column::Id"
    )]
    Site,
}

impl Related<super::site::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Site.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
