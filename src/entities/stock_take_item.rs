use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (sku, bin) pair scheduled for counting. Expected quantity is filled
/// in when counting starts.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_take_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub stock_take_id: Uuid,
    pub sku: String,
    pub bin_location: String,
    pub expected_quantity: i32,
    pub actual_quantity: i32,
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_take::Entity",
        from = "Column::StockTakeId",
        to = "super::stock_take::Column::Id"
    )]
    StockTake,
}

impl Related<super::stock_take::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockTake.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
