use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a stock lock. A lock leaves `Locked` exactly once, into
/// `Committed` (quantities deducted) or `Released`/`Expired` (quantities
/// untouched). There is no transition out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Locked,
    Committed,
    Released,
    Expired,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "LOCKED",
            LockStatus::Committed => "COMMITTED",
            LockStatus::Released => "RELEASED",
            LockStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LOCKED" => Some(LockStatus::Locked),
            "COMMITTED" => Some(LockStatus::Committed),
            "RELEASED" => Some(LockStatus::Released),
            "EXPIRED" => Some(LockStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockStatus::Locked)
    }
}

/// Kind of operation a lock was taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Pick,
    TransferOut,
    OrderPick,
    Adjustment,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Pick => "PICK",
            OperationType::TransferOut => "TRANSFER_OUT",
            OperationType::OrderPick => "ORDER_PICK",
            OperationType::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PICK" => Some(OperationType::Pick),
            "TRANSFER_OUT" => Some(OperationType::TransferOut),
            "ORDER_PICK" => Some(OperationType::OrderPick),
            "ADJUSTMENT" => Some(OperationType::Adjustment),
            _ => None,
        }
    }
}

/// A time-bounded reservation against one (sku, bin) pair. Holds
/// availability without deducting it until committed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub bin_location: String,
    pub quantity: i32,
    pub operation_type: String,
    pub status: String,
    pub operator_id: Uuid,
    pub order_id: Option<Uuid>,
    pub transfer_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
