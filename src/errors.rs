use sea_orm::error::DbErr;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Error type shared by every service in the crate.
///
/// Validation and precondition failures are returned to the immediate caller
/// and never retried internally. Callers that own the operation (pick flows,
/// transfer controllers) decide whether a storage-transient failure is worth
/// retrying; the services themselves do not.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Insufficient stock: {sku} at {bin_location} (available {available}, requested {requested})")]
    InsufficientStock {
        sku: String,
        bin_location: String,
        available: i32,
        requested: i32,
    },

    #[error("Stock lock {0} not found")]
    LockNotFound(Uuid),

    #[error("Stock lock {lock_id} is {status}, expected LOCKED")]
    InvalidLockState { lock_id: Uuid, status: String },

    #[error("Stock lock {0} expired before commit")]
    LockExpired(Uuid),

    #[error("Cutoff time must be in the future")]
    InvalidCutoff,

    #[error("No orders match wave criteria")]
    NoMatchingOrders,

    #[error("Cannot transfer between different companies (from site {from_site_id}, to site {to_site_id})")]
    CrossCompanyTransfer {
        from_site_id: Uuid,
        to_site_id: Uuid,
    },

    #[error("Invalid source or destination site: {0}")]
    InvalidSite(Uuid),

    #[error("Discrepancy {discrepancy_id} is {status}, operation not allowed")]
    DiscrepancyState {
        discrepancy_id: Uuid,
        status: String,
    },

    #[error("Malformed bin location: {0}")]
    MalformedBinLocation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Helper for mapping `DbErr` in closures without pulling in `From`.
    pub fn db_error(err: DbErr) -> Self {
        ServiceError::DatabaseError(err)
    }

    /// Stable machine-readable code for callers that map errors onto a
    /// wire protocol. The core never formats user-facing text beyond the
    /// `Display` impl above.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            ServiceError::LockNotFound(_) => "LOCK_NOT_FOUND",
            ServiceError::InvalidLockState { .. } => "INVALID_LOCK_STATE",
            ServiceError::LockExpired(_) => "LOCK_EXPIRED",
            ServiceError::InvalidCutoff => "INVALID_CUTOFF",
            ServiceError::NoMatchingOrders => "NO_MATCHING_ORDERS",
            ServiceError::CrossCompanyTransfer { .. } => "CROSS_COMPANY_TRANSFER",
            ServiceError::InvalidSite(_) => "INVALID_SITE",
            ServiceError::DiscrepancyState { .. } => "DISCREPANCY_STATE",
            ServiceError::MalformedBinLocation(_) => "MALFORMED_BIN_LOCATION",
            ServiceError::InvalidStatus(_) => "INVALID_STATUS",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::ValidationError(_) => "VALIDATION_ERROR",
            ServiceError::DatabaseError(_) => "DATABASE_ERROR",
            ServiceError::EventError(_) => "EVENT_ERROR",
            ServiceError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Outcome of one release attempt inside a best-effort compensation sweep.
///
/// Cancellation paths (wave cancel, batch cancel, wave release rollback)
/// attempt every release independently and report results as a list rather
/// than aborting on the first failure.
#[derive(Debug, Clone, Serialize)]
pub struct LockReleaseOutcome {
    pub lock_id: Uuid,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LockReleaseOutcome {
    pub fn ok(lock_id: Uuid) -> Self {
        Self {
            lock_id,
            released: true,
            error: None,
        }
    }

    pub fn failed(lock_id: Uuid, err: &ServiceError) -> Self {
        Self {
            lock_id,
            released: false,
            error: Some(err.to_string()),
        }
    }
}
