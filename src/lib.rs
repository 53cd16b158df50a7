//! Warehouse fulfillment core.
//!
//! Coordinates physical-warehouse fulfillment: the stock-lock reservation
//! ledger (the sole gateway to mutating on-hand quantities), wave and batch
//! orchestration across many orders, cross-site transfers, discrepancy
//! reconciliation, and pick-path optimization.
//!
//! HTTP surfaces, auth, and reporting live in consuming services; this crate
//! exposes plain async operations over a sea-orm connection.

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod pick_path;
pub mod services;

/// Initializes the global tracing subscriber with an env-filter. The
/// `RUST_LOG` variable wins over the configured level. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::AppConfig;
    pub use crate::errors::{LockReleaseOutcome, ServiceError};
    pub use crate::events::{Event, EventSender};
    pub use crate::pick_path::WarehouseLayout;
    pub use crate::services::batching::BatchPickingService;
    pub use crate::services::discrepancies::DiscrepancyService;
    pub use crate::services::stock_locks::{ReserveRequest, StockLockService};
    pub use crate::services::transfers::TransferService;
    pub use crate::services::waves::WaveService;
}
