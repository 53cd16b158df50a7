//! sea-orm entities for the fulfillment core.
//!
//! Statuses are stored as strings with enum companions providing
//! `as_str`/`from_str`, so the database stays portable across backends.

pub mod batch;
pub mod batch_order;
pub mod discrepancy;
pub mod inventory_item;
pub mod inventory_transaction;
pub mod inventory_transfer;
pub mod order;
pub mod order_item;
pub mod site;
pub mod stock_lock;
pub mod stock_take;
pub mod stock_take_item;
pub mod wave;
pub mod wave_order;
