//! Service layer: one constructor-injected service per component.

pub mod batching;
pub mod discrepancies;
pub mod stock_locks;
pub mod transfers;
pub mod waves;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-(sku, bin_location) serialization points.
///
/// The ledger's read-then-decide-then-write sequences must be serialized per
/// inventory pair or two concurrent reservations can both observe stale
/// availability and oversubscribe the same units. Storage backends with
/// row-level locking could carry this instead; the in-process registry keeps
/// the guarantee independent of backend isolation level.
#[derive(Clone, Default)]
pub struct KeyedMutexes {
    inner: Arc<DashMap<(String, String), Arc<Mutex<()>>>>,
}

impl KeyedMutexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding one (sku, bin_location) pair, creating it
    /// on first use. Entries are never removed; the key space is bounded by
    /// the physical bin count.
    pub fn for_pair(&self, sku: &str, bin_location: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry((sku.to_string(), bin_location.to_string()))
            .or_default()
            .clone()
    }
}
