use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Domain events emitted by the services after their durable writes land.
///
/// Consumers (webhooks, dashboards, outbox relays) live outside this crate;
/// delivery failure is logged and never fails the originating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Reservation ledger
    StockReserved {
        lock_id: Uuid,
        sku: String,
        bin_location: String,
        quantity: i32,
    },
    StockCommitted {
        lock_id: Uuid,
        sku: String,
        quantity: i32,
    },
    StockLockReleased {
        lock_id: Uuid,
        reason: String,
    },
    LocksExpired {
        count: u64,
    },

    // Wave orchestration
    WaveCreated {
        wave_id: Uuid,
        total_orders: i32,
        total_items: i32,
    },
    WaveReleased {
        wave_id: Uuid,
        locks_acquired: usize,
    },
    WaveBatched {
        wave_id: Uuid,
        batches_count: i32,
    },
    WaveCompleted(Uuid),
    WaveCancelled {
        wave_id: Uuid,
        locks_released: usize,
    },

    // Batch picking
    BatchesCreated {
        batch_count: usize,
        total_orders: usize,
    },
    BatchStarted {
        batch_id: Uuid,
        picker_id: Uuid,
    },
    BatchCompleted(Uuid),
    BatchCancelled {
        batch_id: Uuid,
        locks_released: usize,
    },

    // Transfers
    TransferCreated {
        transfer_id: Uuid,
        sku: String,
        quantity: i32,
    },
    TransferApproved(Uuid),
    TransferShipped {
        transfer_id: Uuid,
        tracking_number: String,
    },
    TransferReceived {
        transfer_id: Uuid,
        actual_quantity: i32,
        with_discrepancy: bool,
    },

    // Reconciliation
    DiscrepancyOpened {
        discrepancy_id: Uuid,
        sku: String,
        variance_percent: f64,
    },
    DiscrepancyResolved {
        discrepancy_id: Uuid,
        adjusted: bool,
    },
    CycleCountGenerated {
        stock_take_id: Uuid,
        item_count: usize,
    },
}

/// Cloneable handle for emitting events from services.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Emit without surfacing channel errors to the caller. Used after a
    /// durable write has already succeeded: the operation outcome must not
    /// depend on the event channel.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropped domain event");
        }
    }
}

/// Builds an event channel with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Deployments that fan events
/// out to external consumers replace this loop with their own.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::LocksExpired { count } if *count > 0 => {
                info!(count = count, "Expired stock locks swept");
            }
            Event::DiscrepancyOpened {
                discrepancy_id,
                sku,
                variance_percent,
            } => {
                info!(
                    discrepancy_id = %discrepancy_id,
                    sku = %sku,
                    variance_percent = variance_percent,
                    "Discrepancy opened"
                );
            }
            other => debug!(event = ?other, "Domain event"),
        }
    }
}
