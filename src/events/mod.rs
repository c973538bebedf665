use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::Status;

pub mod signals;

pub use signals::{StatusReceiver, StatusSignal};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Things that happened to orders and their status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderDeleted(Uuid),
    OrderStatusRecorded {
        order_id: Uuid,
        status: Status,
        recorded_at: DateTime<Utc>,
    },
    OrdersSeeded {
        orders: u64,
        statuses: u64,
    },
    OrderStatusBackfilled {
        updated: u64,
    },
}

// Drains the channel, logging each event. Returns how many events were seen
// once every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) -> u64 {
    debug!("Starting event processing loop");
    let mut processed = 0;

    while let Some(event) = rx.recv().await {
        processed += 1;
        match event {
            Event::OrderCreated(order_id) => {
                debug!("Order created: {}", order_id);
            }
            Event::OrderDeleted(order_id) => {
                info!("Order deleted with its status history: {}", order_id);
            }
            Event::OrderStatusRecorded {
                order_id,
                status,
                recorded_at,
            } => {
                debug!(
                    "Order {} moved to '{}' at {}",
                    order_id, status, recorded_at
                );
                if status == Status::Cancelled {
                    info!("Order cancelled: {}", order_id);
                }
            }
            Event::OrdersSeeded { orders, statuses } => {
                info!("Seeded {} orders with {} status events", orders, statuses);
            }
            Event::OrderStatusBackfilled { updated } => {
                info!("Backfilled denormalized status on {} orders", updated);
            }
        }
    }

    debug!("Event processing loop has ended");
    processed
}
