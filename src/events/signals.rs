//! Synchronous receivers fired right after a status event is inserted.
//!
//! Unlike [`super::Event`], which is queued and logged later, receivers run
//! inline in the inserting transaction: if one fails, the insert is rolled
//! back with it.

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::entities::order_status;
use crate::errors::ServiceError;

#[async_trait]
pub trait StatusReceiver: Send + Sync {
    /// Used in logs
    fn name(&self) -> &'static str;

    async fn on_status_created(
        &self,
        txn: &DatabaseTransaction,
        event: &order_status::Model,
    ) -> Result<(), ServiceError>;
}

/// Ordered list of receivers for "status event created".
#[derive(Clone, Default)]
pub struct StatusSignal {
    receivers: Vec<Arc<dyn StatusReceiver>>,
}

impl fmt::Debug for StatusSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.receivers.iter().map(|r| r.name()))
            .finish()
    }
}

impl StatusSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a receiver; receivers run in registration order. A second
    /// receiver with an already connected name is ignored.
    pub fn connect(&mut self, receiver: Arc<dyn StatusReceiver>) {
        if self.is_connected(receiver.name()) {
            warn!("Status receiver '{}' is already connected", receiver.name());
            return;
        }
        debug!("Connecting status receiver '{}'", receiver.name());
        self.receivers.push(receiver);
    }

    pub fn with(mut self, receiver: Arc<dyn StatusReceiver>) -> Self {
        self.connect(receiver);
        self
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.receivers.iter().any(|r| r.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Runs every receiver in order, stopping at the first error.
    pub async fn send(
        &self,
        txn: &DatabaseTransaction,
        event: &order_status::Model,
    ) -> Result<(), ServiceError> {
        for receiver in &self.receivers {
            receiver.on_status_created(txn, event).await.map_err(|e| {
                error!(
                    "Status receiver '{}' failed for order {}: {}",
                    receiver.name(),
                    event.order_id,
                    e
                );
                e
            })?;
        }
        Ok(())
    }
}
