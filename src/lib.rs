//! Order Status Lab
//!
//! Compares SQL shapes for "orders whose latest status event is X", seeds
//! realistic status histories, and keeps an optional denormalized copy of the
//! latest status on each order.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod bench;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod queries;
pub mod reports;
pub mod seed;
pub mod services;
pub mod verify;

use std::sync::Arc;

/// Shared handles for the command line tools
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub orders: services::OrderService,
}

impl AppState {
    /// Wires the order service with the configured status receivers
    pub fn new(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let mut signal = events::StatusSignal::new();
        if config.denormalize_status {
            signal.connect(Arc::new(services::DenormalizeOrderStatus));
        }
        if !signal.is_empty() {
            tracing::info!("Status receivers connected: {:?}", signal);
        }
        let orders = services::OrderService::new(db.clone())
            .with_signal(signal)
            .with_event_sender(event_sender.clone());

        Self {
            db,
            config,
            event_sender,
            orders,
        }
    }

    pub fn access(&self) -> db::DatabaseAccess {
        db::DatabaseAccess::new(self.db.clone())
    }
}

pub mod prelude {
    pub use crate::bench::{run_benchmark, BenchOptions};
    pub use crate::db::*;
    pub use crate::entities::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::queries::*;
    pub use crate::reports::*;
    pub use crate::seed::{seed_orders, Lifecycle, SeedOptions, SeedSummary, Seeder};
    pub use crate::services::*;
    pub use crate::verify::verify_effective_status;
}
