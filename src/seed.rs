//! Bulk generation of orders and their status histories.
//!
//! Bulk inserts skip [`crate::events::StatusSignal`]; when the denormalized
//! column is wanted, the seeder writes each order's final status itself.

use chrono::Duration;
use metrics::counter;
use rand::{seq::SliceRandom, Rng};
use sea_orm::{ActiveValue::Set, EntityTrait};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    config::validate_seed_batch_size,
    db::DatabaseAccess,
    entities::{order, order_status, Status},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::now_micros,
};

/// Rows per INSERT statement; keeps bind parameters under every backend's limit.
const INSERT_CHUNK_ROWS: usize = 1000;

/// The valid histories a seeded order can have.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    /// Paid and fulfilled
    Completed,
    /// Payment failed
    PaymentFailed,
    /// Fulfilled, then refunded
    Refunded,
}

const LIFECYCLES: [Lifecycle; 3] = [
    Lifecycle::Completed,
    Lifecycle::PaymentFailed,
    Lifecycle::Refunded,
];

impl Lifecycle {
    pub fn statuses(&self) -> &'static [Status] {
        match self {
            Lifecycle::Completed => &[Status::Pending, Status::Complete],
            Lifecycle::PaymentFailed => &[Status::Pending, Status::Cancelled],
            Lifecycle::Refunded => &[Status::Pending, Status::Complete, Status::Cancelled],
        }
    }

    pub fn final_status(&self) -> Status {
        // every lifecycle has at least two statuses
        self.statuses()[self.statuses().len() - 1]
    }

    /// Uniform choice among the three lifecycles
    pub fn choose<R: Rng + ?Sized>(rng: &mut R) -> Lifecycle {
        *LIFECYCLES.choose(rng).unwrap_or(&Lifecycle::Completed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub count: u64,
    pub batch_size: usize,
    /// Also write `orders.status`
    pub denormalize: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub orders: u64,
    pub statuses: u64,
    pub batches: u64,
    pub lifecycles: BTreeMap<Lifecycle, u64>,
    pub elapsed_ms: f64,
}

impl SeedSummary {
    fn empty() -> Self {
        Self {
            orders: 0,
            statuses: 0,
            batches: 0,
            lifecycles: Lifecycle::iter().map(|l| (l, 0)).collect(),
            elapsed_ms: 0.0,
        }
    }
}

#[derive(Clone)]
pub struct Seeder {
    db: DatabaseAccess,
    event_sender: Option<EventSender>,
}

impl Seeder {
    pub fn new(db: DatabaseAccess) -> Self {
        Self {
            db,
            event_sender: None,
        }
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    /// Inserts `options.count` orders in transactions of at most
    /// `options.batch_size` orders. A failing batch aborts the run; batches
    /// committed before it stay.
    #[instrument(skip(self, rng))]
    pub async fn run<R: Rng + ?Sized>(
        &self,
        options: SeedOptions,
        rng: &mut R,
    ) -> Result<SeedSummary, ServiceError> {
        validate_seed_batch_size(options.batch_size)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let start = Instant::now();
        let mut summary = SeedSummary::empty();
        let mut remaining = options.count;

        while remaining > 0 {
            let size = remaining.min(options.batch_size as u64) as usize;
            let batch = build_batch(size, options.denormalize, rng);

            for lifecycle in &batch.lifecycles {
                *summary.lifecycles.entry(*lifecycle).or_insert(0) += 1;
            }
            let status_rows = batch.statuses.len() as u64;

            self.write_batch(batch).await?;

            summary.orders += size as u64;
            summary.statuses += status_rows;
            summary.batches += 1;
            remaining -= size as u64;

            counter!("order_status_lab_seed.orders", size as u64);
            counter!("order_status_lab_seed.statuses", status_rows);
            debug!(
                "Seed batch {} committed ({} orders, {} remaining)",
                summary.batches, size, remaining
            );
        }

        summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Seeded {} orders with {} status events in {} batches ({:.1} ms)",
            summary.orders, summary.statuses, summary.batches, summary.elapsed_ms
        );

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::OrdersSeeded {
                    orders: summary.orders,
                    statuses: summary.statuses,
                })
                .await;
        }

        Ok(summary)
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), ServiceError> {
        let Batch {
            orders, statuses, ..
        } = batch;

        self.db
            .transaction(move |txn| {
                Box::pin(async move {
                    for chunk in chunked(orders) {
                        order::Entity::insert_many(chunk)
                            .exec_without_returning(txn)
                            .await?;
                    }
                    for chunk in chunked(statuses) {
                        order_status::Entity::insert_many(chunk)
                            .exec_without_returning(txn)
                            .await?;
                    }
                    Ok::<_, ServiceError>(())
                })
            })
            .await
    }
}

/// Seeds without publishing events
pub async fn seed_orders<R: Rng + ?Sized>(
    db: &DatabaseAccess,
    options: SeedOptions,
    rng: &mut R,
) -> Result<SeedSummary, ServiceError> {
    Seeder::new(db.clone()).run(options, rng).await
}

struct Batch {
    orders: Vec<order::ActiveModel>,
    statuses: Vec<order_status::ActiveModel>,
    lifecycles: Vec<Lifecycle>,
}

fn build_batch<R: Rng + ?Sized>(size: usize, denormalize: bool, rng: &mut R) -> Batch {
    let created_at = now_micros();
    let mut orders = Vec::with_capacity(size);
    let mut statuses = Vec::with_capacity(size * 3);
    let mut lifecycles = Vec::with_capacity(size);

    for _ in 0..size {
        let lifecycle = Lifecycle::choose(rng);
        let order_id = Uuid::new_v4();

        orders.push(order::ActiveModel {
            id: Set(order_id),
            created_at: Set(created_at),
            status: Set(denormalize.then(|| lifecycle.final_status())),
        });

        // Strictly increasing per order, so the newest event is unambiguous
        for (step, status) in lifecycle.statuses().iter().enumerate() {
            statuses.push(order_status::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                status: Set(*status),
                created_at: Set(created_at + Duration::microseconds(step as i64)),
            });
        }
        lifecycles.push(lifecycle);
    }

    Batch {
        orders,
        statuses,
        lifecycles,
    }
}

fn chunked<T>(rows: Vec<T>) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(rows.len() / INSERT_CHUNK_ROWS + 1);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        chunks.push(rows.by_ref().take(INSERT_CHUNK_ROWS).collect());
    }
    chunks
}
