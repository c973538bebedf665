//! Times each strategy against the connected database.

use metrics::histogram;
use sea_orm::{EntityTrait, PaginatorTrait};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::{backend_name, DatabaseAccess},
    entities::{order, order_status, Status},
    errors::ServiceError,
    queries::{explain, fetch_ids, Strategy},
    reports::{BenchmarkReport, LatencyStats, StrategyResult},
};

#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub strategies: Vec<Strategy>,
    pub status: Status,
    pub iterations: usize,
    pub warmup: usize,
    /// Capture the execution plan of every strategy
    pub explain: bool,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            strategies: Strategy::event_strategies(),
            status: Status::Cancelled,
            iterations: 5,
            warmup: 1,
            explain: false,
        }
    }
}

#[instrument(skip(db, options), fields(status = %options.status))]
pub async fn run_benchmark(
    db: &DatabaseAccess,
    options: &BenchOptions,
) -> Result<BenchmarkReport, ServiceError> {
    if options.iterations == 0 {
        return Err(ServiceError::ValidationError(
            "iterations must be at least 1".to_string(),
        ));
    }
    if options.strategies.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one strategy is required".to_string(),
        ));
    }

    let pool = db.get_pool();
    let orders = db
        .execute("bench:count_orders", order::Entity::find().count(pool))
        .await?;
    let status_events = db
        .execute(
            "bench:count_statuses",
            order_status::Entity::find().count(pool),
        )
        .await?;

    info!(
        "Benchmarking {} strategies over {} orders ({} warmup, {} measured)",
        options.strategies.len(),
        orders,
        options.warmup,
        options.iterations
    );

    let mut results = Vec::with_capacity(options.strategies.len());
    let mut exact_ids: Vec<(Strategy, Vec<Uuid>)> = Vec::new();

    for &strategy in &options.strategies {
        for _ in 0..options.warmup {
            fetch_ids(pool, strategy, options.status).await?;
        }

        let mut latencies_us = Vec::with_capacity(options.iterations);
        let mut ids = Vec::new();
        for _ in 0..options.iterations {
            let start = Instant::now();
            ids = fetch_ids(pool, strategy, options.status).await?;
            let elapsed = start.elapsed();
            histogram!("order_status_lab_bench.query.duration", elapsed, "strategy" => strategy.to_string());
            latencies_us.push(elapsed.as_micros());
        }

        let plan = if options.explain {
            explain(pool, strategy, options.status).await?
        } else {
            Vec::new()
        };

        let exact = strategy.is_exact_for(options.status);
        let latency = LatencyStats::from_micros(&latencies_us);
        debug!(
            "{}: {} rows, mean {:?} ms",
            strategy,
            ids.len(),
            latency.as_ref().map(|l| l.mean_ms)
        );

        results.push(StrategyResult {
            strategy,
            description: strategy.description().to_string(),
            exact,
            rows: ids.len(),
            latency,
            plan,
        });
        if exact {
            exact_ids.push((strategy, ids));
        }
    }

    let consistent = match exact_ids.split_first() {
        Some(((reference, expected), rest)) => rest.iter().all(|(strategy, ids)| {
            let same = ids == expected;
            if !same {
                warn!(
                    "{} returned {} orders, {} returned {}",
                    strategy,
                    ids.len(),
                    reference,
                    expected.len()
                );
            }
            same
        }),
        None => true,
    };

    Ok(BenchmarkReport {
        backend: backend_name(pool).to_string(),
        status: options.status,
        orders,
        status_events,
        iterations: options.iterations,
        warmup: options.warmup,
        results,
        consistent,
    })
}
