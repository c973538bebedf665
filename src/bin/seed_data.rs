//! Seed data script - populates the database with orders and status histories
//!
//! Run with: cargo run --bin seed-data -- 100000
//!
//! Every order gets one of three lifecycles, chosen uniformly:
//! - pending -> complete
//! - pending -> cancelled
//! - pending -> complete -> cancelled

use anyhow::{bail, Context};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use tracing::info;

use order_status_lab::{
    config, db,
    db::DatabaseAccess,
    seed::{SeedOptions, Seeder},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let count: u64 = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("COUNT must be a non-negative integer, got '{}'", arg))?,
        None => bail!("usage: seed-data <COUNT>"),
    };

    let cfg =
        config::load_config_with_bootstrap_logging().context("failed to load application config")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("=== Order Status Lab Seed Data ===");
    info!("Connecting to database: {}", cfg.database_url());
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    let options = SeedOptions {
        count,
        batch_size: cfg.seed_batch_size,
        denormalize: cfg.denormalize_status,
    };
    let pool = Arc::new(pool);
    let summary = Seeder::new(DatabaseAccess::new(pool.clone()))
        .run(options, &mut StdRng::from_entropy())
        .await
        .context("seeding failed")?;

    info!(
        "Created {} orders with {} status events",
        summary.orders, summary.statuses
    );
    for (lifecycle, orders) in &summary.lifecycles {
        info!("  {}: {}", lifecycle, orders);
    }
    info!("=== Seed Data Complete ({:.1} ms) ===", summary.elapsed_ms);

    if let Ok(pool) = Arc::try_unwrap(pool) {
        db::close_pool(pool).await.context("failed to close database pool")?;
    }

    Ok(())
}
