use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use order_status_lab::{
    bench::{run_benchmark, BenchOptions},
    config,
    db,
    entities::{OrderModel, OrderStatusModel, Status},
    errors::ServiceError,
    events::{self, Event},
    queries::Strategy,
    seed::{SeedOptions, Seeder},
    services::{backfill_order_status, count_drift},
    verify::verify_effective_status,
    AppState,
};

#[derive(Parser)]
#[command(
    name = "order-status-lab",
    about = "Compare latest-status query strategies, seed data and maintain denormalized status",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(long, global = true, help = "Overrides the configured database URL")]
    database_url: Option<String>,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Keep orders.status in sync on every appended status"
    )]
    denormalize: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations
    Migrate,
    /// Bulk-insert orders with random valid status histories
    Seed(SeedArgs),
    /// Time each query strategy
    Bench(BenchArgs),
    /// Print the SQL of each strategy for the connected backend
    Sql(SqlArgs),
    /// Check every strategy against effective statuses computed in memory
    Verify(VerifyArgs),
    /// Write every order's latest status onto orders.status
    Backfill,
    #[command(subcommand)]
    Order(OrderCommands),
}

#[derive(Args)]
struct SeedArgs {
    #[arg(help = "Number of orders to create")]
    count: u64,
    #[arg(long, help = "Orders per transaction (defaults to config)")]
    batch_size: Option<usize>,
    #[arg(long, help = "Seed for the random lifecycle choice")]
    rng_seed: Option<u64>,
}

#[derive(Args)]
struct BenchArgs {
    #[arg(long = "strategy", help = "Strategy to run; repeatable (defaults to the event strategies)")]
    strategies: Vec<Strategy>,
    #[arg(long, default_value_t = Status::Cancelled)]
    status: Status,
    #[arg(long, help = "Measured runs per strategy (defaults to config)")]
    iterations: Option<usize>,
    #[arg(long, help = "Unmeasured runs per strategy (defaults to config)")]
    warmup: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue, help = "Capture execution plans")]
    explain: bool,
}

#[derive(Args)]
struct SqlArgs {
    #[arg(long = "strategy", help = "Strategy to print; repeatable (defaults to all)")]
    strategies: Vec<Strategy>,
    #[arg(long, default_value_t = Status::Cancelled)]
    status: Status,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long, default_value_t = Status::Cancelled)]
    status: Status,
    #[arg(long, action = ArgAction::SetTrue, help = "Also check orders.status")]
    check_denormalized: bool,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Create an order with its initial pending status
    Create,
    /// Append a status to an order's history
    Append {
        #[arg(value_parser = clap::value_parser!(Uuid))]
        id: Uuid,
        status: Status,
    },
    /// Show an order with its status history
    Show {
        #[arg(value_parser = clap::value_parser!(Uuid))]
        id: Uuid,
    },
    /// Delete an order and its status history
    Delete {
        #[arg(value_parser = clap::value_parser!(Uuid))]
        id: Uuid,
    },
}

#[derive(Serialize)]
struct StatementOutput {
    strategy: Strategy,
    exact: bool,
    sql: String,
}

#[derive(Serialize)]
struct OrderOutput {
    order: OrderModel,
    effective_status: Option<Status>,
    history: Vec<OrderStatusModel>,
}

#[derive(Serialize)]
struct BackfillOutput {
    updated: u64,
    drift: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg =
        config::load_config_with_bootstrap_logging().context("failed to load application config")?;
    if let Some(url) = cli.database_url.clone() {
        cfg.database_url = url;
    }
    if cli.denormalize {
        cfg.denormalize_status = true;
    }
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    db::check_connection(&pool)
        .await
        .context("database is not reachable")?;

    let (event_sender, event_rx) = events::channel(cfg.event_channel_capacity);
    let processor = tokio::spawn(events::process_events(event_rx));

    let state = AppState::new(Arc::new(pool), cfg, event_sender);
    let json = cli.json;
    let outcome = run(&state, cli.command, json).await;

    if let Err(err) = &outcome {
        if let (true, Some(service_err)) = (json, err.downcast_ref::<ServiceError>()) {
            print_json(&json!({
                "error": service_err.code(),
                "message": format!("{:#}", err),
            }))?;
        }
    }

    // Dropping the last sender lets the processor drain and stop
    let pool = state.db.clone();
    drop(state);
    let processed = processor.await.context("event processor panicked")?;
    debug!("Processed {} events", processed);

    match Arc::try_unwrap(pool) {
        Ok(pool) => db::close_pool(pool)
            .await
            .context("failed to close database pool")?,
        Err(_) => debug!("Database pool still shared at exit; leaving it to drop"),
    }

    outcome
}

async fn run(state: &AppState, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Migrate => {
            db::run_migrations(&state.db)
                .await
                .context("failed to run migrations")?;
            println!("migrations applied");
        }
        Commands::Seed(args) => handle_seed(state, args, json).await?,
        Commands::Bench(args) => handle_bench(state, args, json).await?,
        Commands::Sql(args) => handle_sql(state, args, json)?,
        Commands::Verify(args) => handle_verify(state, args, json).await?,
        Commands::Backfill => handle_backfill(state, json).await?,
        Commands::Order(command) => handle_order_command(state, command, json).await?,
    }
    Ok(())
}

async fn handle_seed(state: &AppState, args: SeedArgs, json: bool) -> Result<()> {
    let options = SeedOptions {
        count: args.count,
        batch_size: args.batch_size.unwrap_or(state.config.seed_batch_size),
        denormalize: state.config.denormalize_status,
    };
    let mut rng = match args.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let summary = Seeder::new(state.access())
        .with_event_sender(state.event_sender.clone())
        .run(options, &mut rng)
        .await
        .context("seeding failed")?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "seeded {} orders with {} status events in {} batches ({:.1} ms)",
            summary.orders, summary.statuses, summary.batches, summary.elapsed_ms
        );
        for (lifecycle, count) in &summary.lifecycles {
            println!("  {:<15} {}", lifecycle.to_string(), count);
        }
    }
    Ok(())
}

async fn handle_bench(state: &AppState, args: BenchArgs, json: bool) -> Result<()> {
    let options = BenchOptions {
        strategies: if args.strategies.is_empty() {
            Strategy::event_strategies()
        } else {
            args.strategies
        },
        status: args.status,
        iterations: args
            .iterations
            .unwrap_or(state.config.bench_iterations as usize),
        warmup: args.warmup.unwrap_or(state.config.bench_warmup as usize),
        explain: args.explain,
    };

    let report = run_benchmark(&state.access(), &options)
        .await
        .context("benchmark failed")?;

    if json {
        print_json(&report)?;
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn handle_sql(state: &AppState, args: SqlArgs, json: bool) -> Result<()> {
    let backend = sea_orm::ConnectionTrait::get_database_backend(&*state.db);
    let strategies = if args.strategies.is_empty() {
        Strategy::all()
    } else {
        args.strategies
    };

    let statements: Vec<StatementOutput> = strategies
        .into_iter()
        .map(|strategy| StatementOutput {
            strategy,
            exact: strategy.is_exact_for(args.status),
            sql: strategy.sql(backend, args.status),
        })
        .collect();

    if json {
        print_json(&statements)?;
    } else {
        for statement in &statements {
            println!(
                "-- {} ({})",
                statement.strategy,
                statement.strategy.description()
            );
            if !statement.exact {
                println!("-- answers \"ever in '{}'\", not \"currently in\"", args.status);
            }
            println!("{};\n", statement.sql);
        }
    }
    Ok(())
}

async fn handle_verify(state: &AppState, args: VerifyArgs, json: bool) -> Result<()> {
    let report = verify_effective_status(&state.access(), args.status, args.check_denormalized)
        .await
        .context("verification failed to run")?;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", report);
    }

    if !report.passed() {
        bail!("verification found mismatches");
    }
    Ok(())
}

async fn handle_backfill(state: &AppState, json: bool) -> Result<()> {
    let updated = backfill_order_status(&*state.db)
        .await
        .context("backfill failed")?;
    let drift = count_drift(&*state.db)
        .await
        .context("failed to count drift")?;
    let _ = state
        .event_sender
        .send(Event::OrderStatusBackfilled { updated })
        .await;

    if json {
        print_json(&BackfillOutput { updated, drift })?;
    } else {
        println!("backfilled {} orders, {} still drifting", updated, drift);
    }
    Ok(())
}

async fn handle_order_command(state: &AppState, command: OrderCommands, json: bool) -> Result<()> {
    let service = &state.orders;
    match command {
        OrderCommands::Create => {
            let order = service
                .create_order()
                .await
                .context("failed to create order")?;
            info!("Created order {}", order.id);
            if json {
                print_json(&order)?;
            } else {
                println!("{}", order.id);
            }
        }
        OrderCommands::Append { id, status } => {
            let event = service
                .append_status(id, status)
                .await
                .with_context(|| format!("failed to append '{}' to order {}", status, id))?;
            if json {
                print_json(&event)?;
            } else {
                println!("{} {} at {}", event.order_id, event.status, event.created_at);
            }
        }
        OrderCommands::Show { id } => {
            let order = service
                .get_order(id)
                .await
                .with_context(|| format!("failed to load order {}", id))?;
            let history = service
                .history(id)
                .await
                .with_context(|| format!("failed to load history of order {}", id))?;
            let output = OrderOutput {
                effective_status: history.last().map(|e| e.status),
                order,
                history,
            };
            if json {
                print_json(&output)?;
            } else {
                render_order(&output);
            }
        }
        OrderCommands::Delete { id } => {
            service
                .delete_order(id)
                .await
                .with_context(|| format!("failed to delete order {}", id))?;
            println!("deleted {}", id);
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_order(output: &OrderOutput) {
    let stored = output
        .order
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let effective = output
        .effective_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "Order {} • created {} • effective {} • stored {}",
        output.order.id, output.order.created_at, effective, stored
    );
    for event in &output.history {
        println!("  {}  {}", event.created_at, event.status);
    }
}
