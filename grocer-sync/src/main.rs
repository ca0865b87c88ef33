//! Grocer reconciler CLI
//!
//! Runs the inventory/archive reconciler as a long-lived process or one
//! pass at a time, and exposes the catalog's stock operations for
//! operators and CI jobs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use grocer::connection::{redact, with_connect_timeout};
use grocer::{
    plan, Catalog, CategoryId, GrocerConfig, PgStore, Product, ProductFilter, ProductId,
    ReconcileReport, ReconcileScheduler, Reconciler, Store,
};
use rust_decimal::Decimal;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "grocer-sync")]
#[command(about = "Keeps the storefront inventory and archive tables in line with products")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile on a fixed interval until interrupted
    Run {
        /// Seconds between runs (default: from configuration)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Reconcile once and print the report
    Once {
        /// Also print the Prometheus metrics recorded by the run
        #[arg(long)]
        metrics: bool,
    },

    /// Create the storefront tables if they are missing
    Schema,

    /// Show table sizes and the changes the next run would apply
    Status,

    /// Search available products by name or category
    Search {
        query: String,
        #[arg(long)]
        category: Option<CategoryId>,
        #[arg(long)]
        min_price: Option<Decimal>,
        #[arg(long)]
        max_price: Option<Decimal>,
    },

    /// Add stock to a product
    Restock { product_id: ProductId, quantity: i32 },

    /// Take stock out of a product
    Sell { product_id: ProductId, quantity: i32 },

    /// Withdraw a product from sale
    Archive { product_id: ProductId },

    /// Put an archived product back on sale
    Unarchive { product_id: ProductId, stock: i32 },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = GrocerConfig::load().context("failed to load configuration")?;

    let database_url = cli
        .database_url
        .or_else(|| std::env::var("GROCER_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| config.database.url.clone());
    let database_url = with_connect_timeout(
        &database_url,
        Duration::from_secs(config.database.connect_timeout_seconds),
    );
    log::debug!("using database {}", redact(&database_url));

    let store = PgStore::new(database_url).context("invalid database URL")?;
    if !matches!(cli.command, Commands::Run { .. }) {
        store.ensure_schema().context("failed to prepare schema")?;
    }
    let store = Arc::new(store);
    let reconciler = Arc::new(
        Reconciler::new(store.clone()).with_budget(config.reconciler.run_budget()),
    );
    let catalog = Catalog::new(reconciler.clone());

    match cli.command {
        Commands::Run { interval } => handle_run(&store, reconciler, &config, interval, cli.quiet),
        Commands::Once { metrics } => {
            let report = reconciler.reconcile()?;
            print_report(&report, cli.json)?;
            if metrics {
                print!("{}", grocer::metrics::METRICS.render());
            }
            Ok(())
        }
        Commands::Schema => {
            if !cli.quiet {
                println!("{}", "Schema is in place".green());
            }
            Ok(())
        }
        Commands::Status => handle_status(store.as_ref(), cli.json),
        Commands::Search {
            query,
            category,
            min_price,
            max_price,
        } => {
            let filter = ProductFilter {
                category_id: category,
                min_price,
                max_price,
            };
            let found = catalog.search(&query, &filter)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&found)?);
                return Ok(());
            }
            if found.is_empty() {
                println!("{}", "No matching products".yellow());
            }
            for product in &found {
                print_product(product, false)?;
            }
            Ok(())
        }
        Commands::Restock {
            product_id,
            quantity,
        } => print_product(&catalog.restock(product_id, quantity)?, cli.json),
        Commands::Sell {
            product_id,
            quantity,
        } => print_product(&catalog.sell(product_id, quantity)?, cli.json),
        Commands::Archive { product_id } => print_product(&catalog.archive(product_id)?, cli.json),
        Commands::Unarchive { product_id, stock } => {
            print_product(&catalog.unarchive(product_id, stock)?, cli.json)
        }
    }
}

fn handle_run(
    store: &PgStore,
    reconciler: Arc<Reconciler>,
    config: &GrocerConfig,
    interval: Option<u64>,
    quiet: bool,
) -> Result<()> {
    // The database may come up after us; ticks retry until it does.
    if let Err(e) = store.ensure_schema() {
        log::warn!("schema check failed, continuing: {e}");
    }

    let mut scheduler_config = config.reconciler.scheduler();
    if let Some(seconds) = interval {
        scheduler_config.interval = Duration::from_secs(seconds.max(1));
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let scheduler = ReconcileScheduler::start(reconciler, scheduler_config)?;
    log::info!("press Ctrl+C to stop");
    let _ = stop_rx.recv();

    log::info!("stopping reconciler");
    let stats = scheduler.shutdown()?;
    if !quiet {
        println!(
            "\n{} {} ticks: {} ok, {} failed, {} skipped",
            "Stopped after".bold(),
            stats.ticks,
            stats.succeeded.to_string().green(),
            stats.failed.to_string().red(),
            stats.skipped.to_string().yellow()
        );
    }
    Ok(())
}

fn handle_status(store: &dyn Store, json: bool) -> Result<()> {
    let mut uow = store.begin(None)?;
    let products = uow.products()?;
    let inventory = uow.inventory()?;
    let archived = uow.archived()?;
    uow.rollback()?;
    let pending = plan(&products, &inventory, &archived);

    if json {
        let status = serde_json::json!({
            "products": products.len(),
            "inventory": inventory.len(),
            "archived": archived.len(),
            "pending": pending,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("\n{}\n", "Reconciliation Status".bold());
    println!("  products:  {}", products.len());
    println!("  inventory: {}", inventory.len());
    println!("  archived:  {}", archived.len());
    println!();
    if pending.is_empty() {
        println!("{}", "In sync: nothing to apply".green());
    } else {
        println!("{} ({}):", "Pending changes".yellow(), pending.len());
        for change in &pending {
            println!("  - {change}");
        }
    }
    Ok(())
}

fn print_report(report: &ReconcileReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("\n{} {}\n", "Run".bold(), report.run_id);
    println!("  products scanned:   {}", report.products_scanned);
    println!("  inventory inserted: {}", report.inventory_inserted);
    println!("  inventory updated:  {}", report.inventory_updated);
    println!("  inventory deleted:  {}", report.inventory_deleted);
    println!("  archived upserted:  {}", report.archived_upserted);
    println!("  archived deleted:   {}", report.archived_deleted);
    println!("  products marked:    {}", report.products_marked);
    println!("  skipped:            {}", report.skipped);
    println!("  duration:           {:?}", report.duration());
    if report.is_noop() {
        println!("\n{}", "Already in sync".green());
    }
    Ok(())
}

fn print_product(product: &Product, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(product)?);
        return Ok(());
    }
    let state = if product.is_archived {
        "archived".yellow()
    } else if product.is_available {
        "available".green()
    } else {
        "unavailable".red()
    };
    println!(
        "{} {} ({}): stock {}, {}",
        "Product".bold(),
        product.product_id,
        product.name,
        product.stock,
        state
    );
    Ok(())
}
