use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use tranche::adapters::PostgresStore;
use tranche::api::{create_router, AppState};
use tranche::config::AppConfig;
use tranche::error::{Result, TrancheError};
use tranche::exchange::build_gateway;
use tranche::markets::MarketRegistry;
use tranche::reconciliation::ReconciliationLoop;
use tranche::scheduler::TradeScheduler;
use tranche::services::TradeService;
use tranche::store::{MemoryStore, TradeStore};
use tranche::strategy::StrategyFactory;

mod main_runtime;

#[derive(Parser)]
#[command(name = "tranche")]
#[command(about = "Time-sliced order execution against Cube", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override dry run mode: `--dry-run` = true, `--dry-run=false` = false
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true", global = true)]
    dry_run: Option<bool>,

    /// Config directory
    #[arg(short, long, default_value = "config", env = "TRANCHE_CONFIG_DIR", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, the reconciliation loop and the API server
    Run,
    /// List the markets in the catalogue
    Markets,
    /// Validate configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if let Some(dry_run) = cli.dry_run {
        config.dry_run.enabled = dry_run;
    }

    match cli.command {
        Commands::Run => {
            main_runtime::init_logging(&config.logging);
            ensure_valid(&config)?;
            run(config).await?;
        }
        Commands::Markets => {
            main_runtime::init_logging_simple();
            show_markets(&config)?;
        }
        Commands::CheckConfig => {
            main_runtime::init_logging_simple();
            ensure_valid(&config)?;
            println!("Configuration OK");
            println!("  dry run:        {}", config.dry_run.enabled);
            println!("  markets:        {}", config.markets.catalogue_path);
            println!(
                "  database:       {}",
                if config.database.url.is_some() { "postgres" } else { "memory" }
            );
            println!("  max workers:    {}", config.scheduler.max_workers);
            println!("  api:            {}", config.api.bind);
        }
    }

    Ok(())
}

fn ensure_valid(config: &AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {}", e);
        }
        return Err(TrancheError::Validation(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }
    Ok(())
}

fn show_markets(config: &AppConfig) -> Result<()> {
    let registry = MarketRegistry::load(&config.markets.catalogue_path)?;
    println!(
        "{:<10} {:>8} {:>14} {:>14}  {}",
        "SYMBOL", "ID", "PRICE TICK", "QTY TICK", "STATUS"
    );
    let mut markets: Vec<_> = registry.markets().collect();
    markets.sort_by(|a, b| a.display_rank.cmp(&b.display_rank).then(a.symbol.cmp(&b.symbol)));
    for market in markets {
        println!(
            "{:<10} {:>8} {:>14} {:>14}  {:?}",
            market.symbol,
            market.market_id,
            market.price_tick_size,
            market.quantity_tick_size,
            market.status
        );
    }
    Ok(())
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn TradeStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, trades are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(
        "Starting tranche ({})",
        if config.dry_run.enabled { "dry run" } else { "live" }
    );

    let registry = Arc::new(MarketRegistry::load(&config.markets.catalogue_path)?);
    let store = build_store(&config).await?;
    let gateway = build_gateway(&config, registry.clone()).await?;
    info!("Using {} exchange gateway", gateway.name());

    let factory = StrategyFactory::new(gateway.clone(), store.clone(), registry)
        .with_latest_orders_limit(config.reconciliation.latest_orders_limit);
    let scheduler = Arc::new(TradeScheduler::new(
        &config.scheduler,
        factory.clone(),
        store.clone(),
    ));
    let service = Arc::new(
        TradeService::new(store.clone(), gateway.clone(), factory).with_scheduler(scheduler.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = ReconciliationLoop::new(
        gateway.clone(),
        store,
        scheduler.clone(),
        config.reconciliation.clone(),
    );
    let reconcile_task = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    let api_task = if config.api.enabled {
        let state = AppState::new(service, gateway.name()).with_scheduler(scheduler.clone());
        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
        info!("API listening on {}", config.api.bind);

        let mut api_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = api_shutdown.changed().await;
                })
                .await;
            if let Err(e) = result {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    main_runtime::shutdown_signal().await;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), reconcile_task)
        .await
        .is_err()
    {
        warn!("Reconciliation loop did not stop in time");
    }

    scheduler.retire_all().await;

    if let Some(task) = api_task {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("API server did not stop in time");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
