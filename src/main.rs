use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use marketscrape::cli::{Cli, Commands};
use marketscrape::config::{self, AppConfig, CONFIG_PATH};
use marketscrape::format::{currency_symbol, format_money};
use marketscrape::logger::{RunLogger, VerbosityLevel};
use marketscrape::pipeline::MAX_PAGES;
use marketscrape::scheduler::{ChromeIngestionJob, Scheduler, TriggerOutcome};
use marketscrape::store::{AssetStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_PATH));

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config_at(&config_path) {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run marketscrape again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    init_tracing(cli.verbose);

    let mut app_config = load_config(&config_path);
    if let Some(max_pages) = cli.max_pages {
        if max_pages == 0 {
            eprintln!("❌ --max-pages must be greater than zero");
            std::process::exit(1);
        }
        app_config.pagination.max_pages = max_pages.min(MAX_PAGES);
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let logger = match &cli.log_file {
        Some(log_file_path) => RunLogger::with_log_file(verbosity, log_file_path.clone()),
        None => RunLogger::new(verbosity),
    };

    let store: Arc<dyn AssetStore> = Arc::new(
        SqliteStore::open(&app_config.store.path)
            .with_context(|| format!("failed to open asset store {}", app_config.store.path.display()))?,
    );

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_once(app_config, store, &logger).await,
        Commands::Schedule => run_scheduled(app_config, store, &logger).await,
        Commands::List {
            offset,
            limit,
            currency,
        } => list_assets(store.as_ref(), offset, limit, &currency).await,
        Commands::Show { slug } => show_asset(store.as_ref(), &slug).await,
    };

    if logger.is_log_export_enabled() {
        if let Err(e) = logger.export_logs() {
            eprintln!("⚠️  Failed to export logs: {}", e);
        }
    }

    if let Err(e) = result {
        logger.error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise the level follows `-v`.
fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "marketscrape=info,warn",
        _ => "marketscrape=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> AppConfig {
    match AppConfig::load_from_path(path) {
        Ok(cfg) => cfg,
        Err(config::ConfigError::FileNotFound(path)) => {
            // Config not found - prompt to create if interactive
            match AppConfig::prompt_create_config() {
                Ok(Some(created_path)) => {
                    println!("✅ Created default configuration file at: {}", created_path.display());
                    println!("   Edit this file to customize settings, then run marketscrape again.");
                    std::process::exit(0);
                }
                Ok(None) => {
                    eprintln!("❌ Configuration file not found at: {}", path.display());
                    eprintln!("   Run with --init to create a default configuration file.");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Failed to create configuration file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn scheduler_for(config: AppConfig, store: Arc<dyn AssetStore>, logger: &RunLogger) -> Scheduler {
    let interval = config.schedule.interval();
    let job = Arc::new(ChromeIngestionJob::new(config, store, logger.clone()));
    Scheduler::new(job, interval).with_logger(logger.clone())
}

async fn run_once(config: AppConfig, store: Arc<dyn AssetStore>, logger: &RunLogger) -> Result<()> {
    let scheduler = scheduler_for(config, store, logger);
    match scheduler.trigger().await {
        TriggerOutcome::Completed(_) => {
            logger.print_final_summary();
            Ok(())
        }
        TriggerOutcome::Failed(error) => anyhow::bail!("ingestion run failed: {}", error),
        TriggerOutcome::Skipped => Ok(()),
    }
}

async fn run_scheduled(config: AppConfig, store: Arc<dyn AssetStore>, logger: &RunLogger) -> Result<()> {
    let scheduler = Arc::new(scheduler_for(config, store, logger));
    logger.info(&format!(
        "Scheduling ingestion every {}s (Ctrl-C to stop)",
        scheduler.interval().as_secs()
    ));

    let handle = scheduler.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    handle.abort();
    if scheduler.lock().is_held() {
        logger.info("Interrupted during a run; records stored so far are kept");
    }
    logger.info(&format!("Scheduler stopped after {} runs", scheduler.runs_started()));
    Ok(())
}

async fn list_assets(store: &dyn AssetStore, offset: usize, limit: usize, currency: &str) -> Result<()> {
    let symbol = currency_symbol(currency);
    let records = store.list(offset, limit).await?;
    let total = store.count().await?;

    println!(
        "{:>5}  {:<24} {:<8} {:>16} {:>22} {:>9}",
        "#", "Name", "Symbol", "Price", "Market Cap", "24h %"
    );
    for record in &records {
        let rank = if record.has_rank() {
            record.rank.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:>5}  {:<24} {:<8} {:>16} {:>22} {:>9}",
            rank,
            record.name,
            record.symbol,
            format_money(record.price, &symbol),
            format_money(record.market_cap, &symbol),
            record.change
        );
    }
    println!("\nShowing {} of {} assets", records.len(), total);
    Ok(())
}

async fn show_asset(store: &dyn AssetStore, slug: &str) -> Result<()> {
    let record = store
        .find_by_slug(slug)
        .await?
        .with_context(|| format!("no asset with slug '{}'", slug))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
