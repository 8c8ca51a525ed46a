//! Crawl Engine CLI
//!
//! Runs the engine as a long-lived service (scheduler + retention sweeper)
//! or performs one-off operations: run a single plan, recover interrupted
//! runs, sweep expired operations, or crawl a URL ad hoc without a database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use crawl_engine::db::{create_pool_from_env, PgDocumentStore};
use crawl_engine::store::{
    DocumentStore, FsStorageService, HttpIngestionTrigger, IngestionTrigger, MemoryIngestion,
    StorageService,
};
use crawl_engine::walker::{DefaultWalkerFactory, RepositoryWalker};
use crawl_engine::{
    setup_signal_handler, CrawlScheduler, EngineConfig, RetentionSweeper,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "crawl-engine")]
#[command(about = "Plan-driven repository crawling with incremental delta detection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and retention sweeper until interrupted
    Serve {
        /// Scheduler tick interval in seconds
        #[arg(short, long, default_value = "30")]
        tick: u64,

        /// Directory for enumeration snapshots
        #[arg(long, default_value = "./snapshots")]
        snapshot_dir: PathBuf,

        /// Directory for stored crawled objects
        #[arg(long, default_value = "./objects")]
        storage_dir: PathBuf,

        /// Ingestion endpoint notified for each stored document
        #[arg(long)]
        ingestion_url: Option<String>,
    },

    /// Run a single plan to completion and exit
    RunOnce {
        /// Plan to run
        #[arg(short, long)]
        plan_id: Uuid,

        /// Directory for enumeration snapshots
        #[arg(long, default_value = "./snapshots")]
        snapshot_dir: PathBuf,

        /// Directory for stored crawled objects
        #[arg(long, default_value = "./objects")]
        storage_dir: PathBuf,

        /// Ingestion endpoint notified for each stored document
        #[arg(long)]
        ingestion_url: Option<String>,
    },

    /// Crawl a URL and list what would be enumerated (no database)
    Crawl {
        /// Root URL to crawl
        #[arg(short, long)]
        url: String,

        /// Maximum pages to fetch
        #[arg(short, long, default_value = "10")]
        max_pages: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset plans and operations left running by a crashed process
    Recover,

    /// Delete operations past their plan's retention window
    Sweep {
        /// Directory for enumeration snapshots
        #[arg(long, default_value = "./snapshots")]
        snapshot_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            tick,
            snapshot_dir,
            storage_dir,
            ingestion_url,
        } => {
            dotenvy::dotenv().ok();

            info!("Initializing crawl engine...");
            let pool = create_pool_from_env().await?;
            info!("Database connection established");

            let config = EngineConfig::builder()
                .tick_interval_secs(tick)
                .snapshot_dir(&snapshot_dir)
                .build();

            let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
            let storage: Arc<dyn StorageService> = Arc::new(FsStorageService::new(&storage_dir));
            let ingestion = build_ingestion(ingestion_url.as_deref())?;

            let scheduler = CrawlScheduler::new(
                Arc::clone(&store),
                storage,
                ingestion,
                Arc::new(DefaultWalkerFactory),
                config.clone(),
            );
            let sweeper = RetentionSweeper::new(store, config);

            let shutdown = Arc::new(AtomicBool::new(false));
            setup_signal_handler(Arc::clone(&shutdown));

            let (scheduler_result, sweeper_result) = tokio::join!(
                scheduler.run(Arc::clone(&shutdown)),
                sweeper.run(Arc::clone(&shutdown))
            );
            scheduler_result?;
            sweeper_result?;
            info!("Crawl engine stopped");
        }

        Commands::RunOnce {
            plan_id,
            snapshot_dir,
            storage_dir,
            ingestion_url,
        } => {
            dotenvy::dotenv().ok();

            let pool = create_pool_from_env().await?;
            let config = EngineConfig::builder().snapshot_dir(&snapshot_dir).build();

            let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
            let storage: Arc<dyn StorageService> = Arc::new(FsStorageService::new(&storage_dir));
            let ingestion = build_ingestion(ingestion_url.as_deref())?;

            let scheduler = CrawlScheduler::new(
                Arc::clone(&store),
                storage,
                ingestion,
                Arc::new(DefaultWalkerFactory),
                config,
            );

            let Some(operation) = scheduler.start_crawl(plan_id).await? else {
                eprintln!("Plan {} not found or already running", plan_id);
                std::process::exit(1);
            };
            info!("Launched operation {} for plan {}", operation.id, plan_id);

            while scheduler.is_running(plan_id) {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            let Some(finished) = store.get_operation(operation.id).await? else {
                eprintln!("Operation {} disappeared mid-run", operation.id);
                std::process::exit(1);
            };
            println!("Operation {} finished: {}", finished.id, finished.state.as_str());
            if let Some(message) = &finished.status_message {
                println!("  {}", message);
            }
            println!(
                "  added: {}, changed: {}, deleted: {}, unchanged: {}, failed: {}",
                finished.statistics.added_count,
                finished.statistics.updated_count,
                finished.statistics.deleted_count,
                finished.statistics.unchanged_count,
                finished.statistics.failed_count,
            );
        }

        Commands::Crawl {
            url,
            max_pages,
            json,
        } => {
            info!("Crawling: {}", url);

            let settings = serde_json::from_value(serde_json::json!({
                "root_url": url,
                "max_pages": max_pages,
            }))?;
            let walker = crawl_engine::walker::WebWalker::new(settings)?;
            let objects = walker.enumerate_contents(max_pages, 0).await?;

            if json {
                let listing: Vec<_> = objects.iter().map(|o| o.without_payload()).collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("=== Enumerated {} object(s) ===\n", objects.len());
                for object in &objects {
                    println!(
                        "  {} ({}, {} bytes)",
                        object.key, object.content_type, object.content_length
                    );
                    if let Some(sha256) = &object.sha256 {
                        println!("    sha256: {}", sha256);
                    }
                }
            }
        }

        Commands::Recover => {
            dotenvy::dotenv().ok();

            let pool = create_pool_from_env().await?;
            let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
            let scheduler = CrawlScheduler::new(
                store,
                Arc::new(FsStorageService::new("./objects")),
                Arc::new(MemoryIngestion::new()),
                Arc::new(DefaultWalkerFactory),
                EngineConfig::default(),
            );

            let recovered = scheduler.recover_interrupted().await?;
            println!("Recovered {} interrupted plan(s)", recovered);
        }

        Commands::Sweep { snapshot_dir } => {
            dotenvy::dotenv().ok();

            let pool = create_pool_from_env().await?;
            let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
            let config = EngineConfig::builder().snapshot_dir(&snapshot_dir).build();

            let sweeper = RetentionSweeper::new(store, config);
            let removed = sweeper.sweep_once().await?;
            println!("Removed {} expired operation(s)", removed);
        }
    }

    Ok(())
}

/// With no endpoint configured, document dispatches are recorded in-process
/// and never leave the machine.
fn build_ingestion(endpoint: Option<&str>) -> Result<Arc<dyn IngestionTrigger>> {
    match endpoint {
        Some(url) => Ok(Arc::new(HttpIngestionTrigger::new(url)?)),
        None => Ok(Arc::new(MemoryIngestion::new())),
    }
}
