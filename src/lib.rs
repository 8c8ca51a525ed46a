//! Crawl Engine - plan-driven repository crawling with incremental delta detection
//!
//! The engine runs crawl plans against external repositories (currently web
//! sites), compares each enumeration against the previous run's snapshot, and
//! processes only what changed: additions are stored and handed to the
//! ingestion pipeline, updates replace the stored document, deletions remove
//! it. A scheduler launches plans on their configured cadence and recovers
//! runs interrupted by a crash; a retention sweeper expires old operation
//! records and their snapshots.

pub mod config;
pub mod db;
pub mod delta;
pub mod error;
pub mod model;
pub mod processor;
pub mod runner;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod sweeper;
pub mod walker;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{CrawlError, Result};
pub use model::{
    ContentFilter, CrawlEnumeration, CrawlOperation, CrawlPlan, CrawlStatistics, CrawledObject,
    OperationState, PlanState, RepositoryType, ScheduleInterval,
};
pub use runner::CrawlRunner;
pub use scheduler::{setup_signal_handler, CrawlScheduler};
pub use snapshot::SnapshotStore;
pub use store::{DocumentStore, IngestionTrigger, StorageService};
pub use sweeper::RetentionSweeper;
pub use walker::{DefaultWalkerFactory, RepositoryWalker, WalkerFactory};
