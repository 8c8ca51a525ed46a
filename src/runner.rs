//! Crawl operation runner
//!
//! Owns one execution of one plan end-to-end: enumerate, diff, process,
//! finalize. The finalize step runs on every exit path, so `finish_utc` is
//! always set and the plan never stays `Running` after the run returns.

use crate::config::EngineConfig;
use crate::delta;
use crate::error::{CrawlError, Result};
use crate::model::{
    CrawlEnumeration, CrawlOperation, CrawlPlan, CrawledObject, OperationState, PlanState,
};
use crate::processor::{ItemOutcome, ItemProcessor};
use crate::snapshot::SnapshotStore;
use crate::store::{DocumentStore, IngestionTrigger, StorageService};
use crate::walker::{is_system_entry, RepositoryWalker};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
enum Category {
    Addition,
    Update,
    Deletion,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::Addition => "additions",
            Category::Update => "updates",
            Category::Deletion => "deletions",
        }
    }
}

pub struct CrawlRunner {
    plan: CrawlPlan,
    operation: CrawlOperation,
    walker: Option<Box<dyn RepositoryWalker>>,
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn StorageService>,
    ingestion: Arc<dyn IngestionTrigger>,
    snapshots: SnapshotStore,
    config: EngineConfig,
    cancel: Arc<AtomicBool>,
    enumeration: Option<CrawlEnumeration>,
}

impl CrawlRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: CrawlPlan,
        operation: CrawlOperation,
        walker: Box<dyn RepositoryWalker>,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageService>,
        ingestion: Arc<dyn IngestionTrigger>,
        snapshots: SnapshotStore,
        config: EngineConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            plan,
            operation,
            walker: Some(walker),
            store,
            storage,
            ingestion,
            snapshots,
            config,
            cancel,
            enumeration: None,
        }
    }

    /// Signal handle observed between items and on every drain poll.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn canceled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(CrawlError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Drive the full state machine. The returned operation is terminal and
    /// persisted; item failures surface as `OperationState::Failed`, not as
    /// an error.
    pub async fn run(mut self) -> Result<CrawlOperation> {
        let started = Instant::now();
        let outcome = self.execute().await;
        Ok(self.finalize(outcome, started).await)
    }

    async fn execute(&mut self) -> Result<()> {
        // Starting
        let now = Utc::now();
        self.plan.state = PlanState::Running;
        self.plan.last_crawl_start = Some(now);
        self.store.update_plan(&self.plan).await?;
        self.operation.state = OperationState::Starting;
        self.operation.start_utc = Some(now);
        self.store.update_operation(&self.operation).await?;
        self.canceled()?;

        // Enumerating
        self.operation.state = OperationState::Enumerating;
        self.operation.enumeration_start_utc = Some(Utc::now());
        self.store.update_operation(&self.operation).await?;

        let current = self.enumerate().await?;
        self.operation.enumeration_finish_utc = Some(Utc::now());
        info!(
            plan_id = %self.plan.id,
            operation_id = %self.operation.id,
            count = current.len(),
            "Enumeration complete"
        );

        let previous = self
            .snapshots
            .load_latest(self.plan.id)
            .await
            .unwrap_or_default();
        let enumeration = delta::diff(current, &previous.all_files, &previous.failed);
        info!(
            plan_id = %self.plan.id,
            added = enumeration.added.len(),
            changed = enumeration.changed.len(),
            deleted = enumeration.deleted.len(),
            unchanged = enumeration.unchanged.len(),
            "Delta computed"
        );
        self.operation.statistics = enumeration.statistics;
        self.enumeration = Some(enumeration);
        self.canceled()?;

        // Retrieving
        self.operation.state = OperationState::Retrieving;
        self.operation.retrieval_start_utc = Some(Utc::now());
        self.store.update_operation(&self.operation).await?;

        let processor = Arc::new(ItemProcessor::new(
            self.plan.clone(),
            self.operation.id,
            Arc::clone(&self.store),
            Arc::clone(&self.storage),
            Arc::clone(&self.ingestion),
        ));

        // Categories drain strictly in sequence, each gated by its plan flag.
        if self.plan.process_additions {
            self.process_category(Category::Addition, &processor).await?;
        }
        if self.plan.process_updates {
            self.process_category(Category::Update, &processor).await?;
        }
        if self.plan.process_deletions {
            self.process_category(Category::Deletion, &processor).await?;
        }

        self.operation.retrieval_finish_utc = Some(Utc::now());
        Ok(())
    }

    /// Consume the walker's lazy sequence fully, dropping folders and (for
    /// filesystem-like walkers) hidden/system/temp entries.
    async fn enumerate(&mut self) -> Result<Vec<CrawledObject>> {
        let walker = self
            .walker
            .take()
            .ok_or_else(|| CrawlError::WalkerError("walker already consumed".to_string()))?;
        let skip_system = walker.skips_system_entries();

        let mut stream = walker.enumerate();
        let mut current = Vec::new();
        while let Some(item) = stream.next().await {
            self.canceled()?;
            let object = item?;
            if object.is_folder {
                continue;
            }
            if skip_system && is_system_entry(&object.key) {
                continue;
            }
            current.push(object);
        }
        Ok(current)
    }

    async fn process_category(
        &mut self,
        category: Category,
        processor: &Arc<ItemProcessor>,
    ) -> Result<()> {
        let Some(enumeration) = self.enumeration.as_mut() else {
            return Ok(());
        };
        let items = match category {
            Category::Addition => enumeration.added.clone(),
            Category::Update => enumeration.changed.clone(),
            Category::Deletion => enumeration.deleted.clone(),
        };
        if items.is_empty() {
            return Ok(());
        }

        info!(
            plan_id = %self.plan.id,
            category = category.as_str(),
            count = items.len(),
            concurrency = self.plan.max_concurrency,
            "Draining category"
        );

        let (succeeded, failed) = drain_batch(
            category,
            items,
            processor,
            self.plan.max_concurrency,
            &self.cancel,
            self.config.drain_poll_interval,
        )
        .await?;

        enumeration.success.extend(succeeded);
        enumeration.failed.extend(failed);
        enumeration.recompute_statistics();
        self.operation.statistics = enumeration.statistics;
        self.store.update_operation(&self.operation).await?;
        Ok(())
    }

    /// Always runs: sets the terminal state and finish timestamps, persists
    /// the stripped snapshot, resets the plan to Stopped, and logs the
    /// summary. Persistence failures here are logged, never propagated.
    async fn finalize(&mut self, outcome: Result<()>, started: Instant) -> CrawlOperation {
        let (state, message) = match &outcome {
            Ok(()) => {
                let failed = self
                    .enumeration
                    .as_ref()
                    .map_or(0, |e| e.failed.len());
                if failed > 0 {
                    (
                        OperationState::Failed,
                        Some(format!("{failed} item(s) failed processing")),
                    )
                } else {
                    (OperationState::Success, None)
                }
            }
            Err(CrawlError::Canceled) => (
                OperationState::Canceled,
                Some("canceled by request".to_string()),
            ),
            Err(e) => (OperationState::Failed, Some(e.to_string())),
        };

        let now = Utc::now();
        self.operation.state = state;
        self.operation.status_message = message;
        if self.operation.finish_utc.is_none() {
            self.operation.finish_utc = Some(now);
        }

        // Snapshot only exists once the diff ran; an aborted enumeration
        // must not clobber the previous baseline with an empty file.
        if let Some(enumeration) = &mut self.enumeration {
            enumeration.recompute_statistics();
            self.operation.statistics = enumeration.statistics;
            match self
                .snapshots
                .save(self.plan.id, self.operation.id, enumeration)
                .await
            {
                Ok(path) => {
                    self.operation.snapshot_path = Some(path.display().to_string());
                }
                Err(e) => warn!(
                    "Failed to persist snapshot for operation {}: {}",
                    self.operation.id, e
                ),
            }
        }

        if let Err(e) = self.store.update_operation(&self.operation).await {
            error!("Failed to persist final operation state: {}", e);
        }

        self.plan.state = PlanState::Stopped;
        self.plan.last_crawl_finish = Some(now);
        self.plan.last_crawl_success = Some(state == OperationState::Success);
        if let Err(e) = self.store.update_plan(&self.plan).await {
            error!("Failed to reset plan {} to stopped: {}", self.plan.id, e);
        }

        let stats = &self.operation.statistics;
        info!(
            plan_id = %self.plan.id,
            operation_id = %self.operation.id,
            state = state.as_str(),
            runtime_ms = started.elapsed().as_millis() as u64,
            enumerated = stats.enumerated_count,
            enumerated_bytes = stats.enumerated_bytes,
            added = stats.added_count,
            updated = stats.updated_count,
            deleted = stats.deleted_count,
            unchanged = stats.unchanged_count,
            succeeded = stats.success_count,
            succeeded_bytes = stats.success_bytes,
            failed = stats.failed_count,
            failed_bytes = stats.failed_bytes,
            "Crawl operation finished"
        );

        self.operation.clone()
    }
}

/// Run one category's items through a bounded worker pool and wait for the
/// whole batch to drain. Completion is polled on a short fixed interval so
/// cancellation is observed mid-batch, not only at batch boundaries.
async fn drain_batch(
    category: Category,
    items: Vec<CrawledObject>,
    processor: &Arc<ItemProcessor>,
    max_concurrency: usize,
    cancel: &AtomicBool,
    poll_interval: std::time::Duration,
) -> Result<(Vec<CrawledObject>, Vec<CrawledObject>)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut batch: JoinSet<(CrawledObject, Result<ItemOutcome>)> = JoinSet::new();

    for item in items {
        let semaphore = Arc::clone(&semaphore);
        let processor = Arc::clone(processor);
        batch.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (item, Err(CrawlError::Canceled)),
            };
            // A panicking processor charges only its own item as failed
            // instead of tearing down the whole batch drain.
            let work = async {
                match category {
                    Category::Addition => processor.process_addition(&item).await,
                    Category::Update => processor.process_update(&item).await,
                    Category::Deletion => processor.process_deletion(&item).await,
                }
            };
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(CrawlError::ProcessingPanic(panic_message(panic))),
            };
            (item, result)
        });
    }

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    loop {
        if cancel.load(Ordering::SeqCst) {
            batch.abort_all();
            return Err(CrawlError::Canceled);
        }
        match tokio::time::timeout(poll_interval, batch.join_next()).await {
            Ok(None) => break,
            Ok(Some(Ok((item, Ok(outcome))))) => match outcome {
                ItemOutcome::Completed { .. } => succeeded.push(item.without_payload()),
                ItemOutcome::Skipped => {}
            },
            Ok(Some(Ok((item, Err(e))))) => {
                error!(
                    category = category.as_str(),
                    key = %item.key,
                    "Item processing failed: {}", e
                );
                failed.push(item.without_payload());
            }
            // Panics are caught inside the task, so a JoinError here can
            // only be an abort.
            Ok(Some(Err(join_error))) => {
                error!(
                    category = category.as_str(),
                    "Item processing task aborted: {}", join_error
                );
            }
            // Poll tick elapsed without a completion; re-check cancellation
            Err(_) => {}
        }
    }

    Ok((succeeded, failed))
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
