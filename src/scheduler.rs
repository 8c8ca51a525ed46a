//! Scheduler: decides when plans are due, launches runners, recovers crashes
//!
//! The registry of running crawls is owned by the scheduler instance, never
//! global, so independent schedulers (e.g. in tests) cannot interfere. At
//! most one runner is ever active per plan.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{CrawlOperation, CrawlPlan, OperationState, PlanState};
use crate::runner::CrawlRunner;
use crate::snapshot::SnapshotStore;
use crate::store::{DocumentStore, IngestionTrigger, StorageService};
use crate::walker::WalkerFactory;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const PLAN_PAGE_SIZE: i64 = 200;

struct RunningCrawl {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub struct CrawlScheduler {
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn StorageService>,
    ingestion: Arc<dyn IngestionTrigger>,
    factory: Arc<dyn WalkerFactory>,
    snapshots: SnapshotStore,
    config: EngineConfig,
    running: Arc<Mutex<HashMap<Uuid, RunningCrawl>>>,
}

impl CrawlScheduler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageService>,
        ingestion: Arc<dyn IngestionTrigger>,
        factory: Arc<dyn WalkerFactory>,
        config: EngineConfig,
    ) -> Self {
        let snapshots = SnapshotStore::new(&config.snapshot_dir);
        Self {
            store,
            storage,
            ingestion,
            factory,
            snapshots,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_running(&self, plan_id: Uuid) -> bool {
        self.running.lock().unwrap().contains_key(&plan_id)
    }

    /// A plan is due if it never ran, or the schedule period elapsed since
    /// the last start. One-time plans are due at most once.
    pub fn is_due(plan: &CrawlPlan, now: DateTime<Utc>) -> bool {
        let Some(last_start) = plan.last_crawl_start else {
            return true;
        };
        match plan.schedule_interval.period(plan.schedule_value) {
            // one-time: due again only if the run never finished (e.g. crash)
            None => plan.last_crawl_finish.is_none(),
            Some(period) => now >= last_start + period,
        }
    }

    /// Launch a crawl for a plan. Returns the created operation, or None if
    /// the plan is unknown or a run is already active (idempotent guard).
    pub async fn start_crawl(&self, plan_id: Uuid) -> Result<Option<CrawlOperation>> {
        let Some(plan) = self.store.get_plan(plan_id).await? else {
            warn!("start_crawl: plan {} not found", plan_id);
            return Ok(None);
        };

        let cancel = Arc::new(AtomicBool::new(false));
        {
            // reserve the slot before any await so concurrent callers
            // cannot double-launch
            let mut running = self.running.lock().unwrap();
            if running.contains_key(&plan_id) {
                return Ok(None);
            }
            running.insert(
                plan_id,
                RunningCrawl {
                    cancel: Arc::clone(&cancel),
                    handle: None,
                },
            );
        }

        match self.launch(plan, cancel).await {
            Ok(operation) => Ok(Some(operation)),
            Err(e) => {
                self.running.lock().unwrap().remove(&plan_id);
                Err(e)
            }
        }
    }

    async fn launch(&self, plan: CrawlPlan, cancel: Arc<AtomicBool>) -> Result<CrawlOperation> {
        let walker = self.factory.create(&plan)?;
        let mut operation = CrawlOperation::new(&plan);

        // an unreachable repository becomes a terminal Failed operation so
        // repeated failures stay visible in the plan's history
        if !walker.validate_connectivity().await? {
            warn!("Repository for plan {} is unreachable; skipping run", plan.id);
            operation.state = OperationState::Failed;
            operation.status_message = Some("repository unreachable".to_string());
            operation.finish_utc = Some(Utc::now());
            self.store.insert_operation(&operation).await?;
            self.running.lock().unwrap().remove(&plan.id);
            return Ok(operation);
        }

        self.store.insert_operation(&operation).await?;

        let plan_id = plan.id;
        let operation_id = operation.id;
        let runner = CrawlRunner::new(
            plan,
            operation.clone(),
            walker,
            Arc::clone(&self.store),
            Arc::clone(&self.storage),
            Arc::clone(&self.ingestion),
            self.snapshots.clone(),
            self.config.clone(),
            cancel,
        );

        let store = Arc::clone(&self.store);
        let running = Arc::clone(&self.running);
        let supervisor = tokio::spawn(async move {
            // the inner spawn isolates runner panics so the registry entry
            // is always released and the plan never stays Running
            let result = tokio::spawn(runner.run()).await;
            match result {
                Ok(Ok(operation)) => {
                    info!(
                        plan_id = %plan_id,
                        operation_id = %operation.id,
                        state = operation.state.as_str(),
                        "Crawl run finished"
                    );
                }
                Ok(Err(e)) => {
                    error!("Crawl run for plan {} failed unexpectedly: {}", plan_id, e);
                    force_stop(&store, plan_id, operation_id, &e.to_string()).await;
                }
                Err(join_error) => {
                    error!("Crawl run for plan {} aborted: {}", plan_id, join_error);
                    force_stop(&store, plan_id, operation_id, &join_error.to_string()).await;
                }
            }
            running.lock().unwrap().remove(&plan_id);
        });

        if let Some(entry) = self.running.lock().unwrap().get_mut(&plan_id) {
            entry.handle = Some(supervisor);
        }
        Ok(operation)
    }

    /// Cancel a running crawl and wait for it to wind down. If the plan was
    /// left Running, reset it to Stopped.
    ///
    /// The registry slot is NOT released here: it stays held until the
    /// supervisor observes the terminal run, so a concurrent `start_crawl`
    /// cannot launch a second runner while the first is still finalizing.
    pub async fn stop_crawl(&self, plan_id: Uuid) -> Result<()> {
        let handle = {
            let mut running = self.running.lock().unwrap();
            running.get_mut(&plan_id).map(|run| {
                run.cancel.store(true, Ordering::SeqCst);
                run.handle.take()
            })
        };
        if let Some(Some(handle)) = handle {
            let _ = handle.await;
        }
        // the handle is not installed yet when a stop races the launch;
        // wait for the supervisor to release the slot either way
        while self.is_running(plan_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if let Some(mut plan) = self.store.get_plan(plan_id).await? {
            if plan.state == PlanState::Running {
                plan.state = PlanState::Stopped;
                self.store.update_plan(&plan).await?;
            }
        }
        Ok(())
    }

    /// Startup crash recovery: a plan persisted as Running means the
    /// previous process died mid-run. Reset it, and fail its most recent
    /// non-terminal operation. Must complete before the periodic loop starts.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0usize;
        for mut plan in self.all_plans().await? {
            if plan.state != PlanState::Running {
                continue;
            }
            warn!(
                "Plan {} was left running by a previous process; recovering",
                plan.id
            );
            plan.state = PlanState::Stopped;
            plan.last_crawl_success = Some(false);
            self.store.update_plan(&plan).await?;

            let operations = self.store.list_operations(plan.id).await?;
            if let Some(mut operation) =
                operations.into_iter().find(|o| !o.state.is_terminal())
            {
                operation.state = OperationState::Failed;
                operation.status_message = Some("recovered during startup".to_string());
                if operation.finish_utc.is_none() {
                    operation.finish_utc = Some(Utc::now());
                }
                self.store.update_operation(&operation).await?;
            }
            recovered += 1;
        }
        if recovered > 0 {
            info!("Recovered {} interrupted plan(s)", recovered);
        }
        Ok(recovered)
    }

    /// Periodic loop: recovery first, then re-evaluate due-ness on a fixed
    /// tick. Exits cleanly when `shutdown` is set.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.recover_interrupted().await?;
        info!(
            "Scheduler started, tick interval {:?}",
            self.config.tick_interval
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown signal received, stopping scheduler...");
                break;
            }

            if let Err(e) = self.tick().await {
                error!("Scheduler tick failed: {}", e);
            }

            interruptible_sleep(self.config.tick_interval, &shutdown).await;
        }
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        for plan in self.all_plans().await? {
            if plan.state != PlanState::Stopped
                || self.is_running(plan.id)
                || !Self::is_due(&plan, now)
            {
                continue;
            }
            info!("Plan {} is due, launching crawl", plan.id);
            match self.start_crawl(plan.id).await {
                Ok(Some(operation)) => {
                    info!("Launched operation {} for plan {}", operation.id, plan.id)
                }
                Ok(None) => {}
                Err(e) => error!("Failed to launch crawl for plan {}: {}", plan.id, e),
            }
        }
        Ok(())
    }

    async fn all_plans(&self) -> Result<Vec<CrawlPlan>> {
        let mut plans = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = self.store.list_plans(PLAN_PAGE_SIZE, offset).await?;
            let len = page.len() as i64;
            plans.extend(page);
            if len < PLAN_PAGE_SIZE {
                break;
            }
            offset += len;
        }
        Ok(plans)
    }
}

/// Force a crashed run's records back to a consistent state.
async fn force_stop(
    store: &Arc<dyn DocumentStore>,
    plan_id: Uuid,
    operation_id: Uuid,
    message: &str,
) {
    match store.get_plan(plan_id).await {
        Ok(Some(mut plan)) if plan.state == PlanState::Running => {
            plan.state = PlanState::Stopped;
            plan.last_crawl_success = Some(false);
            if let Err(e) = store.update_plan(&plan).await {
                error!("Failed to force plan {} to stopped: {}", plan_id, e);
            }
        }
        Ok(_) => {}
        Err(e) => error!("Failed to load plan {} for forced stop: {}", plan_id, e),
    }

    match store.get_operation(operation_id).await {
        Ok(Some(mut operation)) if !operation.state.is_terminal() => {
            operation.state = OperationState::Failed;
            operation.status_message = Some(message.to_string());
            if operation.finish_utc.is_none() {
                operation.finish_utc = Some(Utc::now());
            }
            if let Err(e) = store.update_operation(&operation).await {
                error!("Failed to force operation {} to failed: {}", operation_id, e);
            }
        }
        Ok(_) => {}
        Err(e) => error!(
            "Failed to load operation {} for forced stop: {}",
            operation_id, e
        ),
    }
}

/// Sleep in short slices so shutdown is observed within ~500ms.
pub(crate) async fn interruptible_sleep(duration: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(500);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

/// Setup signal handler for graceful shutdown
pub fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CrawledObject, RepositoryType, ScheduleInterval};
    use crate::store::{MemoryDocumentStore, MemoryIngestion, MemoryStorage};
    use crate::walker::RepositoryWalker;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use tempfile::tempdir;

    struct SlowWalker {
        items: usize,
        delay: Duration,
    }

    #[async_trait]
    impl RepositoryWalker for SlowWalker {
        fn enumerate(self: Box<Self>) -> BoxStream<'static, crate::error::Result<CrawledObject>> {
            use futures::stream::StreamExt;
            let delay = self.delay;
            futures::stream::unfold(0usize, move |i| async move {
                if i >= 1000 {
                    return None;
                }
                tokio::time::sleep(delay).await;
                let object = CrawledObject {
                    key: format!("https://a.example/page-{i}"),
                    content_type: "text/html".to_string(),
                    content_length: 2,
                    payload: Some(vec![1, 2]),
                    ..Default::default()
                };
                Some((Ok(object), i + 1))
            })
            .take(self.items)
            .boxed()
        }

        async fn validate_connectivity(&self) -> crate::error::Result<bool> {
            Ok(true)
        }

        async fn enumerate_contents(
            &self,
            _max_items: usize,
            _skip: usize,
        ) -> crate::error::Result<Vec<CrawledObject>> {
            Ok(vec![])
        }

        fn skips_system_entries(&self) -> bool {
            false
        }
    }

    struct SlowWalkerFactory {
        items: usize,
        delay: Duration,
    }

    impl WalkerFactory for SlowWalkerFactory {
        fn create(
            &self,
            _plan: &CrawlPlan,
        ) -> crate::error::Result<Box<dyn RepositoryWalker>> {
            Ok(Box::new(SlowWalker {
                items: self.items,
                delay: self.delay,
            }))
        }
    }

    fn scheduler_with(
        store: Arc<MemoryDocumentStore>,
        dir: &std::path::Path,
        items: usize,
        delay: Duration,
    ) -> CrawlScheduler {
        CrawlScheduler::new(
            store,
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryIngestion::new()),
            Arc::new(SlowWalkerFactory { items, delay }),
            EngineConfig::builder().snapshot_dir(dir).build(),
        )
    }

    async fn seeded_plan(store: &MemoryDocumentStore) -> CrawlPlan {
        let plan = CrawlPlan::new(Uuid::now_v7(), "docs", RepositoryType::Web);
        store.insert_plan(&plan).await.unwrap();
        plan
    }

    #[tokio::test]
    async fn test_due_check() {
        let mut plan = CrawlPlan::new(Uuid::now_v7(), "p", RepositoryType::Web);
        let now = Utc::now();

        // never ran
        assert!(CrawlScheduler::is_due(&plan, now));

        // one-time plan that finished is never due again
        plan.last_crawl_start = Some(now - chrono::Duration::hours(5));
        plan.last_crawl_finish = Some(now - chrono::Duration::hours(5));
        assert!(!CrawlScheduler::is_due(&plan, now));

        // interval plan due only after the period elapses
        plan.schedule_interval = ScheduleInterval::Hours;
        plan.schedule_value = 6;
        assert!(!CrawlScheduler::is_due(&plan, now));
        plan.schedule_value = 4;
        assert!(CrawlScheduler::is_due(&plan, now));
    }

    #[tokio::test]
    async fn test_double_start_yields_single_run() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let plan = seeded_plan(&store).await;
        let scheduler = Arc::new(scheduler_with(
            store.clone(),
            dir.path(),
            50,
            Duration::from_millis(20),
        ));

        let (first, second) = tokio::join!(
            scheduler.start_crawl(plan.id),
            scheduler.start_crawl(plan.id)
        );
        let launched = [first.unwrap(), second.unwrap()];
        assert_eq!(launched.iter().filter(|r| r.is_some()).count(), 1);
        assert!(scheduler.is_running(plan.id));

        scheduler.stop_crawl(plan.id).await.unwrap();
        assert!(!scheduler.is_running(plan.id));
    }

    struct UnreachableWalker;

    #[async_trait]
    impl RepositoryWalker for UnreachableWalker {
        fn enumerate(self: Box<Self>) -> BoxStream<'static, crate::error::Result<CrawledObject>> {
            use futures::stream::StreamExt;
            futures::stream::empty().boxed()
        }

        async fn validate_connectivity(&self) -> crate::error::Result<bool> {
            Ok(false)
        }

        async fn enumerate_contents(
            &self,
            _max_items: usize,
            _skip: usize,
        ) -> crate::error::Result<Vec<CrawledObject>> {
            Ok(vec![])
        }
    }

    struct UnreachableWalkerFactory;

    impl WalkerFactory for UnreachableWalkerFactory {
        fn create(
            &self,
            _plan: &CrawlPlan,
        ) -> crate::error::Result<Box<dyn RepositoryWalker>> {
            Ok(Box::new(UnreachableWalker))
        }
    }

    #[tokio::test]
    async fn test_unreachable_repository_records_failed_operation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let plan = seeded_plan(&store).await;
        let scheduler = CrawlScheduler::new(
            store.clone(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryIngestion::new()),
            Arc::new(UnreachableWalkerFactory),
            EngineConfig::builder().snapshot_dir(dir.path()).build(),
        );

        let operation = scheduler.start_crawl(plan.id).await.unwrap().unwrap();
        assert_eq!(operation.state, OperationState::Failed);
        assert_eq!(
            operation.status_message.as_deref(),
            Some("repository unreachable")
        );
        assert!(operation.finish_utc.is_some());
        assert!(!scheduler.is_running(plan.id));

        // the failure is persisted in the plan's history
        assert_eq!(store.list_operations(plan.id).await.unwrap().len(), 1);

        // the slot was released, so a later attempt is not blocked
        let retry = scheduler.start_crawl(plan.id).await.unwrap().unwrap();
        assert_eq!(retry.state, OperationState::Failed);
    }

    #[tokio::test]
    async fn test_start_unknown_plan_returns_none() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let scheduler = scheduler_with(store, dir.path(), 1, Duration::ZERO);
        assert!(scheduler.start_crawl(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_completes_and_releases_registry() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let plan = seeded_plan(&store).await;
        let scheduler = scheduler_with(store.clone(), dir.path(), 1, Duration::ZERO);

        let operation = scheduler.start_crawl(plan.id).await.unwrap().unwrap();

        // wait for the detached run to drain
        for _ in 0..100 {
            if !scheduler.is_running(plan.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!scheduler.is_running(plan.id));

        let finished = store.get_operation(operation.id).await.unwrap().unwrap();
        assert_eq!(finished.state, OperationState::Success);
        assert!(finished.finish_utc.is_some());
        let plan = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(plan.state, PlanState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_cancels_running_crawl() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let plan = seeded_plan(&store).await;
        let scheduler = scheduler_with(
            store.clone(),
            dir.path(),
            1000,
            Duration::from_millis(20),
        );

        let operation = scheduler.start_crawl(plan.id).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop_crawl(plan.id).await.unwrap();

        let stopped = store.get_operation(operation.id).await.unwrap().unwrap();
        assert_eq!(stopped.state, OperationState::Canceled);
        let plan = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(plan.state, PlanState::Stopped);
    }

    #[tokio::test]
    async fn test_relaunch_blocked_until_stopped_run_is_terminal() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let plan = seeded_plan(&store).await;
        let scheduler = Arc::new(scheduler_with(
            store.clone(),
            dir.path(),
            1000,
            Duration::from_millis(20),
        ));

        let first = scheduler.start_crawl(plan.id).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopper = {
            let scheduler = Arc::clone(&scheduler);
            let plan_id = plan.id;
            tokio::spawn(async move { scheduler.stop_crawl(plan_id).await.unwrap() })
        };

        // the slot stays held while the canceled run winds down; a relaunch
        // only succeeds once the first run is terminal and persisted
        let second = loop {
            if let Some(operation) = scheduler.start_crawl(plan.id).await.unwrap() {
                break operation;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        let finished = store.get_operation(first.id).await.unwrap().unwrap();
        assert!(finished.state.is_terminal());
        assert_ne!(first.id, second.id);

        // cancel the second run first; the stopper may still be watching
        // the slot it now occupies
        scheduler.stop_crawl(plan.id).await.unwrap();
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_recovery_resets_running_plan() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());

        // simulate a crash: plan Running, operation stuck in Retrieving
        let mut plan = CrawlPlan::new(Uuid::now_v7(), "docs", RepositoryType::Web);
        plan.state = PlanState::Running;
        store.insert_plan(&plan).await.unwrap();
        let mut operation = CrawlOperation::new(&plan);
        operation.state = OperationState::Retrieving;
        store.insert_operation(&operation).await.unwrap();

        let scheduler = scheduler_with(store.clone(), dir.path(), 1, Duration::ZERO);
        assert_eq!(scheduler.recover_interrupted().await.unwrap(), 1);

        let plan = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(plan.state, PlanState::Stopped);
        assert_eq!(plan.last_crawl_success, Some(false));

        let operation = store.get_operation(operation.id).await.unwrap().unwrap();
        assert_eq!(operation.state, OperationState::Failed);
        assert_eq!(
            operation.status_message.as_deref(),
            Some("recovered during startup")
        );
        assert!(operation.finish_utc.is_some());

        // terminal operations are untouched by a second recovery pass
        assert_eq!(scheduler.recover_interrupted().await.unwrap(), 0);
    }
}
