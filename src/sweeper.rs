//! Retention sweeper: expires old operations and their snapshots
//!
//! Runs once at startup and then on a fixed cadence. The snapshot file is
//! deleted before the operation row so a crash between the two steps leaves
//! a row whose missing file is harmless on retry.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::scheduler::interruptible_sleep;
use crate::snapshot::SnapshotStore;
use crate::store::DocumentStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

const PLAN_PAGE_SIZE: i64 = 200;

pub struct RetentionSweeper {
    store: Arc<dyn DocumentStore>,
    snapshots: SnapshotStore,
    config: EngineConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        let snapshots = SnapshotStore::new(&config.snapshot_dir);
        Self {
            store,
            snapshots,
            config,
        }
    }

    /// Delete every operation older than its plan's retention window.
    /// Returns the number of operations removed.
    pub async fn sweep_once(&self) -> Result<u64> {
        let mut removed = 0u64;
        let mut offset = 0i64;
        loop {
            let plans = self.store.list_plans(PLAN_PAGE_SIZE, offset).await?;
            let page_len = plans.len() as i64;

            for plan in &plans {
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(plan.retention_days));
                let expired = self.store.expired_operations(plan.id, cutoff).await?;
                for operation in expired {
                    // file first; a leftover row retries cleanly next sweep
                    if let Err(e) = self.snapshots.delete(plan.id, operation.id).await {
                        warn!(
                            "Failed to delete snapshot for operation {}: {}; will retry",
                            operation.id, e
                        );
                        continue;
                    }
                    self.store.delete_operation(operation.id).await?;
                    removed += 1;
                }
                if let Err(e) = self.snapshots.remove_plan_dir(plan.id).await {
                    warn!("Failed to prune snapshot dir for plan {}: {}", plan.id, e);
                }
            }

            if page_len < PLAN_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        if removed > 0 {
            info!("Retention sweep removed {} operation(s)", removed);
        }
        Ok(removed)
    }

    /// Sweep immediately, then on the configured cadence until shutdown.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        info!(
            "Retention sweeper started, interval {:?}",
            self.config.sweep_interval
        );
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown signal received, stopping sweeper...");
                break;
            }
            if let Err(e) = self.sweep_once().await {
                error!("Retention sweep failed: {}", e);
            }
            interruptible_sleep(self.config.sweep_interval, &shutdown).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CrawlEnumeration, CrawlOperation, CrawlPlan, OperationState, RepositoryType,
    };
    use crate::store::MemoryDocumentStore;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_removes_expired_operations_and_snapshots() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let config = EngineConfig::builder().snapshot_dir(dir.path()).build();
        let snapshots = SnapshotStore::new(dir.path());

        let mut plan = CrawlPlan::new(Uuid::now_v7(), "docs", RepositoryType::Web);
        plan.retention_days = 7;
        store.insert_plan(&plan).await.unwrap();

        let mut old_operation = CrawlOperation::new(&plan);
        old_operation.state = OperationState::Success;
        old_operation.created_at = Utc::now() - chrono::Duration::days(10);
        store.insert_operation(&old_operation).await.unwrap();
        snapshots
            .save(plan.id, old_operation.id, &CrawlEnumeration::default())
            .await
            .unwrap();

        let mut fresh_operation = CrawlOperation::new(&plan);
        fresh_operation.state = OperationState::Success;
        store.insert_operation(&fresh_operation).await.unwrap();
        snapshots
            .save(plan.id, fresh_operation.id, &CrawlEnumeration::default())
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), config);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        assert!(store.get_operation(old_operation.id).await.unwrap().is_none());
        assert!(store
            .get_operation(fresh_operation.id)
            .await
            .unwrap()
            .is_some());
        assert!(!snapshots
            .snapshot_path(plan.id, old_operation.id)
            .exists());
        assert!(snapshots
            .snapshot_path(plan.id, fresh_operation.id)
            .exists());
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let config = EngineConfig::builder().snapshot_dir(dir.path()).build();

        let plan = CrawlPlan::new(Uuid::now_v7(), "docs", RepositoryType::Web);
        store.insert_plan(&plan).await.unwrap();
        let operation = CrawlOperation::new(&plan);
        store.insert_operation(&operation).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), config);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert!(store.get_operation(operation.id).await.unwrap().is_some());
    }
}
