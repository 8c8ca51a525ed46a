//! Snapshot store: payload-free enumerations persisted as diff baselines
//!
//! One JSON file per operation under `<dir>/<plan_id>/<operation_id>.json`.
//! Operation ids are UUIDv7, so the lexicographically-greatest filename is
//! the most recent run.

use crate::error::Result;
use crate::model::CrawlEnumeration;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const SNAPSHOT_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn plan_dir(&self, plan_id: Uuid) -> PathBuf {
        self.dir.join(plan_id.to_string())
    }

    pub fn snapshot_path(&self, plan_id: Uuid, operation_id: Uuid) -> PathBuf {
        self.plan_dir(plan_id)
            .join(format!("{operation_id}.{SNAPSHOT_EXT}"))
    }

    /// Persist the payload-stripped enumeration; returns the file path.
    pub async fn save(
        &self,
        plan_id: Uuid,
        operation_id: Uuid,
        enumeration: &CrawlEnumeration,
    ) -> Result<PathBuf> {
        let path = self.snapshot_path(plan_id, operation_id);
        tokio::fs::create_dir_all(self.plan_dir(plan_id)).await?;
        let stripped = enumeration.without_payload();
        let json = serde_json::to_vec(&stripped)?;
        tokio::fs::write(&path, json).await?;
        debug!("Saved snapshot for plan {} at {}", plan_id, path.display());
        Ok(path)
    }

    /// Load the most recent snapshot for a plan.
    ///
    /// A missing directory, empty directory, or unreadable/corrupt file all
    /// mean "no prior history" and return None.
    pub async fn load_latest(&self, plan_id: Uuid) -> Option<CrawlEnumeration> {
        let plan_dir = self.plan_dir(plan_id);
        let mut entries = match tokio::fs::read_dir(&plan_dir).await {
            Ok(entries) => entries,
            Err(_) => return None,
        };

        let mut latest: Option<PathBuf> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if latest.as_ref().map_or(true, |l| path.file_name() > l.file_name()) {
                latest = Some(path);
            }
        }

        let path = latest?;
        match self.read_snapshot(&path).await {
            Ok(enumeration) => Some(enumeration),
            Err(e) => {
                warn!(
                    "Unreadable snapshot {} treated as no prior history: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    async fn read_snapshot(&self, path: &Path) -> Result<CrawlEnumeration> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete one operation's snapshot; missing files are fine.
    pub async fn delete(&self, plan_id: Uuid, operation_id: Uuid) -> Result<()> {
        let path = self.snapshot_path(plan_id, operation_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Prune a plan's directory once its last snapshot is gone. A missing
    /// or still-populated directory is left alone.
    pub async fn remove_plan_dir(&self, plan_id: Uuid) -> Result<()> {
        let plan_dir = self.plan_dir(plan_id);
        let mut entries = match tokio::fs::read_dir(&plan_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if entries.next_entry().await?.is_some() {
            return Ok(());
        }
        tokio::fs::remove_dir(&plan_dir).await?;
        Ok(())
    }
}
