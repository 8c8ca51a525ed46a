//! Filesystem-backed object storage
//!
//! Objects land under `<root>/<bucket>/<key>`. Suitable for single-node
//! deployments and local development; S3-style backends plug in behind the
//! same trait.

use crate::error::{CrawlError, Result};
use crate::store::StorageService;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FsStorageService {
    root: PathBuf,
    default_bucket: String,
}

impl FsStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_bucket: "default".to_string(),
        }
    }

    fn object_path(&self, bucket: Option<&str>, key: &str) -> Result<PathBuf> {
        // Keys are engine-generated (`<plan_id>/<sha256>`), never raw URLs,
        // but reject traversal outright.
        if key.contains("..") || Path::new(key).is_absolute() {
            return Err(CrawlError::StorageError(format!(
                "invalid object key: {key}"
            )));
        }
        let bucket = bucket.unwrap_or(&self.default_bucket);
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl StorageService for FsStorageService {
    async fn upload(
        &self,
        bucket: Option<&str>,
        key: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    async fn delete(&self, bucket: Option<&str>, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deleting an object that is already gone is not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
