//! Item processor: one procedure per delta category
//!
//! Each entry point handles exactly one crawled object. Failure isolation
//! happens one level up: the runner's drain catches a returned error,
//! records the item as failed, and keeps the batch going.

use crate::error::Result;
use crate::model::{AssistantDocument, CrawlPlan, CrawledObject};
use crate::store::{DocumentStore, IngestionTrigger, StorageService};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of processing one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Processed to completion; additions/updates carry the created document
    Completed { document_id: Option<Uuid> },
    /// Rejected by the plan's content filter; neither success nor failure
    Skipped,
}

pub struct ItemProcessor {
    plan: CrawlPlan,
    operation_id: Uuid,
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn StorageService>,
    ingestion: Arc<dyn IngestionTrigger>,
}

impl ItemProcessor {
    pub fn new(
        plan: CrawlPlan,
        operation_id: Uuid,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageService>,
        ingestion: Arc<dyn IngestionTrigger>,
    ) -> Self {
        Self {
            plan,
            operation_id,
            store,
            storage,
            ingestion,
        }
    }

    /// Upload a newly discovered item, create its document record, and
    /// dispatch downstream ingestion.
    pub async fn process_addition(&self, item: &CrawledObject) -> Result<ItemOutcome> {
        if !self.plan.filter.matches(item) {
            debug!("Filtered out: {}", item.key);
            return Ok(ItemOutcome::Skipped);
        }

        let (bucket, collection) = self.resolve_target().await?;
        let object_key = object_key(self.plan.id, &item.key);
        let payload = item.payload.as_deref().unwrap_or_default();

        self.storage
            .upload(bucket.as_deref(), &object_key, &item.content_type, payload)
            .await?;

        let document = AssistantDocument {
            id: Uuid::now_v7(),
            tenant_id: self.plan.tenant_id,
            plan_id: Some(self.plan.id),
            operation_id: Some(self.operation_id),
            source_key: item.key.clone(),
            bucket,
            object_key,
            collection,
            content_type: item.content_type.clone(),
            content_length: item.content_length,
            chunk_count: 0,
            created_at: Utc::now(),
        };
        self.store.insert_document(&document).await?;

        self.dispatch_ingestion(document.id);

        Ok(ItemOutcome::Completed {
            document_id: Some(document.id),
        })
    }

    /// Replace an existing document: clean up the stale version, then take
    /// the addition path for the new one. A fresh document id is minted; the
    /// old id is intentionally invalidated.
    pub async fn process_update(&self, item: &CrawledObject) -> Result<ItemOutcome> {
        if let Some(existing) = self
            .store
            .find_document_by_source(self.plan.id, &item.key)
            .await?
        {
            self.cleanup_document(&existing).await;
        }
        self.process_addition(item).await
    }

    /// Remove the document for an item that disappeared from the source.
    /// Counts as success whether or not a matching document existed.
    pub async fn process_deletion(&self, item: &CrawledObject) -> Result<ItemOutcome> {
        match self
            .store
            .find_document_by_source(self.plan.id, &item.key)
            .await?
        {
            Some(existing) => {
                self.cleanup_document(&existing).await;
                Ok(ItemOutcome::Completed {
                    document_id: Some(existing.id),
                })
            }
            None => {
                debug!("No document found for deleted item: {}", item.key);
                Ok(ItemOutcome::Completed { document_id: None })
            }
        }
    }

    /// Best-effort removal of a document and its derived state. Each step
    /// is caught and logged so partial cleanup never blocks the item it is
    /// nested inside.
    pub async fn cleanup_document(&self, document: &AssistantDocument) {
        match self.store.delete_document_chunks(document.id).await {
            Ok(removed) if removed > 0 => {
                debug!("Removed {} chunks for document {}", removed, document.id)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to remove chunks for document {}: {}", document.id, e),
        }

        if let Err(e) = self
            .storage
            .delete(document.bucket.as_deref(), &document.object_key)
            .await
        {
            warn!(
                "Failed to delete stored object {} for document {}: {}",
                document.object_key, document.id, e
            );
        }

        if let Err(e) = self.store.delete_document(document.id).await {
            warn!("Failed to delete document record {}: {}", document.id, e);
        }
    }

    /// Detached ingestion dispatch: the task is spawned and never awaited
    /// into the item outcome; its error is logged and otherwise ignored.
    fn dispatch_ingestion(&self, document_id: Uuid) {
        let ingestion = Arc::clone(&self.ingestion);
        tokio::spawn(async move {
            match ingestion.process_document(document_id).await {
                Ok(()) => info!("Ingestion triggered for document {}", document_id),
                Err(e) => warn!("Ingestion trigger failed for document {}: {}", document_id, e),
            }
        });
    }

    /// Bucket precedence: ingestion rule, then plan, then tenant default.
    async fn resolve_target(&self) -> Result<(Option<String>, Option<String>)> {
        let rule = match self.plan.ingestion_rule_id {
            Some(rule_id) => self.store.get_ingestion_rule(rule_id).await?,
            None => None,
        };
        let collection = rule.as_ref().and_then(|r| r.collection.clone());

        let mut bucket = rule
            .as_ref()
            .and_then(|r| r.bucket.clone())
            .or_else(|| self.plan.bucket.clone());
        if bucket.is_none() {
            bucket = self
                .store
                .get_tenant(self.plan.tenant_id)
                .await?
                .and_then(|t| t.default_bucket);
        }
        Ok((bucket, collection))
    }
}

/// Storage key for a crawled object: plan-scoped SHA-256 of the source key.
/// Deterministic, so an update overwrites the prior upload location only
/// after cleanup removed it.
pub fn object_key(plan_id: Uuid, source_key: &str) -> String {
    let digest = Sha256::digest(source_key.as_bytes());
    format!("{}/{}", plan_id, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentFilter, IngestionRule, RepositoryType, Tenant};
    use crate::store::{MemoryDocumentStore, MemoryIngestion, MemoryStorage};
    use std::time::Duration;

    fn plan() -> CrawlPlan {
        let mut plan = CrawlPlan::new(Uuid::now_v7(), "docs", RepositoryType::Web);
        plan.bucket = Some("crawl".to_string());
        plan
    }

    fn item(key: &str, len: i64) -> CrawledObject {
        CrawledObject {
            key: key.to_string(),
            content_type: "text/html".to_string(),
            content_length: len,
            payload: Some(vec![b'x'; len.max(0) as usize]),
            ..Default::default()
        }
    }

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        storage: Arc<MemoryStorage>,
        ingestion: Arc<MemoryIngestion>,
        processor: ItemProcessor,
    }

    fn fixture(plan: CrawlPlan) -> Fixture {
        let store = Arc::new(MemoryDocumentStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let ingestion = Arc::new(MemoryIngestion::new());
        let processor = ItemProcessor::new(
            plan,
            Uuid::now_v7(),
            store.clone(),
            storage.clone(),
            ingestion.clone(),
        );
        Fixture {
            store,
            storage,
            ingestion,
            processor,
        }
    }

    #[tokio::test]
    async fn test_addition_uploads_and_creates_document() {
        let plan = plan();
        let plan_id = plan.id;
        let f = fixture(plan);

        let outcome = f
            .processor
            .process_addition(&item("https://a.example/page", 4))
            .await
            .unwrap();

        let document_id = match outcome {
            ItemOutcome::Completed { document_id } => document_id.unwrap(),
            other => panic!("unexpected outcome: {other:?}"),
        };

        let key = object_key(plan_id, "https://a.example/page");
        assert!(f.storage.contains(Some("crawl"), &key));
        assert_eq!(f.store.document_count(), 1);

        // detached dispatch
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.ingestion.dispatched(), vec![document_id]);
    }

    #[tokio::test]
    async fn test_addition_filtered_item_is_skipped() {
        let mut plan = plan();
        plan.filter = ContentFilter {
            key_suffix: Some(".html".to_string()),
            ..Default::default()
        };
        let f = fixture(plan);

        let outcome = f
            .processor
            .process_addition(&item("https://a.example/img.png", 4))
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Skipped);
        assert_eq!(f.store.document_count(), 0);
        assert_eq!(f.storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_length_item_always_filtered() {
        let f = fixture(plan());
        let outcome = f
            .processor
            .process_addition(&item("https://a.example/empty", 0))
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_ingestion_failure_does_not_fail_item() {
        let f = fixture(plan());
        f.ingestion.fail(true);

        let outcome = f
            .processor
            .process_addition(&item("https://a.example/page", 4))
            .await
            .unwrap();
        assert!(matches!(outcome, ItemOutcome::Completed { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.ingestion.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_document_with_fresh_id() {
        let f = fixture(plan());
        let first = f
            .processor
            .process_addition(&item("https://a.example/page", 4))
            .await
            .unwrap();
        let ItemOutcome::Completed {
            document_id: Some(first_id),
        } = first
        else {
            panic!("expected completed addition");
        };
        f.store.seed_chunks(first_id, 3);

        let second = f
            .processor
            .process_update(&item("https://a.example/page", 8))
            .await
            .unwrap();
        let ItemOutcome::Completed {
            document_id: Some(second_id),
        } = second
        else {
            panic!("expected completed update");
        };

        assert_ne!(first_id, second_id);
        assert_eq!(f.store.document_count(), 1);
        // old chunks were removed during cleanup
        assert_eq!(f.store.delete_document_chunks(first_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deletion_is_idempotent() {
        let f = fixture(plan());
        f.processor
            .process_addition(&item("https://a.example/page", 4))
            .await
            .unwrap();

        let first = f
            .processor
            .process_deletion(&item("https://a.example/page", 4))
            .await
            .unwrap();
        assert!(matches!(
            first,
            ItemOutcome::Completed {
                document_id: Some(_)
            }
        ));
        assert_eq!(f.store.document_count(), 0);
        assert_eq!(f.storage.object_count(), 0);

        // no matching document: still a success
        let second = f
            .processor
            .process_deletion(&item("https://a.example/page", 4))
            .await
            .unwrap();
        assert_eq!(second, ItemOutcome::Completed { document_id: None });
    }

    #[tokio::test]
    async fn test_bucket_resolution_precedence() {
        let tenant_id = Uuid::now_v7();
        let rule_id = Uuid::now_v7();
        let mut plan = CrawlPlan::new(tenant_id, "docs", RepositoryType::Web);
        plan.ingestion_rule_id = Some(rule_id);
        let f = fixture(plan);
        f.store.add_tenant(Tenant {
            id: tenant_id,
            name: "t".to_string(),
            default_bucket: Some("tenant-bucket".to_string()),
        });
        f.store.add_rule(IngestionRule {
            id: rule_id,
            tenant_id,
            name: "r".to_string(),
            collection: Some("manuals".to_string()),
            bucket: None,
        });

        let (bucket, collection) = f.processor.resolve_target().await.unwrap();
        // plan has no bucket, rule has none either: tenant default wins
        assert_eq!(bucket.as_deref(), Some("tenant-bucket"));
        assert_eq!(collection.as_deref(), Some("manuals"));
    }

    #[tokio::test]
    async fn test_rule_bucket_overrides_plan_bucket() {
        let tenant_id = Uuid::now_v7();
        let rule_id = Uuid::now_v7();
        let mut plan = CrawlPlan::new(tenant_id, "docs", RepositoryType::Web);
        plan.bucket = Some("crawl".to_string());
        plan.ingestion_rule_id = Some(rule_id);
        let f = fixture(plan);
        f.store.add_rule(IngestionRule {
            id: rule_id,
            tenant_id,
            name: "r".to_string(),
            collection: Some("manuals".to_string()),
            bucket: Some("rule-bucket".to_string()),
        });

        let (bucket, collection) = f.processor.resolve_target().await.unwrap();
        assert_eq!(bucket.as_deref(), Some("rule-bucket"));
        assert_eq!(collection.as_deref(), Some("manuals"));
    }

    #[tokio::test]
    async fn test_upload_failure_propagates_to_caller() {
        let f = fixture(plan());
        f.storage.fail_uploads(true);
        let result = f
            .processor
            .process_addition(&item("https://a.example/page", 4))
            .await;
        assert!(result.is_err());
        assert_eq!(f.store.document_count(), 0);
    }
}
