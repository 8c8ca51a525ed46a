//! External collaborator interfaces
//!
//! The engine consumes relational persistence, object storage, and the
//! downstream ingestion pipeline only through these traits. Postgres-backed
//! persistence lives in [`crate::db`]; in-memory implementations for tests
//! and local runs live in [`memory`].

pub mod fs_storage;
pub mod http;
pub mod memory;

use crate::error::Result;
use crate::model::{AssistantDocument, CrawlOperation, CrawlPlan, IngestionRule, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use fs_storage::FsStorageService;
pub use http::HttpIngestionTrigger;
pub use memory::{MemoryDocumentStore, MemoryIngestion, MemoryStorage};

/// Relational persistence for plans, operations, and documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Plans
    async fn insert_plan(&self, plan: &CrawlPlan) -> Result<()>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<CrawlPlan>>;
    async fn list_plans(&self, limit: i64, offset: i64) -> Result<Vec<CrawlPlan>>;
    async fn update_plan(&self, plan: &CrawlPlan) -> Result<()>;

    // Operations
    async fn insert_operation(&self, operation: &CrawlOperation) -> Result<()>;
    async fn get_operation(&self, id: Uuid) -> Result<Option<CrawlOperation>>;
    async fn update_operation(&self, operation: &CrawlOperation) -> Result<()>;
    /// Operations for a plan, most recent first.
    async fn list_operations(&self, plan_id: Uuid) -> Result<Vec<CrawlOperation>>;
    /// Operations for a plan created before `cutoff`.
    async fn expired_operations(
        &self,
        plan_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CrawlOperation>>;
    async fn delete_operation(&self, id: Uuid) -> Result<()>;

    // Documents
    async fn insert_document(&self, document: &AssistantDocument) -> Result<()>;
    async fn find_document_by_source(
        &self,
        plan_id: Uuid,
        source_key: &str,
    ) -> Result<Option<AssistantDocument>>;
    async fn delete_document(&self, id: Uuid) -> Result<()>;
    /// Remove downstream chunk/embedding records; returns rows removed.
    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<u64>;

    // Rules & tenants
    async fn get_ingestion_rule(&self, id: Uuid) -> Result<Option<IngestionRule>>;
    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;
}

/// Object/blob storage for crawled payloads
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn upload(
        &self,
        bucket: Option<&str>,
        key: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<()>;

    async fn delete(&self, bucket: Option<&str>, key: &str) -> Result<()>;
}

/// Downstream ingestion pipeline trigger.
///
/// Dispatched fire-and-forget by the processor; its outcome never affects
/// the crawl result.
#[async_trait]
pub trait IngestionTrigger: Send + Sync {
    async fn process_document(&self, document_id: Uuid) -> Result<()>;
}
