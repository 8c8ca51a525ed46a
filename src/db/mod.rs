//! Database module for crawl-engine
//!
//! PostgreSQL persistence for crawl plans, operations, and the document
//! records the processor creates. `PgDocumentStore` adapts the per-table
//! operation modules to the [`DocumentStore`](crate::store::DocumentStore)
//! seam the engine consumes.

pub mod connection;
pub mod documents;
pub mod operations;
pub mod plans;

pub use connection::{create_pool, create_pool_from_env, DbPool};

use crate::error::Result;
use crate::model::{AssistantDocument, CrawlOperation, CrawlPlan, IngestionRule, Tenant};
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Postgres-backed document store
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_plan(&self, plan: &CrawlPlan) -> Result<()> {
        plans::insert_plan(&self.pool, plan).await
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<CrawlPlan>> {
        plans::get_plan_by_id(&self.pool, id).await
    }

    async fn list_plans(&self, limit: i64, offset: i64) -> Result<Vec<CrawlPlan>> {
        plans::list_plans(&self.pool, limit, offset).await
    }

    async fn update_plan(&self, plan: &CrawlPlan) -> Result<()> {
        plans::update_plan(&self.pool, plan).await
    }

    async fn insert_operation(&self, operation: &CrawlOperation) -> Result<()> {
        operations::insert_operation(&self.pool, operation).await
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<CrawlOperation>> {
        operations::get_operation_by_id(&self.pool, id).await
    }

    async fn update_operation(&self, operation: &CrawlOperation) -> Result<()> {
        operations::update_operation(&self.pool, operation).await
    }

    async fn list_operations(&self, plan_id: Uuid) -> Result<Vec<CrawlOperation>> {
        operations::list_operations_by_plan(&self.pool, plan_id).await
    }

    async fn expired_operations(
        &self,
        plan_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CrawlOperation>> {
        operations::list_expired_operations(&self.pool, plan_id, cutoff).await
    }

    async fn delete_operation(&self, id: Uuid) -> Result<()> {
        operations::delete_operation(&self.pool, id).await
    }

    async fn insert_document(&self, document: &AssistantDocument) -> Result<()> {
        documents::insert_document(&self.pool, document).await
    }

    async fn find_document_by_source(
        &self,
        plan_id: Uuid,
        source_key: &str,
    ) -> Result<Option<AssistantDocument>> {
        documents::find_document_by_source(&self.pool, plan_id, source_key).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        documents::delete_document(&self.pool, id).await
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<u64> {
        documents::delete_chunks_by_document(&self.pool, document_id).await
    }

    async fn get_ingestion_rule(&self, id: Uuid) -> Result<Option<IngestionRule>> {
        documents::get_ingestion_rule_by_id(&self.pool, id).await
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        documents::get_tenant_by_id(&self.pool, id).await
    }
}
