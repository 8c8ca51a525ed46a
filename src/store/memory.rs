//! In-memory collaborators for tests and local single-process runs

use crate::error::{CrawlError, Result};
use crate::model::{AssistantDocument, CrawlOperation, CrawlPlan, IngestionRule, Tenant};
use crate::store::{DocumentStore, IngestionTrigger, StorageService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Mutex-backed document store
#[derive(Default)]
pub struct MemoryDocumentStore {
    plans: Mutex<HashMap<Uuid, CrawlPlan>>,
    operations: Mutex<HashMap<Uuid, CrawlOperation>>,
    documents: Mutex<HashMap<Uuid, AssistantDocument>>,
    chunks: Mutex<HashMap<Uuid, u64>>,
    rules: Mutex<HashMap<Uuid, IngestionRule>>,
    tenants: Mutex<HashMap<Uuid, Tenant>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, rule: IngestionRule) {
        self.rules.lock().unwrap().insert(rule.id, rule);
    }

    pub fn add_tenant(&self, tenant: Tenant) {
        self.tenants.lock().unwrap().insert(tenant.id, tenant);
    }

    /// Pretend a document already has downstream chunk records.
    pub fn seed_chunks(&self, document_id: Uuid, count: u64) {
        self.chunks.lock().unwrap().insert(document_id, count);
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_plan(&self, plan: &CrawlPlan) -> Result<()> {
        self.plans.lock().unwrap().insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<CrawlPlan>> {
        Ok(self.plans.lock().unwrap().get(&id).cloned())
    }

    async fn list_plans(&self, limit: i64, offset: i64) -> Result<Vec<CrawlPlan>> {
        let mut plans: Vec<CrawlPlan> = self.plans.lock().unwrap().values().cloned().collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_plan(&self, plan: &CrawlPlan) -> Result<()> {
        self.plans.lock().unwrap().insert(plan.id, plan.clone());
        Ok(())
    }

    async fn insert_operation(&self, operation: &CrawlOperation) -> Result<()> {
        self.operations
            .lock()
            .unwrap()
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<CrawlOperation>> {
        Ok(self.operations.lock().unwrap().get(&id).cloned())
    }

    async fn update_operation(&self, operation: &CrawlOperation) -> Result<()> {
        self.operations
            .lock()
            .unwrap()
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn list_operations(&self, plan_id: Uuid) -> Result<Vec<CrawlOperation>> {
        let mut operations: Vec<CrawlOperation> = self
            .operations
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.plan_id == plan_id)
            .cloned()
            .collect();
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(operations)
    }

    async fn expired_operations(
        &self,
        plan_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CrawlOperation>> {
        Ok(self
            .operations
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.plan_id == plan_id && o.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_operation(&self, id: Uuid) -> Result<()> {
        self.operations.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn insert_document(&self, document: &AssistantDocument) -> Result<()> {
        self.documents
            .lock()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn find_document_by_source(
        &self,
        plan_id: Uuid,
        source_key: &str,
    ) -> Result<Option<AssistantDocument>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .values()
            .find(|d| d.plan_id == Some(plan_id) && d.source_key.eq_ignore_ascii_case(source_key))
            .cloned())
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        self.documents.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<u64> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .remove(&document_id)
            .unwrap_or(0))
    }

    async fn get_ingestion_rule(&self, id: Uuid) -> Result<Option<IngestionRule>> {
        Ok(self.rules.lock().unwrap().get(&id).cloned())
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.tenants.lock().unwrap().get(&id).cloned())
    }
}

/// In-memory object storage keyed by `bucket/key`, with a failure switch
/// for exercising item-level error isolation.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    fn object_id(bucket: Option<&str>, key: &str) -> String {
        format!("{}/{}", bucket.unwrap_or("default"), key)
    }

    pub fn contains(&self, bucket: Option<&str>, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&Self::object_id(bucket, key))
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn upload(
        &self,
        bucket: Option<&str>,
        key: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(CrawlError::StorageError("upload failure injected".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(Self::object_id(bucket, key), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, bucket: Option<&str>, key: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&Self::object_id(bucket, key));
        Ok(())
    }
}

/// Records ingestion dispatches; can be made to fail to prove the crawl
/// outcome is unaffected.
#[derive(Default)]
pub struct MemoryIngestion {
    dispatched: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl MemoryIngestion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<Uuid> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionTrigger for MemoryIngestion {
    async fn process_document(&self, document_id: Uuid) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CrawlError::StoreError("ingestion failure injected".to_string()));
        }
        self.dispatched.lock().unwrap().push(document_id);
        Ok(())
    }
}
