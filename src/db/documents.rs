//! Document, chunk, ingestion rule and tenant database operations

use crate::db::DbPool;
use crate::error::Result;
use crate::model::{AssistantDocument, IngestionRule, Tenant};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    tenant_id: Uuid,
    plan_id: Option<Uuid>,
    operation_id: Option<Uuid>,
    source_key: String,
    bucket: Option<String>,
    object_key: String,
    collection: Option<String>,
    content_type: String,
    content_length: i64,
    chunk_count: i32,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for AssistantDocument {
    fn from(row: DocumentRow) -> Self {
        AssistantDocument {
            id: row.id,
            tenant_id: row.tenant_id,
            plan_id: row.plan_id,
            operation_id: row.operation_id,
            source_key: row.source_key,
            bucket: row.bucket,
            object_key: row.object_key,
            collection: row.collection,
            content_type: row.content_type,
            content_length: row.content_length,
            chunk_count: row.chunk_count,
            created_at: row.created_at,
        }
    }
}

/// Insert a new document record
pub async fn insert_document(pool: &DbPool, document: &AssistantDocument) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assistant_documents (
            id, tenant_id, plan_id, operation_id, source_key,
            bucket, object_key, collection, content_type,
            content_length, chunk_count, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(document.id)
    .bind(document.tenant_id)
    .bind(document.plan_id)
    .bind(document.operation_id)
    .bind(&document.source_key)
    .bind(&document.bucket)
    .bind(&document.object_key)
    .bind(&document.collection)
    .bind(&document.content_type)
    .bind(document.content_length)
    .bind(document.chunk_count)
    .bind(document.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a plan's document by its source key, case-insensitively
pub async fn find_document_by_source(
    pool: &DbPool,
    plan_id: Uuid,
    source_key: &str,
) -> Result<Option<AssistantDocument>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT * FROM assistant_documents WHERE plan_id = $1 AND lower(source_key) = lower($2)",
    )
    .bind(plan_id)
    .bind(source_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(AssistantDocument::from))
}

/// Delete a document row
pub async fn delete_document(pool: &DbPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM assistant_documents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a document's chunks; returns how many were removed
pub async fn delete_chunks_by_document(pool: &DbPool, document_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
        .bind(document_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[derive(Debug, FromRow)]
struct IngestionRuleRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    collection: Option<String>,
    bucket: Option<String>,
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    default_bucket: Option<String>,
}

/// Get an ingestion rule by ID
pub async fn get_ingestion_rule_by_id(pool: &DbPool, id: Uuid) -> Result<Option<IngestionRule>> {
    let row = sqlx::query_as::<_, IngestionRuleRow>(
        "SELECT id, tenant_id, name, collection, bucket FROM ingestion_rules WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| IngestionRule {
        id: r.id,
        tenant_id: r.tenant_id,
        name: r.name,
        collection: r.collection,
        bucket: r.bucket,
    }))
}

/// Get a tenant by ID
pub async fn get_tenant_by_id(pool: &DbPool, id: Uuid) -> Result<Option<Tenant>> {
    let row = sqlx::query_as::<_, TenantRow>(
        "SELECT id, name, default_bucket FROM tenants WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Tenant {
        id: r.id,
        name: r.name,
        default_bucket: r.default_bucket,
    }))
}
