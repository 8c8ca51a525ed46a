//! Crawl operation database operations

use crate::db::DbPool;
use crate::error::{CrawlError, Result};
use crate::model::{CrawlOperation, CrawlStatistics};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct OperationRow {
    id: Uuid,
    plan_id: Uuid,
    tenant_id: Uuid,
    state: String,
    start_utc: Option<DateTime<Utc>>,
    enumeration_start_utc: Option<DateTime<Utc>>,
    enumeration_finish_utc: Option<DateTime<Utc>>,
    retrieval_start_utc: Option<DateTime<Utc>>,
    retrieval_finish_utc: Option<DateTime<Utc>>,
    finish_utc: Option<DateTime<Utc>>,
    statistics: serde_json::Value,
    status_message: Option<String>,
    snapshot_path: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for CrawlOperation {
    type Error = CrawlError;

    fn try_from(row: OperationRow) -> Result<Self> {
        let statistics: CrawlStatistics = serde_json::from_value(row.statistics)?;
        Ok(CrawlOperation {
            id: row.id,
            plan_id: row.plan_id,
            tenant_id: row.tenant_id,
            state: row.state.parse().map_err(CrawlError::StoreError)?,
            start_utc: row.start_utc,
            enumeration_start_utc: row.enumeration_start_utc,
            enumeration_finish_utc: row.enumeration_finish_utc,
            retrieval_start_utc: row.retrieval_start_utc,
            retrieval_finish_utc: row.retrieval_finish_utc,
            finish_utc: row.finish_utc,
            statistics,
            status_message: row.status_message,
            snapshot_path: row.snapshot_path,
            created_at: row.created_at,
        })
    }
}

/// Insert a new crawl operation
pub async fn insert_operation(pool: &DbPool, operation: &CrawlOperation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crawl_operations (
            id, plan_id, tenant_id, state,
            start_utc, enumeration_start_utc, enumeration_finish_utc,
            retrieval_start_utc, retrieval_finish_utc, finish_utc,
            statistics, status_message, snapshot_path, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(operation.id)
    .bind(operation.plan_id)
    .bind(operation.tenant_id)
    .bind(operation.state.as_str())
    .bind(operation.start_utc)
    .bind(operation.enumeration_start_utc)
    .bind(operation.enumeration_finish_utc)
    .bind(operation.retrieval_start_utc)
    .bind(operation.retrieval_finish_utc)
    .bind(operation.finish_utc)
    .bind(serde_json::to_value(&operation.statistics)?)
    .bind(&operation.status_message)
    .bind(&operation.snapshot_path)
    .bind(operation.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an operation by ID
pub async fn get_operation_by_id(pool: &DbPool, id: Uuid) -> Result<Option<CrawlOperation>> {
    let row = sqlx::query_as::<_, OperationRow>("SELECT * FROM crawl_operations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(CrawlOperation::try_from).transpose()
}

/// Update an operation's state, phase timestamps and statistics
pub async fn update_operation(pool: &DbPool, operation: &CrawlOperation) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE crawl_operations
        SET state = $2,
            start_utc = $3,
            enumeration_start_utc = $4,
            enumeration_finish_utc = $5,
            retrieval_start_utc = $6,
            retrieval_finish_utc = $7,
            finish_utc = $8,
            statistics = $9,
            status_message = $10,
            snapshot_path = $11
        WHERE id = $1
        "#,
    )
    .bind(operation.id)
    .bind(operation.state.as_str())
    .bind(operation.start_utc)
    .bind(operation.enumeration_start_utc)
    .bind(operation.enumeration_finish_utc)
    .bind(operation.retrieval_start_utc)
    .bind(operation.retrieval_finish_utc)
    .bind(operation.finish_utc)
    .bind(serde_json::to_value(&operation.statistics)?)
    .bind(&operation.status_message)
    .bind(&operation.snapshot_path)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a plan's operations, most recent first
pub async fn list_operations_by_plan(pool: &DbPool, plan_id: Uuid) -> Result<Vec<CrawlOperation>> {
    let rows = sqlx::query_as::<_, OperationRow>(
        "SELECT * FROM crawl_operations WHERE plan_id = $1 ORDER BY created_at DESC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CrawlOperation::try_from).collect()
}

/// Operations older than the cutoff, eligible for retention cleanup
pub async fn list_expired_operations(
    pool: &DbPool,
    plan_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<Vec<CrawlOperation>> {
    let rows = sqlx::query_as::<_, OperationRow>(
        "SELECT * FROM crawl_operations WHERE plan_id = $1 AND created_at < $2",
    )
    .bind(plan_id)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CrawlOperation::try_from).collect()
}

/// Delete an operation row
pub async fn delete_operation(pool: &DbPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM crawl_operations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
