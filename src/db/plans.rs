//! Crawl plan database operations

use crate::db::DbPool;
use crate::error::{CrawlError, Result};
use crate::model::{ContentFilter, CrawlPlan};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Row shape of the crawl_plans table; enums travel as text
#[derive(Debug, FromRow)]
struct PlanRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    repository_type: String,
    repository_settings: serde_json::Value,
    bucket: Option<String>,
    ingestion_rule_id: Option<Uuid>,
    schedule_interval: String,
    schedule_value: i32,
    filter: serde_json::Value,
    process_additions: bool,
    process_updates: bool,
    process_deletions: bool,
    max_concurrency: i32,
    retention_days: i32,
    state: String,
    last_crawl_start: Option<DateTime<Utc>>,
    last_crawl_finish: Option<DateTime<Utc>>,
    last_crawl_success: Option<bool>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for CrawlPlan {
    type Error = CrawlError;

    fn try_from(row: PlanRow) -> Result<Self> {
        let filter: ContentFilter = serde_json::from_value(row.filter)?;
        Ok(CrawlPlan {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            repository_type: row
                .repository_type
                .parse()
                .map_err(CrawlError::StoreError)?,
            repository_settings: row.repository_settings,
            bucket: row.bucket,
            ingestion_rule_id: row.ingestion_rule_id,
            schedule_interval: row
                .schedule_interval
                .parse()
                .map_err(CrawlError::StoreError)?,
            schedule_value: row.schedule_value.max(0) as u32,
            filter,
            process_additions: row.process_additions,
            process_updates: row.process_updates,
            process_deletions: row.process_deletions,
            max_concurrency: row.max_concurrency.max(1) as usize,
            retention_days: row.retention_days.max(0) as u32,
            state: row.state.parse().map_err(CrawlError::StoreError)?,
            last_crawl_start: row.last_crawl_start,
            last_crawl_finish: row.last_crawl_finish,
            last_crawl_success: row.last_crawl_success,
            created_at: row.created_at,
        })
    }
}

/// Insert a new crawl plan
pub async fn insert_plan(pool: &DbPool, plan: &CrawlPlan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crawl_plans (
            id, tenant_id, name, repository_type, repository_settings,
            bucket, ingestion_rule_id, schedule_interval, schedule_value,
            filter, process_additions, process_updates, process_deletions,
            max_concurrency, retention_days, state,
            last_crawl_start, last_crawl_finish, last_crawl_success, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        "#,
    )
    .bind(plan.id)
    .bind(plan.tenant_id)
    .bind(&plan.name)
    .bind(plan.repository_type.as_str())
    .bind(&plan.repository_settings)
    .bind(&plan.bucket)
    .bind(plan.ingestion_rule_id)
    .bind(plan.schedule_interval.as_str())
    .bind(plan.schedule_value as i32)
    .bind(serde_json::to_value(&plan.filter)?)
    .bind(plan.process_additions)
    .bind(plan.process_updates)
    .bind(plan.process_deletions)
    .bind(plan.max_concurrency as i32)
    .bind(plan.retention_days as i32)
    .bind(plan.state.as_str())
    .bind(plan.last_crawl_start)
    .bind(plan.last_crawl_finish)
    .bind(plan.last_crawl_success)
    .bind(plan.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a plan by ID
pub async fn get_plan_by_id(pool: &DbPool, plan_id: Uuid) -> Result<Option<CrawlPlan>> {
    let row = sqlx::query_as::<_, PlanRow>("SELECT * FROM crawl_plans WHERE id = $1")
        .bind(plan_id)
        .fetch_optional(pool)
        .await?;

    row.map(CrawlPlan::try_from).transpose()
}

/// List plans, oldest first, paginated
pub async fn list_plans(pool: &DbPool, limit: i64, offset: i64) -> Result<Vec<CrawlPlan>> {
    let rows = sqlx::query_as::<_, PlanRow>(
        "SELECT * FROM crawl_plans ORDER BY created_at ASC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CrawlPlan::try_from).collect()
}

/// Update a plan's mutable fields (settings, schedule, state, run outcome)
pub async fn update_plan(pool: &DbPool, plan: &CrawlPlan) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE crawl_plans
        SET name = $2,
            repository_settings = $3,
            bucket = $4,
            ingestion_rule_id = $5,
            schedule_interval = $6,
            schedule_value = $7,
            filter = $8,
            process_additions = $9,
            process_updates = $10,
            process_deletions = $11,
            max_concurrency = $12,
            retention_days = $13,
            state = $14,
            last_crawl_start = $15,
            last_crawl_finish = $16,
            last_crawl_success = $17
        WHERE id = $1
        "#,
    )
    .bind(plan.id)
    .bind(&plan.name)
    .bind(&plan.repository_settings)
    .bind(&plan.bucket)
    .bind(plan.ingestion_rule_id)
    .bind(plan.schedule_interval.as_str())
    .bind(plan.schedule_value as i32)
    .bind(serde_json::to_value(&plan.filter)?)
    .bind(plan.process_additions)
    .bind(plan.process_updates)
    .bind(plan.process_deletions)
    .bind(plan.max_concurrency as i32)
    .bind(plan.retention_days as i32)
    .bind(plan.state.as_str())
    .bind(plan.last_crawl_start)
    .bind(plan.last_crawl_finish)
    .bind(plan.last_crawl_success)
    .execute(pool)
    .await?;

    Ok(())
}
