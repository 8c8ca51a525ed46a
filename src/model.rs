//! Core data model: plans, operations, crawled objects, enumerations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Crawl Plans
// ============================================================================

/// Plan state - at most one runner may be active per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Stopped,
    Running,
}

impl PlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Stopped => "stopped",
            PlanState::Running => "running",
        }
    }
}

impl FromStr for PlanState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(PlanState::Stopped),
            "running" => Ok(PlanState::Running),
            other => Err(format!("unknown plan state: {other}")),
        }
    }
}

/// Repository type - closed set, keys the walker factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Web,
}

impl RepositoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryType::Web => "web",
        }
    }
}

impl FromStr for RepositoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "web" => Ok(RepositoryType::Web),
            other => Err(format!("unknown repository type: {other}")),
        }
    }
}

/// Schedule interval kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInterval {
    OneTime,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::OneTime => "one_time",
            ScheduleInterval::Minutes => "minutes",
            ScheduleInterval::Hours => "hours",
            ScheduleInterval::Days => "days",
            ScheduleInterval::Weeks => "weeks",
        }
    }

    /// Period between runs. `None` for one-time plans.
    pub fn period(&self, value: u32) -> Option<chrono::Duration> {
        let value = i64::from(value);
        match self {
            ScheduleInterval::OneTime => None,
            ScheduleInterval::Minutes => Some(chrono::Duration::minutes(value)),
            ScheduleInterval::Hours => Some(chrono::Duration::hours(value)),
            ScheduleInterval::Days => Some(chrono::Duration::days(value)),
            ScheduleInterval::Weeks => Some(chrono::Duration::days(value * 7)),
        }
    }
}

impl FromStr for ScheduleInterval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(ScheduleInterval::OneTime),
            "minutes" => Ok(ScheduleInterval::Minutes),
            "hours" => Ok(ScheduleInterval::Hours),
            "days" => Ok(ScheduleInterval::Days),
            "weeks" => Ok(ScheduleInterval::Weeks),
            other => Err(format!("unknown schedule interval: {other}")),
        }
    }
}

/// Content filter applied to additions/updates before processing.
///
/// Absent clauses are vacuously true. A content length of zero always fails
/// the filter regardless of configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentFilter {
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub key_suffix: Option<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub min_length: Option<i64>,
    #[serde(default)]
    pub max_length: Option<i64>,
}

impl ContentFilter {
    pub fn matches(&self, object: &CrawledObject) -> bool {
        if object.content_length <= 0 {
            return false;
        }
        if let Some(prefix) = &self.key_prefix {
            if !object.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.key_suffix {
            if !object.key.ends_with(suffix.as_str()) {
                return false;
            }
        }
        if !self.content_types.is_empty()
            && !self
                .content_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&object.content_type))
        {
            return false;
        }
        if let Some(min) = self.min_length {
            if object.content_length < min {
                return false;
            }
        }
        if let Some(max) = self.max_length {
            if object.content_length > max {
                return false;
            }
        }
        true
    }
}

/// CrawlPlan - durable crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPlan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub repository_type: RepositoryType,
    /// Repository-specific settings, opaque to the engine
    pub repository_settings: serde_json::Value,
    /// Target bucket override; falls back to the tenant default
    pub bucket: Option<String>,
    pub ingestion_rule_id: Option<Uuid>,
    pub schedule_interval: ScheduleInterval,
    pub schedule_value: u32,
    pub filter: ContentFilter,
    pub process_additions: bool,
    pub process_updates: bool,
    pub process_deletions: bool,
    pub max_concurrency: usize,
    pub retention_days: u32,
    pub state: PlanState,
    pub last_crawl_start: Option<DateTime<Utc>>,
    pub last_crawl_finish: Option<DateTime<Utc>>,
    pub last_crawl_success: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl CrawlPlan {
    /// Plan skeleton with engine defaults; callers fill in schedule/filter/toggles.
    pub fn new(tenant_id: Uuid, name: &str, repository_type: RepositoryType) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            name: name.to_string(),
            repository_type,
            repository_settings: serde_json::Value::Null,
            bucket: None,
            ingestion_rule_id: None,
            schedule_interval: ScheduleInterval::OneTime,
            schedule_value: 1,
            filter: ContentFilter::default(),
            process_additions: true,
            process_updates: true,
            process_deletions: true,
            max_concurrency: 4,
            retention_days: 30,
            state: PlanState::Stopped,
            last_crawl_start: None,
            last_crawl_finish: None,
            last_crawl_success: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Crawl Operations
// ============================================================================

/// Operation state machine.
///
/// Linear happy path: NotStarted -> Starting -> Enumerating -> Retrieving ->
/// Success. Failed/Canceled are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    NotStarted,
    Starting,
    Enumerating,
    Retrieving,
    Success,
    Failed,
    Stopped,
    Canceled,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::NotStarted => "not_started",
            OperationState::Starting => "starting",
            OperationState::Enumerating => "enumerating",
            OperationState::Retrieving => "retrieving",
            OperationState::Success => "success",
            OperationState::Failed => "failed",
            OperationState::Stopped => "stopped",
            OperationState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Success | OperationState::Failed | OperationState::Canceled
        )
    }
}

impl FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(OperationState::NotStarted),
            "starting" => Ok(OperationState::Starting),
            "enumerating" => Ok(OperationState::Enumerating),
            "retrieving" => Ok(OperationState::Retrieving),
            "success" => Ok(OperationState::Success),
            "failed" => Ok(OperationState::Failed),
            "stopped" => Ok(OperationState::Stopped),
            "canceled" => Ok(OperationState::Canceled),
            other => Err(format!("unknown operation state: {other}")),
        }
    }
}

/// CrawlOperation - one execution of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOperation {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub tenant_id: Uuid,
    pub state: OperationState,
    pub start_utc: Option<DateTime<Utc>>,
    pub enumeration_start_utc: Option<DateTime<Utc>>,
    pub enumeration_finish_utc: Option<DateTime<Utc>>,
    pub retrieval_start_utc: Option<DateTime<Utc>>,
    pub retrieval_finish_utc: Option<DateTime<Utc>>,
    pub finish_utc: Option<DateTime<Utc>>,
    pub statistics: CrawlStatistics,
    pub status_message: Option<String>,
    pub snapshot_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CrawlOperation {
    /// Operation ids are UUIDv7: time-ordered and lexicographically sortable,
    /// which the snapshot store's latest-by-filename selection relies on.
    pub fn new(plan: &CrawlPlan) -> Self {
        Self {
            id: Uuid::now_v7(),
            plan_id: plan.id,
            tenant_id: plan.tenant_id,
            state: OperationState::NotStarted,
            start_utc: None,
            enumeration_start_utc: None,
            enumeration_finish_utc: None,
            retrieval_start_utc: None,
            retrieval_finish_utc: None,
            finish_utc: None,
            statistics: CrawlStatistics::default(),
            status_message: None,
            snapshot_path: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Crawled Objects
// ============================================================================

/// CrawledObject - one discovered item.
///
/// Keys are case-insensitively unique within a run. Payload bytes are held
/// only while the run is processing; snapshots are always payload-free.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawledObject {
    pub key: String,
    pub content_type: String,
    pub content_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub document_id: Option<Uuid>,
    #[serde(default)]
    pub is_folder: bool,
}

impl CrawledObject {
    /// Clone with the payload stripped - the only form ever persisted.
    pub fn without_payload(&self) -> Self {
        let mut stripped = self.clone();
        stripped.payload = None;
        stripped
    }

    /// Case-folded key used for indexing and uniqueness.
    pub fn normalized_key(&self) -> String {
        self.key.to_lowercase()
    }
}

// ============================================================================
// Enumerations & Statistics
// ============================================================================

/// Aggregate counts and byte totals per delta category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub enumerated_count: u64,
    pub enumerated_bytes: u64,
    pub added_count: u64,
    pub added_bytes: u64,
    pub updated_count: u64,
    pub updated_bytes: u64,
    pub deleted_count: u64,
    pub deleted_bytes: u64,
    pub unchanged_count: u64,
    pub unchanged_bytes: u64,
    pub success_count: u64,
    pub success_bytes: u64,
    pub failed_count: u64,
    pub failed_bytes: u64,
}

fn totals(objects: &[CrawledObject]) -> (u64, u64) {
    let bytes = objects
        .iter()
        .map(|o| o.content_length.max(0) as u64)
        .sum();
    (objects.len() as u64, bytes)
}

/// CrawlEnumeration - one run's full classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlEnumeration {
    pub all_files: Vec<CrawledObject>,
    pub added: Vec<CrawledObject>,
    pub changed: Vec<CrawledObject>,
    pub deleted: Vec<CrawledObject>,
    pub unchanged: Vec<CrawledObject>,
    pub success: Vec<CrawledObject>,
    pub failed: Vec<CrawledObject>,
    pub statistics: CrawlStatistics,
}

impl CrawlEnumeration {
    /// Recompute aggregate statistics from the classified sets.
    pub fn recompute_statistics(&mut self) {
        let (enumerated_count, enumerated_bytes) = totals(&self.all_files);
        let (added_count, added_bytes) = totals(&self.added);
        let (updated_count, updated_bytes) = totals(&self.changed);
        let (deleted_count, deleted_bytes) = totals(&self.deleted);
        let (unchanged_count, unchanged_bytes) = totals(&self.unchanged);
        let (success_count, success_bytes) = totals(&self.success);
        let (failed_count, failed_bytes) = totals(&self.failed);
        self.statistics = CrawlStatistics {
            enumerated_count,
            enumerated_bytes,
            added_count,
            added_bytes,
            updated_count,
            updated_bytes,
            deleted_count,
            deleted_bytes,
            unchanged_count,
            unchanged_bytes,
            success_count,
            success_bytes,
            failed_count,
            failed_bytes,
        };
    }

    /// Payload-free projection - the only form ever written to disk.
    pub fn without_payload(&self) -> Self {
        let strip = |objects: &[CrawledObject]| -> Vec<CrawledObject> {
            objects.iter().map(CrawledObject::without_payload).collect()
        };
        Self {
            all_files: strip(&self.all_files),
            added: strip(&self.added),
            changed: strip(&self.changed),
            deleted: strip(&self.deleted),
            unchanged: strip(&self.unchanged),
            success: strip(&self.success),
            failed: strip(&self.failed),
            statistics: self.statistics,
        }
    }
}

// ============================================================================
// External collaborator rows
// ============================================================================

/// AssistantDocument - a document record created from a crawled object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    /// Original repository key (URL/path) this document was crawled from
    pub source_key: String,
    pub bucket: Option<String>,
    pub object_key: String,
    pub collection: Option<String>,
    pub content_type: String,
    pub content_length: i64,
    pub chunk_count: i32,
    pub created_at: DateTime<Utc>,
}

/// IngestionRule - maps crawled content into a collection/bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub collection: Option<String>,
    pub bucket: Option<String>,
}

/// Tenant - owns plans and supplies the default bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub default_bucket: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &str, len: i64, content_type: &str) -> CrawledObject {
        CrawledObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            content_length: len,
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_rejects_zero_length() {
        let filter = ContentFilter::default();
        assert!(!filter.matches(&object("https://a.example/x", 0, "text/html")));
        assert!(filter.matches(&object("https://a.example/x", 1, "text/html")));
    }

    #[test]
    fn test_filter_prefix_suffix() {
        let filter = ContentFilter {
            key_prefix: Some("https://a.example/docs".to_string()),
            key_suffix: Some(".html".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&object("https://a.example/docs/intro.html", 10, "text/html")));
        assert!(!filter.matches(&object("https://a.example/blog/intro.html", 10, "text/html")));
        assert!(!filter.matches(&object("https://a.example/docs/intro.pdf", 10, "text/html")));
    }

    #[test]
    fn test_filter_content_type_allow_list() {
        let filter = ContentFilter {
            content_types: vec!["text/html".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&object("k", 10, "TEXT/HTML")));
        assert!(!filter.matches(&object("k", 10, "application/pdf")));
    }

    #[test]
    fn test_filter_length_bounds() {
        let filter = ContentFilter {
            min_length: Some(5),
            max_length: Some(100),
            ..Default::default()
        };
        assert!(!filter.matches(&object("k", 4, "text/html")));
        assert!(filter.matches(&object("k", 5, "text/html")));
        assert!(filter.matches(&object("k", 100, "text/html")));
        assert!(!filter.matches(&object("k", 101, "text/html")));
    }

    #[test]
    fn test_schedule_period() {
        assert_eq!(ScheduleInterval::OneTime.period(3), None);
        assert_eq!(
            ScheduleInterval::Minutes.period(15),
            Some(chrono::Duration::minutes(15))
        );
        assert_eq!(
            ScheduleInterval::Weeks.period(2),
            Some(chrono::Duration::days(14))
        );
    }

    #[test]
    fn test_operation_ids_sort_by_creation_time() {
        let plan = CrawlPlan::new(Uuid::now_v7(), "p", RepositoryType::Web);
        let first = CrawlOperation::new(&plan);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = CrawlOperation::new(&plan);
        assert!(second.id.to_string() > first.id.to_string());
    }

    #[test]
    fn test_without_payload_strips_bytes() {
        let mut enumeration = CrawlEnumeration::default();
        let mut obj = object("k", 3, "text/html");
        obj.payload = Some(vec![1, 2, 3]);
        enumeration.all_files.push(obj);
        let stripped = enumeration.without_payload();
        assert!(stripped.all_files[0].payload.is_none());
        assert_eq!(stripped.all_files[0].content_length, 3);
    }

    #[test]
    fn test_recompute_statistics() {
        let mut enumeration = CrawlEnumeration::default();
        enumeration.all_files.push(object("a", 10, "text/html"));
        enumeration.all_files.push(object("b", 20, "text/html"));
        enumeration.added.push(object("a", 10, "text/html"));
        enumeration.recompute_statistics();
        assert_eq!(enumeration.statistics.enumerated_count, 2);
        assert_eq!(enumeration.statistics.enumerated_bytes, 30);
        assert_eq!(enumeration.statistics.added_count, 1);
        assert_eq!(enumeration.statistics.added_bytes, 10);
    }
}
