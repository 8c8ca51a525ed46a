//! Repository walkers: pluggable enumeration of external repositories
//!
//! One walker implementation per repository type, selected by a type-keyed
//! factory so the runner stays repository-agnostic. Walkers are single-use:
//! a fresh instance is created for every run and `enumerate` consumes it.

pub mod web;

use crate::error::Result;
use crate::model::{CrawlPlan, CrawledObject, RepositoryType};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use web::{WebWalker, WebWalkerSettings};

/// Contract between the engine and a concrete repository walker
#[async_trait]
pub trait RepositoryWalker: Send {
    /// Lazily enumerate every item in the repository. Finite and not
    /// restartable; consumes the walker.
    fn enumerate(self: Box<Self>) -> BoxStream<'static, Result<CrawledObject>>;

    /// Cheap reachability check used before scheduling a full crawl.
    async fn validate_connectivity(&self) -> Result<bool>;

    /// Paged browsing outside a full crawl.
    async fn enumerate_contents(
        &self,
        max_items: usize,
        skip: usize,
    ) -> Result<Vec<CrawledObject>>;

    /// Whether hidden/system/temp entries should be dropped during
    /// enumeration. Web walkers return false: URLs are not filesystem paths.
    fn skips_system_entries(&self) -> bool {
        true
    }
}

/// Creates walkers keyed on the plan's repository type
pub trait WalkerFactory: Send + Sync {
    fn create(&self, plan: &CrawlPlan) -> Result<Box<dyn RepositoryWalker>>;
}

/// Factory over the closed set of built-in repository types
#[derive(Default)]
pub struct DefaultWalkerFactory;

impl WalkerFactory for DefaultWalkerFactory {
    fn create(&self, plan: &CrawlPlan) -> Result<Box<dyn RepositoryWalker>> {
        match plan.repository_type {
            RepositoryType::Web => Ok(Box::new(WebWalker::from_plan(plan)?)),
        }
    }
}

/// Hidden/system/temp filenames dropped by walkers that enumerate
/// filesystem-like repositories.
pub fn is_system_entry(key: &str) -> bool {
    let name = key
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(key)
        .to_ascii_lowercase();
    name.starts_with('.')
        || name.starts_with("~$")
        || name.ends_with(".tmp")
        || name == "thumbs.db"
        || name == "desktop.ini"
}
