//! Web repository walker
//!
//! Breadth-first same-host crawl starting at a configured root URL. Each
//! fetched page becomes one [`CrawledObject`] carrying the response bytes,
//! the MD5/SHA-1/SHA-256 ladder over them, and any ETag/Last-Modified
//! headers the server returned.

use crate::error::{CrawlError, Result};
use crate::model::CrawledObject;
use crate::walker::RepositoryWalker;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use md5::Md5;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Walker settings carried in the plan's opaque `repository_settings`
#[derive(Debug, Clone, Deserialize)]
pub struct WebWalkerSettings {
    pub root_url: String,
    /// Hard cap on pages fetched per enumeration
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_pages() -> usize {
    100
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

pub struct WebWalker {
    client: Client,
    settings: WebWalkerSettings,
    root: Url,
}

impl WebWalker {
    pub fn new(settings: WebWalkerSettings) -> Result<Self> {
        let root = Url::parse(&settings.root_url)
            .map_err(|_| CrawlError::InvalidUrl(settings.root_url.clone()))?;
        if root.host_str().is_none() {
            return Err(CrawlError::InvalidUrl(settings.root_url.clone()));
        }

        let client = Client::builder()
            .user_agent("crawl-engine/0.1")
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| CrawlError::FetchError {
                url: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            settings,
            root,
        })
    }

    pub fn from_plan(plan: &crate::model::CrawlPlan) -> Result<Self> {
        let settings: WebWalkerSettings =
            serde_json::from_value(plan.repository_settings.clone()).map_err(|e| {
                CrawlError::ConfigError(format!(
                    "invalid web repository settings for plan {}: {e}",
                    plan.id
                ))
            })?;
        Self::new(settings)
    }

    fn walk_state(&self) -> WalkState {
        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());
        WalkState {
            client: self.client.clone(),
            host: self.root.host_str().unwrap_or_default().to_lowercase(),
            queue,
            seen: HashSet::from([normalize_url(&self.root)]),
            fetched: 0,
            max_pages: self.settings.max_pages,
            max_retries: self.settings.max_retries,
        }
    }
}

#[async_trait]
impl RepositoryWalker for WebWalker {
    fn enumerate(self: Box<Self>) -> BoxStream<'static, Result<CrawledObject>> {
        let state = self.walk_state();
        futures::stream::unfold(state, |mut state| async move {
            let item = state.next_object().await?;
            Some((item, state))
        })
        .boxed()
    }

    async fn validate_connectivity(&self) -> Result<bool> {
        match self.client.get(self.root.clone()).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn enumerate_contents(
        &self,
        max_items: usize,
        skip: usize,
    ) -> Result<Vec<CrawledObject>> {
        let mut state = self.walk_state();
        let mut contents = Vec::new();
        let mut index = 0usize;
        while contents.len() < max_items {
            match state.next_object().await {
                Some(Ok(object)) => {
                    if index >= skip {
                        contents.push(object);
                    }
                    index += 1;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(contents)
    }

    // URLs are not filesystem paths; never drop "hidden" names
    fn skips_system_entries(&self) -> bool {
        false
    }
}

struct WalkState {
    client: Client,
    host: String,
    queue: VecDeque<Url>,
    seen: HashSet<String>,
    fetched: usize,
    max_pages: usize,
    max_retries: u32,
}

impl WalkState {
    /// Pull the next page. The root page failing is fatal; a dead discovered
    /// link is logged and skipped.
    async fn next_object(&mut self) -> Option<Result<CrawledObject>> {
        loop {
            if self.fetched >= self.max_pages {
                return None;
            }
            let url = self.queue.pop_front()?;
            let is_root = self.fetched == 0;

            match self.fetch_with_retry(&url).await {
                Ok(page) => {
                    self.fetched += 1;
                    let object = self.build_object(&url, &page);
                    if page.is_html() {
                        self.enqueue_links(&url, &page.bytes);
                    }
                    return Some(Ok(object));
                }
                Err(e) if is_root => return Some(Err(e)),
                Err(e) => {
                    warn!("Skipping unreachable page {}: {}", url, e);
                }
            }
        }
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<FetchedPage> {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = std::cmp::min(
                    Duration::from_secs(1) * 2u32.saturating_pow(attempt - 1),
                    Duration::from_secs(10),
                );
                warn!(
                    "Retry attempt {}/{} for {} after {:?}",
                    attempt, self.max_retries, url, delay
                );
                sleep(delay).await;
            }

            match self.fetch_once(url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    last_error = e.to_string();
                    // Client errors other than 429 will not succeed on retry
                    if let CrawlError::HttpStatusError { status, .. } = &e {
                        if (400..500).contains(status) && *status != 429 {
                            return Err(e);
                        }
                    }
                }
            }
        }

        Err(CrawlError::RetryExhausted {
            url: url.to_string(),
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CrawlError::FetchError {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "text/html".to_string());
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrawlError::FetchError {
                url: url.to_string(),
                source: e,
            })?
            .to_vec();

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(FetchedPage {
            bytes,
            content_type,
            etag,
            last_modified,
        })
    }

    fn build_object(&self, url: &Url, page: &FetchedPage) -> CrawledObject {
        CrawledObject {
            key: url.to_string(),
            content_type: page.content_type.clone(),
            content_length: page.bytes.len() as i64,
            md5: Some(hex::encode(Md5::digest(&page.bytes))),
            sha1: Some(hex::encode(Sha1::digest(&page.bytes))),
            sha256: Some(hex::encode(Sha256::digest(&page.bytes))),
            etag: page.etag.clone(),
            last_modified: page.last_modified,
            payload: Some(page.bytes.clone()),
            document_id: None,
            is_folder: false,
        }
    }

    fn enqueue_links(&mut self, base: &Url, html: &[u8]) {
        let body = String::from_utf8_lossy(html);
        for link in extract_links(&body, base) {
            if link.host_str().map(|h| h.to_lowercase()) != Some(self.host.clone()) {
                continue;
            }
            let normalized = normalize_url(&link);
            if self.seen.insert(normalized) {
                self.queue.push_back(link);
            }
        }
    }
}

struct FetchedPage {
    bytes: Vec<u8>,
    content_type: String,
    etag: Option<String>,
    last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

impl FetchedPage {
    fn is_html(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("text/html")
            || self.content_type.eq_ignore_ascii_case("application/xhtml+xml")
    }
}

/// Extract same-document anchors resolved against `base`.
///
/// Synchronous on purpose: the parsed DOM is not Send and must not live
/// across an await point.
fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        links.push(resolved);
    }
    links
}

fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_resolves_and_scopes() {
        let base = Url::parse("https://example.com/docs/").unwrap();
        let html = r##"
            <html><body>
                <a href="/docs/intro">Intro</a>
                <a href="guide.html#section">Guide</a>
                <a href="https://other.example/page">External</a>
                <a href="mailto:team@example.com">Mail</a>
            </body></html>
        "##;
        let links = extract_links(html, &base);
        let keys: Vec<String> = links.iter().map(|u| u.to_string()).collect();
        assert!(keys.contains(&"https://example.com/docs/intro".to_string()));
        assert!(keys.contains(&"https://example.com/docs/guide.html".to_string()));
        assert!(keys.contains(&"https://other.example/page".to_string()));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_normalize_url_drops_fragment_and_case() {
        let url = Url::parse("https://Example.com/Page#frag").unwrap();
        assert_eq!(normalize_url(&url), "https://example.com/page");
    }

    #[test]
    fn test_settings_defaults() {
        let settings: WebWalkerSettings =
            serde_json::from_value(serde_json::json!({ "root_url": "https://example.com" }))
                .unwrap();
        assert_eq!(settings.max_pages, 100);
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn test_invalid_root_url_rejected() {
        let settings: WebWalkerSettings =
            serde_json::from_value(serde_json::json!({ "root_url": "not a url" })).unwrap();
        assert!(WebWalker::new(settings).is_err());
    }

    #[test]
    fn test_hash_ladder_over_bytes() {
        let walker = WebWalker::new(
            serde_json::from_value(serde_json::json!({ "root_url": "https://example.com" }))
                .unwrap(),
        )
        .unwrap();
        let state = walker.walk_state();
        let page = FetchedPage {
            bytes: b"hello".to_vec(),
            content_type: "text/plain".to_string(),
            etag: None,
            last_modified: None,
        };
        let object = state.build_object(&Url::parse("https://example.com/x").unwrap(), &page);
        assert_eq!(object.content_length, 5);
        assert_eq!(object.md5.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(
            object.sha1.as_deref(),
            Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
        assert_eq!(
            object.sha256.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }
}
