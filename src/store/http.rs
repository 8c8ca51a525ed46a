//! HTTP ingestion trigger
//!
//! Posts the created document id to the downstream ingestion endpoint. The
//! processor dispatches this fire-and-forget; failures here are logged by
//! the dispatcher and never fail the crawl item.

use crate::error::{CrawlError, Result};
use crate::store::IngestionTrigger;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

pub struct HttpIngestionTrigger {
    client: Client,
    endpoint: String,
}

impl HttpIngestionTrigger {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::ConfigError(format!("http client init: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl IngestionTrigger for HttpIngestionTrigger {
    async fn process_document(&self, document_id: Uuid) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "document_id": document_id }))
            .send()
            .await
            .map_err(|e| CrawlError::FetchError {
                url: self.endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatusError {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
