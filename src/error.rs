//! Error types for crawl-engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Failed to fetch URL: {url}")]
    FetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for URL: {url}")]
    HttpStatusError { url: String, status: u16 },

    #[error("Failed to fetch URL after {attempts} attempts: {url} (last error: {last_error})")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Walker error: {0}")]
    WalkerError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Document store error: {0}")]
    StoreError(String),

    #[error("Crawl canceled")]
    Canceled,

    #[error("Item processing panicked: {0}")]
    ProcessingPanic(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("File system error")]
    FsError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
