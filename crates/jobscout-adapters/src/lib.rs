//! Contracts and HTTP clients for the three remote services the pipeline talks
//! to: the scraping actor, the text-generation API and the spreadsheet.

use async_trait::async_trait;
use jobscout_core::Listing;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod apify;
pub mod completion;
pub mod search;
pub mod sheets;

pub use apify::{ApifyClient, PollSettings};
pub use completion::{provider_for, AnthropicProvider, OpenRouterProvider, ProviderKind};
pub use search::{expand_queries, jobs_per_url, search_url, SearchFilters};
pub use sheets::{GoogleSheetsTable, MemoryTable};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("api error: {0}")]
    Api(String),
    #[error("json deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// One batch of the scraping actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_num: usize,
    pub urls: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub job_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    pub urls_count: usize,
    pub count_per_url: u32,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub total_jobs: usize,
    pub batches: Vec<BatchReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub listings: Vec<Listing>,
    pub metadata: ScrapeMetadata,
}

/// Position of an existing remote row (0-based, relative to the first data row)
/// and the values that replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub position: usize,
    pub values: Vec<String>,
}

#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// Scrape every search URL, asking for `count_per_url` listings each.
    async fn scrape(&self, urls: &[String], count_per_url: u32) -> Result<ScrapeOutcome, AdapterError>;
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError>;
}

/// A keyed remote table with a header row followed by data rows.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Cheap reachability/auth check.
    async fn probe(&self) -> Result<(), AdapterError>;

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, AdapterError>;

    async fn write_header(&self, header: &[&str]) -> Result<(), AdapterError>;

    async fn update_rows(&self, updates: &[RowUpdate]) -> Result<(), AdapterError>;

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), AdapterError>;
}

/// Decode a JSON body, turning non-2xx statuses into [`AdapterError::HttpStatus`].
pub(crate) async fn read_json(
    response: reqwest::Response,
    context: &str,
) -> Result<serde_json::Value, AdapterError> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AdapterError::HttpStatus {
            status: status.as_u16(),
            url,
            body: truncate(&body, 500),
        });
    }

    serde_json::from_str(&body).map_err(|source| AdapterError::Deserialize {
        context: context.to_string(),
        source,
    })
}

pub(crate) fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
