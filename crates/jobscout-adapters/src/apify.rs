//! Apify actor client: start a run per URL batch, poll it, download its dataset.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobscout_core::Listing;
use jobscout_storage::HttpClientConfig;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{read_json, trim_base_url, AdapterError, BatchReport, ScrapeMetadata, ScrapeOutcome, ScrapeProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.apify.com";
pub const DEFAULT_ACTOR: &str = "curious_coder~linkedin-jobs-scraper";

/// The actor rejects requests for fewer listings than this per URL.
pub const MIN_COUNT_PER_URL: u32 = 100;

const TERMINAL_STATUSES: [&str; 4] = ["SUCCEEDED", "FAILED", "TIMED-OUT", "ABORTED"];

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub batch_size: usize,
    pub interval: Duration,
    pub max_wait: Duration,
    pub batch_pause: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(300),
            batch_pause: Duration::from_secs(5),
        }
    }
}

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    actor: String,
    poll: PollSettings,
}

impl ApifyClient {
    pub fn new(token: &str, http: &HttpClientConfig) -> Result<Self, AdapterError> {
        Self::with_base_url(token, http, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: &str,
        http: &HttpClientConfig,
        base_url: &str,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http.build_client()?,
            token: token.to_string(),
            base_url: trim_base_url(base_url),
            actor: DEFAULT_ACTOR.to_string(),
            poll: PollSettings::default(),
        })
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    async fn start_run(&self, urls: &[String], count: u32) -> Result<String, AdapterError> {
        let url = format!("{}/v2/acts/{}/runs?waitForFinish=60", self.base_url, self.actor);
        let input = json!({
            "urls": urls,
            "count": count,
            "scrapeCompany": true,
            "debugLog": false,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&input)
            .send()
            .await?;
        let body = read_json(response, "start actor run").await?;

        body.pointer("/data/id")
            .and_then(JsonValue::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| AdapterError::Api(format!("no run id in actor response: {body}")))
    }

    async fn run_status(&self, run_id: &str) -> Result<String, AdapterError> {
        let url = format!("{}/v2/actor-runs/{run_id}", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let body = read_json(response, "actor run status").await?;
        Ok(body
            .pointer("/data/status")
            .and_then(JsonValue::as_str)
            .unwrap_or("UNKNOWN")
            .to_string())
    }

    /// Poll until the run reaches a terminal status or `max_wait` elapses.
    async fn wait_for_run(&self, run_id: &str) -> Result<String, AdapterError> {
        let mut waited = Duration::ZERO;
        loop {
            let status = self.run_status(run_id).await?;
            info!(run_id, %status, "actor run status");
            if TERMINAL_STATUSES.contains(&status.as_str()) || waited >= self.poll.max_wait {
                return Ok(status);
            }
            tokio::time::sleep(self.poll.interval).await;
            waited += self.poll.interval.max(Duration::from_millis(1));
        }
    }

    async fn dataset_items(&self, run_id: &str) -> Result<Vec<Listing>, AdapterError> {
        let url = format!(
            "{}/v2/actor-runs/{run_id}/dataset/items?format=json",
            self.base_url
        );
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let body = read_json(response, "actor dataset items").await?;

        let JsonValue::Array(items) = body else {
            return Err(AdapterError::Api(format!(
                "dataset for run {run_id} is not a JSON array"
            )));
        };

        let mut listings = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Listing>(item) {
                Ok(listing) => listings.push(listing),
                Err(err) => warn!(run_id, error = %err, "skipping malformed dataset item"),
            }
        }
        Ok(listings)
    }

    async fn run_batch(&self, urls: &[String], count: u32) -> Result<Vec<Listing>, AdapterError> {
        let run_id = self.start_run(urls, count).await?;
        info!(%run_id, "started actor run");

        let status = self.wait_for_run(&run_id).await?;
        if status != "SUCCEEDED" {
            return Err(AdapterError::Api(format!(
                "actor run {run_id} failed or timed out: {status}"
            )));
        }
        self.dataset_items(&run_id).await
    }
}

#[async_trait]
impl ScrapeProvider for ApifyClient {
    fn provider_id(&self) -> &'static str {
        "apify"
    }

    /// Failed batches are recorded in the metadata and skipped; the call only
    /// fails when every batch failed.
    async fn scrape(&self, urls: &[String], count_per_url: u32) -> Result<ScrapeOutcome, AdapterError> {
        let count = count_per_url.max(MIN_COUNT_PER_URL);
        let batch_size = self.poll.batch_size.max(1);
        let total_batches = urls.len().div_ceil(batch_size);

        let mut outcome = ScrapeOutcome {
            listings: Vec::new(),
            metadata: ScrapeMetadata {
                urls_count: urls.len(),
                count_per_url: count,
                ..Default::default()
            },
        };

        info!(
            urls = urls.len(),
            batches = total_batches,
            count_per_url = count,
            "running scraping actor"
        );

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            let batch_num = index + 1;
            let started_at = Utc::now();
            let span = info_span!("scrape_batch", batch_num, total_batches);
            let result = self.run_batch(batch, count).instrument(span).await;

            let mut report = BatchReport {
                batch_num,
                urls: batch.to_vec(),
                started_at,
                finished_at: Utc::now(),
                success: false,
                job_count: 0,
                error: None,
            };

            match result {
                Ok(listings) => {
                    info!(batch_num, jobs = listings.len(), "scrape batch complete");
                    report.success = true;
                    report.job_count = listings.len();
                    outcome.metadata.successful_batches += 1;
                    outcome.metadata.total_jobs += listings.len();
                    outcome.listings.extend(listings);
                }
                Err(err) => {
                    error!(batch_num, error = %err, "scrape batch failed");
                    report.error = Some(err.to_string());
                    outcome.metadata.failed_batches += 1;
                }
            }
            outcome.metadata.batches.push(report);

            if batch_num < total_batches {
                tokio::time::sleep(self.poll.batch_pause).await;
            }
        }

        if total_batches > 0 && outcome.metadata.successful_batches == 0 {
            return Err(AdapterError::Api(format!(
                "all {total_batches} scrape batches failed"
            )));
        }
        Ok(outcome)
    }
}
