//! One end-to-end run: scrape (or reload), dedup, analyze, aggregate, publish.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use jobscout_adapters::{
    expand_queries, jobs_per_url, provider_for, ApifyClient, CompletionProvider, GoogleSheetsTable,
    ScrapeProvider,
};
use jobscout_core::{AnalysisResult, Listing, RunRecord, SearchQuery, JOB_ID_COLUMN};
use jobscout_storage::{ArtifactStore, HttpClientConfig, ListingStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyze::{prefilter, select_matches, Analyzer};
use crate::candidate::{CandidateProfile, MAX_PROMPT_CHARS};
use crate::config::{PipelineConfig, Secrets};
use crate::export::{AggregateReport, CsvMirror, RunSummaryReport};
use crate::prompt::PromptTemplate;
use crate::publish::Publisher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse the newest `jobs_*.json` dump instead of calling the scraper.
    pub skip_scraping: bool,
    pub skip_sheets: bool,
    /// Rewrite rows whose key already exists in the sheet.
    pub force_update: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub new_listings: usize,
    pub analyzed: usize,
    pub failed_analyses: usize,
    pub matches: usize,
    pub sheet_ready: bool,
    pub published: bool,
    pub csv_path: Option<PathBuf>,
    pub scrape_secs: f64,
    pub analysis_secs: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobsDump {
    timestamp: DateTime<Utc>,
    jobs: Vec<Listing>,
}

/// First listing per identifier, in input order. Overlapping searches
/// return the same posting more than once.
fn distinct_by_identifier(listings: Vec<Listing>) -> Vec<Listing> {
    let total = listings.len();
    let mut seen = HashSet::new();
    let distinct: Vec<Listing> = listings
        .into_iter()
        .filter(|l| seen.insert(l.id.clone()))
        .collect();
    if distinct.len() < total {
        info!(collapsed = total - distinct.len(), "collapsed repeated listings");
    }
    distinct
}

pub struct Pipeline {
    config: PipelineConfig,
    store: ListingStore,
    completion: Arc<dyn CompletionProvider>,
    scraper: Option<Arc<dyn ScrapeProvider>>,
    publisher: Option<Publisher>,
    data: ArtifactStore,
    results: ArtifactStore,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: ListingStore,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        let data = ArtifactStore::new(config.data_dir.clone());
        let results = ArtifactStore::new(config.results_dir.clone());
        Self {
            config,
            store,
            completion,
            scraper: None,
            publisher: None,
            data,
            results,
        }
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn ScrapeProvider>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Wire the real clients. Scraping and publishing are optional and switch
    /// off when their credentials are missing; the completion key is required.
    pub async fn from_config(config: PipelineConfig, secrets: &Secrets) -> Result<Self> {
        let store = ListingStore::open(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?;
        let http = HttpClientConfig::default().with_timeout(Duration::from_secs(config.http_timeout_secs));

        let api_key = secrets
            .anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is not set")?;
        let completion = provider_for(config.llm_provider, api_key, &config.llm_model, &http)?;

        let scraper: Option<Arc<dyn ScrapeProvider>> = match secrets.apify_api_key.as_deref() {
            Some(token) => Some(Arc::new(ApifyClient::new(token, &http)?)),
            None => {
                warn!("APIFY_API_KEY is not set; only cached listings can be analyzed");
                None
            }
        };

        let publisher = match (secrets.google_sheets_token.as_deref(), config.sheet_id.as_deref()) {
            (Some(token), Some(sheet_id)) => Some(Publisher::new(Arc::new(GoogleSheetsTable::new(
                token,
                sheet_id,
                &config.sheet_range,
                &http,
            )?))),
            _ => {
                info!("GOOGLE_SHEETS_TOKEN or GOOGLE_SHEET_ID missing; sheet publishing disabled");
                None
            }
        };

        let mut pipeline = Self::new(config, store, completion);
        pipeline.scraper = scraper;
        pipeline.publisher = publisher;
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    pub async fn run_once(&self, options: &RunOptions) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = RunRecord::id_for(started_at);
        let stamp = ArtifactStore::run_stamp(started_at);
        info!(run_id = %run_id, ?options, "starting run");

        let candidate = CandidateProfile::load(&self.config.cv_path).await?;
        let cv_text = candidate.format_for_prompt(MAX_PROMPT_CHARS);
        let template = PromptTemplate::load(&self.config.prompts_dir, &self.config.prompt_name).await?;

        let sheet_ready = self.prepare_sheet(options).await;

        let scrape_clock = Instant::now();
        let (fetched, new_listings, to_analyze) = if options.skip_scraping {
            let listings = self.load_cached_listings().await?;
            (listings.len(), 0, listings)
        } else {
            let (listings, queries) = self.scrape(&run_id, &stamp, started_at).await?;
            let unseen = self.dedup(&run_id, started_at, &queries, &listings).await?;
            let new_listings = unseen.len();
            let to_analyze = if unseen.is_empty() {
                info!(run_id = %run_id, "no new listings; re-analyzing this run's fetch");
                listings.clone()
            } else {
                unseen
            };
            (listings.len(), new_listings, to_analyze)
        };
        let scrape_secs = scrape_clock.elapsed().as_secs_f64();

        let analysis_clock = Instant::now();
        let candidates = prefilter(to_analyze, self.config.max_jobs_to_analyze);
        let analysis_dir = PathBuf::from(format!("analysis_{stamp}"));
        let csv_path = self.results.path_for(format!("job_analysis_{stamp}.csv"));
        let csv = if candidates.is_empty() {
            None
        } else {
            match CsvMirror::create(&csv_path) {
                Ok(mirror) => Some(mirror),
                Err(err) => {
                    warn!(error = %err, "csv mirror disabled for this run");
                    None
                }
            }
        };
        let csv_enabled = csv.is_some();

        let outcome = Analyzer::new(
            self.completion.clone(),
            template,
            cv_text,
            self.config.analysis_concurrency,
            self.config.match_score_threshold,
        )
        .with_artifacts(self.results.clone(), &analysis_dir)
        .analyze_batch(candidates, csv)
        .await?;
        let analysis_secs = analysis_clock.elapsed().as_secs_f64();

        let matches = select_matches(&outcome.results, self.config.match_score_threshold);
        self.write_reports(&analysis_dir, fetched, &outcome.results, &matches)
            .await;

        let analyzed_ids: Vec<&str> = outcome.results.iter().map(|r| r.job_id.as_str()).collect();
        let marked = self
            .store
            .mark_processed(&analyzed_ids)
            .await
            .context("marking analyzed listings processed")?;
        info!(run_id = %run_id, marked, "listings marked processed");

        let published = match (&self.publisher, sheet_ready) {
            (Some(publisher), true) => {
                let rows: Vec<Vec<String>> = matches.iter().map(|m| m.to_row()).collect();
                publisher
                    .publish(&rows, JOB_ID_COLUMN, options.force_update)
                    .await
            }
            _ => false,
        };

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            fetched,
            new_listings,
            analyzed: outcome.results.len(),
            failed_analyses: outcome.failed,
            matches: matches.len(),
            sheet_ready,
            published,
            csv_path: csv_enabled.then_some(csv_path),
            scrape_secs,
            analysis_secs,
        };
        info!(
            run_id = %summary.run_id,
            fetched = summary.fetched,
            new = summary.new_listings,
            analyzed = summary.analyzed,
            matches = summary.matches,
            published = summary.published,
            "run finished"
        );
        Ok(summary)
    }

    async fn prepare_sheet(&self, options: &RunOptions) -> bool {
        if options.skip_sheets {
            info!("sheet publishing skipped for this run");
            return false;
        }
        let Some(publisher) = &self.publisher else {
            return false;
        };
        match publisher.ensure_sheet().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "sheet unavailable; results will only be written locally");
                false
            }
        }
    }

    async fn scrape(
        &self,
        run_id: &str,
        stamp: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(Vec<Listing>, Vec<SearchQuery>)> {
        let scraper = self
            .scraper
            .as_ref()
            .context("no scraper configured; set APIFY_API_KEY or run with skip_scraping")?;

        let queries = expand_queries(
            &self.config.countries,
            &self.config.job_roles,
            &self.config.filters,
            self.config.max_jobs_per_search,
        );
        if let Err(err) = self
            .results
            .write_json(format!("search_configs_{stamp}.json"), &queries)
            .await
        {
            warn!(error = %err, "failed to write search configs");
        }

        let urls: Vec<String> = queries.iter().filter_map(|q| q.url.clone()).collect();
        let per_url = jobs_per_url(
            self.config.max_jobs_per_search,
            self.config.total_target_jobs,
            urls.len(),
        );
        info!(run_id, provider = scraper.provider_id(), urls = urls.len(), per_url, "scraping");

        let outcome = scraper
            .scrape(&urls, per_url)
            .await
            .context("scraping listings")?;
        if outcome.metadata.failed_batches > 0 {
            warn!(
                failed = outcome.metadata.failed_batches,
                succeeded = outcome.metadata.successful_batches,
                "some scrape batches failed"
            );
        }

        let total = outcome.listings.len();
        let identified: Vec<Listing> = outcome
            .listings
            .into_iter()
            .filter(Listing::has_identifier)
            .collect();
        if identified.len() < total {
            warn!(dropped = total - identified.len(), "dropped listings without an identifier");
        }
        let listings = distinct_by_identifier(identified);

        let dump = JobsDump {
            timestamp: started_at,
            jobs: listings.clone(),
        };
        match self.data.write_json(format!("jobs_{stamp}.json"), &dump).await {
            Ok(artifact) => info!(
                path = %artifact.relative_path.display(),
                sha256 = %artifact.content_hash,
                bytes = artifact.byte_size,
                "dumped scraped listings"
            ),
            Err(err) => warn!(error = %err, "failed to dump scraped listings"),
        }

        Ok((listings, queries))
    }

    /// Record what is new, refresh what is known and log the run. Store
    /// failures abort the run.
    async fn dedup(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        queries: &[SearchQuery],
        listings: &[Listing],
    ) -> Result<Vec<Listing>> {
        let unseen = self
            .store
            .filter_unseen(listings)
            .await
            .context("filtering known listings")?;
        let counts = self
            .store
            .upsert(listings)
            .await
            .context("storing scraped listings")?;

        let record = RunRecord::new(run_id, started_at, queries, listings.len(), counts.new)?;
        self.store
            .record_run(&record)
            .await
            .with_context(|| format!("recording run {run_id}"))?;

        info!(
            run_id,
            fetched = listings.len(),
            new = counts.new,
            updated = counts.updated,
            "deduplicated listings"
        );
        Ok(unseen)
    }

    async fn load_cached_listings(&self) -> Result<Vec<Listing>> {
        let Some(path) = self.data.latest_with_prefix("jobs_", "json").await? else {
            bail!(
                "no cached jobs_*.json found in {}; run without skip_scraping first",
                self.data.root().display()
            );
        };
        let name = path.file_name().context("cached dump has no file name")?;
        let dump: JobsDump = self.data.read_json(name).await?;
        info!(path = %path.display(), jobs = dump.jobs.len(), "loaded cached listings");
        Ok(distinct_by_identifier(
            dump.jobs
                .into_iter()
                .filter(Listing::has_identifier)
                .collect(),
        ))
    }

    async fn write_reports(
        &self,
        analysis_dir: &Path,
        total_jobs: usize,
        results: &[AnalysisResult],
        matches: &[AnalysisResult],
    ) {
        let timestamp = Utc::now();
        let aggregate = AggregateReport {
            timestamp,
            total_jobs_analyzed: results.len(),
            results,
        };
        if let Err(err) = self
            .results
            .write_json(analysis_dir.join("aggregate_results.json"), &aggregate)
            .await
        {
            warn!(error = %err, "failed to write aggregate results");
        }

        let summary = RunSummaryReport {
            timestamp,
            total_jobs,
            analyzed_jobs: results.len(),
            matching_jobs: matches.len(),
            matching_job_ids: matches.iter().map(|m| m.job_id.clone()).collect(),
        };
        if let Err(err) = self
            .results
            .write_json(analysis_dir.join("summary.json"), &summary)
            .await
        {
            warn!(error = %err, "failed to write run summary");
        }
    }
}
