//! Full runs against in-process fakes for the scraper, the model and the sheet.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobscout_adapters::{
    AdapterError, CompletionProvider, MemoryTable, ScrapeMetadata, ScrapeOutcome, ScrapeProvider,
};
use jobscout_core::{Listing, JOB_ID_COLUMN};
use jobscout_storage::ListingStore;
use jobscout_sync::scheduler::scheduled_run;
use jobscout_sync::{build_scheduler, Pipeline, PipelineConfig, Publisher, RunOptions};
use tempfile::TempDir;
use tokio::sync::Mutex;

fn listing(id: &str) -> Listing {
    let mut listing = Listing::new(id, format!("Director {id}"), "Acme", "Madrid")
        .unwrap()
        .with_description(format!("posting-{id}"));
    listing.link = format!("https://jobs.example/{id}");
    listing
}

struct FakeScraper {
    ids: Vec<&'static str>,
    calls: AtomicUsize,
}

impl FakeScraper {
    fn returning(ids: &[&'static str]) -> Self {
        Self {
            ids: ids.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScrapeProvider for FakeScraper {
    fn provider_id(&self) -> &'static str {
        "fake"
    }

    async fn scrape(&self, urls: &[String], count_per_url: u32) -> Result<ScrapeOutcome, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listings: Vec<Listing> = self.ids.iter().copied().map(listing).collect();
        Ok(ScrapeOutcome {
            metadata: ScrapeMetadata {
                urls_count: urls.len(),
                count_per_url,
                successful_batches: 1,
                total_jobs: listings.len(),
                ..Default::default()
            },
            listings,
        })
    }
}

/// Scores postings 3 and 4 above the threshold and everything else below.
#[derive(Default)]
struct FakeModel {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionProvider for FakeModel {
    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = if prompt.contains("posting-3") {
            "9"
        } else if prompt.contains("posting-4") {
            "8"
        } else {
            "4"
        };
        Ok(format!(
            "<score>{score}</score>\n<human_fit>{score}/10 solid</human_fit>\n\
             <recommendation>PURSUE if score is high</recommendation>\n<summary>fit {score}</summary>"
        ))
    }
}

struct Harness {
    _dir: TempDir,
    config: PipelineConfig,
    store: ListingStore,
    scraper: Arc<FakeScraper>,
    model: Arc<FakeModel>,
    table: Arc<MemoryTable>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_scraper(FakeScraper::returning(&["1", "2", "3", "4", "5"])).await
    }

    async fn with_scraper(scraper: FakeScraper) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("cv.md"),
            "# Summary\nProduct leader.\n\n# Skills\n- Strategy\n- Hiring\n",
        )
        .unwrap();

        let config = PipelineConfig {
            countries: vec!["Spain".to_string()],
            job_roles: BTreeMap::from([("Product".to_string(), vec!["Director of Product".to_string()])]),
            analysis_concurrency: 2,
            cv_path: data_dir.join("cv.md"),
            prompts_dir: data_dir.join("prompts"),
            database_path: data_dir.join("jobs.db"),
            results_dir: dir.path().join("results"),
            data_dir,
            ..PipelineConfig::default()
        };

        let store = ListingStore::open_in_memory().await.unwrap();
        store.upsert(&[listing("1"), listing("2")]).await.unwrap();

        Self {
            _dir: dir,
            config,
            store,
            scraper: Arc::new(scraper),
            model: Arc::new(FakeModel::default()),
            table: Arc::new(MemoryTable::new()),
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config.clone(), self.store.clone(), self.model.clone())
            .with_scraper(self.scraper.clone())
            .with_publisher(Publisher::new(self.table.clone()))
    }
}

fn count_files_with_prefix(dir: &Path, prefix: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn new_listings_are_analyzed_and_matches_published() {
    let harness = Harness::new().await;
    let summary = harness
        .pipeline()
        .run_once(&RunOptions::default())
        .await
        .expect("run should succeed");

    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.new_listings, 3);
    assert_eq!(summary.analyzed, 3);
    assert_eq!(summary.matches, 2);
    assert!(summary.sheet_ready);
    assert!(summary.published);

    let rows = harness.table.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][JOB_ID_COLUMN], "3");
    assert_eq!(rows[1][JOB_ID_COLUMN], "4");
    assert_eq!(rows[0][5], "PURSUE");
    assert!(harness.table.header().is_some());

    let processed = harness.store.get_listing("3").await.unwrap().unwrap();
    assert!(processed.processed);
    let known = harness.store.get_listing("1").await.unwrap().unwrap();
    assert!(!known.processed);

    let runs = harness.store.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].fetched_count, 5);
    assert_eq!(runs[0].new_count, 3);

    let csv_path = summary.csv_path.expect("csv mirror written");
    let csv_lines = std::fs::read_to_string(csv_path).unwrap().lines().count();
    assert_eq!(csv_lines, 3);
    assert_eq!(count_files_with_prefix(&harness.config.data_dir, "jobs_"), 1);
    assert_eq!(count_files_with_prefix(&harness.config.results_dir, "search_configs_"), 1);
}

#[tokio::test]
async fn repeated_listing_in_one_fetch_is_analyzed_once() {
    let harness = Harness::with_scraper(FakeScraper::returning(&["3", "3", "4"])).await;
    let summary = harness
        .pipeline()
        .run_once(&RunOptions::default())
        .await
        .expect("run should succeed");

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.new_listings, 2);
    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.matches, 2);
    assert_eq!(harness.model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.table.rows().len(), 2);

    let csv_path = summary.csv_path.expect("csv mirror written");
    let csv_lines = std::fs::read_to_string(csv_path).unwrap().lines().count();
    assert_eq!(csv_lines, 3);

    let runs = harness.store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].fetched_count, 2);
    assert_eq!(runs[0].new_count, 2);
}

#[tokio::test]
async fn cached_rerun_does_not_duplicate_sheet_rows() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    pipeline.run_once(&RunOptions::default()).await.unwrap();

    let summary = pipeline
        .run_once(&RunOptions {
            skip_scraping: true,
            ..Default::default()
        })
        .await
        .expect("cached run should succeed");

    assert_eq!(harness.scraper.calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.analyzed, 5);
    assert_eq!(summary.matches, 2);
    assert!(summary.published);
    assert_eq!(harness.table.rows().len(), 2);
}

#[tokio::test]
async fn unavailable_sheet_degrades_to_local_output() {
    let harness = Harness::new().await;
    harness.table.set_failing(true);

    let summary = harness
        .pipeline()
        .run_once(&RunOptions::default())
        .await
        .expect("run should still succeed");

    assert!(!summary.sheet_ready);
    assert!(!summary.published);
    assert_eq!(summary.matches, 2);
    assert!(summary.csv_path.is_some());
}

#[tokio::test]
async fn missing_cv_aborts_the_run() {
    let harness = Harness::new().await;
    std::fs::remove_file(&harness.config.cv_path).unwrap();

    let err = harness
        .pipeline()
        .run_once(&RunOptions::default())
        .await
        .expect_err("a run without a CV cannot analyze anything");
    assert!(format!("{err:#}").contains("cv.md"));
    assert_eq!(harness.scraper.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn skip_scraping_without_cache_fails() {
    let harness = Harness::new().await;
    let err = harness
        .pipeline()
        .run_once(&RunOptions {
            skip_scraping: true,
            ..Default::default()
        })
        .await
        .expect_err("nothing cached yet");
    assert!(err.to_string().contains("jobs_"));
}

#[tokio::test]
async fn overlapping_scheduled_trigger_is_skipped() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let running = Mutex::new(());

    let _held = running.lock().await;
    scheduled_run(&pipeline, &RunOptions::default(), &running).await;
    assert_eq!(harness.scraper.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn default_schedule_builds() {
    let harness = Harness::new().await;
    assert_eq!(harness.config.schedule_cron, PipelineConfig::default().schedule_cron);
    let result = build_scheduler(Arc::new(harness.pipeline()), RunOptions::default()).await;
    assert!(result.is_ok(), "{:?}", result.err());
}

#[tokio::test]
async fn invalid_cron_is_rejected() {
    let mut harness = Harness::new().await;
    harness.config.schedule_cron = "every morning".to_string();
    let result = build_scheduler(Arc::new(harness.pipeline()), RunOptions::default()).await;
    assert!(result.is_err());
}
