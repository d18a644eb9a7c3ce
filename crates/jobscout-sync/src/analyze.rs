//! Concurrent listing analysis: bounded fan-out to the completion provider,
//! results collected in completion order, qualifying rows streamed to CSV.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use jobscout_adapters::{AdapterError, CompletionProvider};
use jobscout_core::{AnalysisResult, Listing};
use jobscout_storage::ArtifactStore;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::export::CsvMirror;
use crate::extract::extract;
use crate::prompt::PromptTemplate;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("listing {0} has no description")]
    MissingDescription(String),
    #[error("completion request failed: {0}")]
    Completion(#[from] AdapterError),
    #[error("completion returned an unusable response")]
    UnusableResponse,
}

/// Drop listings that cannot be analyzed and cap the batch size. A cap of
/// zero means no cap.
pub fn prefilter(listings: Vec<Listing>, max_jobs: usize) -> Vec<Listing> {
    let before = listings.len();
    let cap = if max_jobs == 0 { usize::MAX } else { max_jobs };
    let kept: Vec<Listing> = listings
        .into_iter()
        .filter(|l| !l.description.trim().is_empty())
        .take(cap)
        .collect();
    if kept.len() < before {
        info!(before, after = kept.len(), "prefiltered listings for analysis");
    }
    kept
}

/// Results at or above `threshold`, best first. NaN scores sort last.
pub fn select_matches(results: &[AnalysisResult], threshold: f64) -> Vec<AnalysisResult> {
    let mut matches: Vec<AnalysisResult> = results
        .iter()
        .filter(|r| r.meets_threshold(threshold))
        .cloned()
        .collect();
    matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
    matches
}

/// Per-listing artifact file name. Identifiers come from scraped data, so
/// anything outside `[A-Za-z0-9_-]` becomes `_`.
fn artifact_file_name(job_id: &str) -> String {
    let safe: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("job_{safe}_analysis.json")
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful analyses in completion order.
    pub results: Vec<AnalysisResult>,
    pub failed: usize,
    pub csv_rows: usize,
}

#[derive(Clone)]
pub struct Analyzer {
    completion: Arc<dyn CompletionProvider>,
    template: Arc<PromptTemplate>,
    candidate: Arc<str>,
    artifacts: Option<(ArtifactStore, PathBuf)>,
    concurrency: usize,
    threshold: f64,
}

impl Analyzer {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        template: PromptTemplate,
        candidate: impl Into<Arc<str>>,
        concurrency: usize,
        threshold: f64,
    ) -> Self {
        Self {
            completion,
            template: Arc::new(template),
            candidate: candidate.into(),
            artifacts: None,
            concurrency: concurrency.max(1),
            threshold,
        }
    }

    /// Write one JSON file per analysis under `dir` (relative to the store root).
    pub fn with_artifacts(mut self, store: ArtifactStore, dir: impl Into<PathBuf>) -> Self {
        self.artifacts = Some((store, dir.into()));
        self
    }

    pub async fn analyze_listing(&self, listing: &Listing) -> Result<AnalysisResult, AnalysisError> {
        if listing.description.trim().is_empty() {
            return Err(AnalysisError::MissingDescription(listing.id.clone()));
        }

        let prompt = self.template.render(&self.candidate, &listing.description);
        debug!(job_id = %listing.id, prompt_chars = prompt.len(), "requesting analysis");
        let response = self.completion.complete(&prompt).await?;
        if response.trim().is_empty() || response.starts_with("Error") {
            return Err(AnalysisError::UnusableResponse);
        }

        let sections = extract(&response);
        let result = AnalysisResult::from_sections(listing, sections, response, Utc::now());

        if let Some((store, dir)) = &self.artifacts {
            let rel = dir.join(artifact_file_name(&listing.id));
            if let Err(err) = store.write_json(&rel, &result).await {
                warn!(job_id = %listing.id, error = %err, "failed to write analysis artifact");
            }
        }

        info!(
            job_id = %listing.id,
            score = result.match_score,
            code = %result.recommendation_code,
            "analysis complete"
        );
        Ok(result)
    }

    /// Analyze every listing with at most `concurrency` requests in flight.
    /// Per-listing failures are logged and counted, never propagated.
    pub async fn analyze_batch(
        &self,
        listings: Vec<Listing>,
        csv: Option<CsvMirror>,
    ) -> Result<BatchOutcome> {
        let total = listings.len();
        info!(total, concurrency = self.concurrency, "analyzing listings");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (result_tx, mut result_rx) = mpsc::channel(self.concurrency * 2);
        let mut tasks = JoinSet::new();

        for listing in listings {
            let analyzer = self.clone();
            let semaphore = semaphore.clone();
            let result_tx = result_tx.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = analyzer.analyze_listing(&listing).await;
                let _ = result_tx.send((listing.id, outcome)).await;
            });
        }
        drop(result_tx);

        let (csv_tx, writer) = match csv {
            Some(mirror) => {
                let (tx, rx) = mpsc::channel::<AnalysisResult>(self.concurrency * 2);
                (Some(tx), Some(tokio::task::spawn_blocking(move || write_csv(mirror, rx))))
            }
            None => (None, None),
        };

        let mut outcome = BatchOutcome::default();
        while let Some((job_id, result)) = result_rx.recv().await {
            match result {
                Ok(result) => {
                    if let Some(tx) = &csv_tx {
                        if result.meets_threshold(self.threshold)
                            && tx.send(result.clone()).await.is_err()
                        {
                            warn!(job_id = %job_id, "csv writer stopped; row not mirrored");
                        }
                    }
                    outcome.results.push(result);
                }
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "analysis failed");
                    outcome.failed += 1;
                }
            }
        }
        drop(csv_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "analysis task aborted");
            }
        }
        // A task that panicked never reported back.
        outcome.failed = total - outcome.results.len();

        if let Some(writer) = writer {
            match writer.await.context("joining csv writer")? {
                Ok(rows) => outcome.csv_rows = rows,
                Err(err) => warn!(error = %err, "csv mirror failed"),
            }
        }

        info!(
            analyzed = outcome.results.len(),
            failed = outcome.failed,
            csv_rows = outcome.csv_rows,
            "analysis batch finished"
        );
        Ok(outcome)
    }
}

fn write_csv(mut mirror: CsvMirror, mut rx: mpsc::Receiver<AnalysisResult>) -> Result<usize> {
    while let Some(result) = rx.blocking_recv() {
        mirror.write(&result)?;
    }
    info!(path = %mirror.path().display(), rows = mirror.rows_written(), "csv mirror closed");
    Ok(mirror.rows_written())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Scores by job id; ids missing from the map fail.
    struct ScriptedModel {
        scores: HashMap<String, String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(scores: &[(&str, &str)]) -> Self {
            Self {
                scores: scores
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let id = prompt.trim().to_string();
            self.scores
                .get(&id)
                .map(|s| format!("<score>{s}</score><recommendation>CONSIDER</recommendation>"))
                .ok_or_else(|| AdapterError::Api(format!("no script for {id}")))
        }
    }

    fn listing(id: &str) -> Listing {
        Listing::new(id, format!("Role {id}"), "Acme", "Lisbon")
            .unwrap()
            .with_description(id)
    }

    fn analyzer(model: Arc<ScriptedModel>, concurrency: usize) -> Analyzer {
        Analyzer::new(model, PromptTemplate::new("{job_description}"), "cv", concurrency, 7.0)
    }

    #[test]
    fn prefilter_drops_empty_descriptions_and_caps() {
        let mut blank = listing("blank");
        blank.description = "  ".to_string();
        let kept = prefilter(vec![listing("a"), blank, listing("b"), listing("c")], 2);
        let ids: Vec<_> = kept.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn zero_cap_keeps_every_listing() {
        let kept = prefilter(vec![listing("a"), listing("b"), listing("c")], 0);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn artifact_names_stay_inside_the_run_directory() {
        assert_eq!(artifact_file_name("4021-x_y"), "job_4021-x_y_analysis.json");
        assert_eq!(artifact_file_name("../../etc/passwd"), "job_______etc_passwd_analysis.json");
        assert_eq!(artifact_file_name("a\\b"), "job_a_b_analysis.json");
    }

    #[tokio::test]
    async fn traversal_ids_write_under_the_artifact_dir() {
        let model = Arc::new(ScriptedModel::new(&[("../escape", "8")]));
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("results");

        analyzer(model, 1)
            .with_artifacts(ArtifactStore::new(&root), "analysis_test")
            .analyze_listing(&listing("../escape"))
            .await
            .unwrap();

        assert!(root.join("analysis_test/job____escape_analysis.json").exists());
        assert!(!root.join("job_escape_analysis.json").exists());
    }

    #[test]
    fn matches_are_sorted_and_thresholded() {
        let make = |id: &str, score: f64| {
            let mut r = AnalysisResult::from_sections(
                &listing(id),
                Default::default(),
                String::new(),
                Utc::now(),
            );
            r.match_score = score;
            r
        };
        let results = vec![make("a", 7.0), make("b", 9.5), make("c", 6.9), make("d", f64::NAN)];
        let ids: Vec<String> = select_matches(&results, 7.0)
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn unusable_responses_are_errors() {
        struct Canned(&'static str);
        #[async_trait]
        impl CompletionProvider for Canned {
            fn model_name(&self) -> &str {
                "canned"
            }
            async fn complete(&self, _prompt: &str) -> Result<String, AdapterError> {
                Ok(self.0.to_string())
            }
        }

        for text in ["", "   ", "Error: overloaded"] {
            let analyzer = Analyzer::new(Arc::new(Canned(text)), PromptTemplate::fallback(), "cv", 1, 7.0);
            assert!(matches!(
                analyzer.analyze_listing(&listing("a")).await,
                Err(AnalysisError::UnusableResponse)
            ));
        }
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_bounds_concurrency() {
        let model = Arc::new(ScriptedModel::new(&[("a", "8"), ("b", "5"), ("c", "9"), ("d", "7")]));
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out.csv");
        let mirror = CsvMirror::create(&csv_path).unwrap();

        let outcome = analyzer(model.clone(), 2)
            .with_artifacts(ArtifactStore::new(dir.path()), "analysis_test")
            .analyze_batch(
                vec![listing("a"), listing("b"), listing("missing"), listing("c"), listing("d")],
                Some(mirror),
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.csv_rows, 3);
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
        assert!(dir.path().join("analysis_test/job_c_analysis.json").exists());

        let csv_lines = std::fs::read_to_string(&csv_path).unwrap().lines().count();
        assert_eq!(csv_lines, 4);
    }
}
