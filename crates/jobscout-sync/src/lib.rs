//! Pipeline orchestration: configuration, analysis, publishing and scheduling.

use std::fmt::Write as _;

use anyhow::Result;
use jobscout_core::RunRecord;
use jobscout_storage::StoreStats;

pub mod analyze;
pub mod candidate;
pub mod config;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod scheduler;

pub use analyze::{prefilter, select_matches, AnalysisError, Analyzer, BatchOutcome};
pub use candidate::CandidateProfile;
pub use config::{ConfigError, ConfigProfile, PipelineConfig, Secrets};
pub use export::CsvMirror;
pub use extract::{extract, recommendation_code};
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use prompt::PromptTemplate;
pub use publish::{PublishError, PublishReport, Publisher};
pub use scheduler::{build_scheduler, run_scheduled};

/// Build a pipeline from the process environment and run it once.
pub async fn run_once_from_env(options: &RunOptions) -> Result<RunSummary> {
    let config = PipelineConfig::from_env()?;
    let secrets = Secrets::from_env();
    Pipeline::from_config(config, &secrets)
        .await?
        .run_once(options)
        .await
}

/// Markdown digest of store totals and the latest runs.
pub fn stats_markdown(stats: &StoreStats, runs: &[RunRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Job Scout Stats\n");
    let _ = writeln!(out, "- Listings tracked: {}", stats.total_jobs);
    let _ = writeln!(
        out,
        "- New in the last {} days: {}",
        stats.window_days, stats.new_jobs_in_window
    );
    let _ = writeln!(out, "- Analyzed: {}", stats.processed_jobs);
    let _ = writeln!(out, "- Runs in window: {}", stats.runs_in_window);

    if !runs.is_empty() {
        let _ = writeln!(out, "\n## Recent Runs");
        for run in runs {
            let _ = writeln!(
                out,
                "- `{}` {}: fetched {}, new {}",
                run.run_id,
                run.timestamp.format("%Y-%m-%d %H:%M"),
                run.fetched_count,
                run.new_count
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn stats_markdown_lists_runs() {
        let stats = StoreStats {
            total_jobs: 12,
            new_jobs_in_window: 5,
            processed_jobs: 7,
            runs_in_window: 2,
            window_days: 7,
        };
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap();
        let run = RunRecord::new(RunRecord::id_for(at), at, &["q"], 20, 5).unwrap();

        let text = stats_markdown(&stats, &[run]);
        assert!(text.contains("- Listings tracked: 12"));
        assert!(text.contains("- New in the last 7 days: 5"));
        assert!(text.contains("`run_20260301_080000` 2026-03-01 08:00: fetched 20, new 5"));
    }

    #[test]
    fn stats_markdown_without_runs_has_no_run_section() {
        let text = stats_markdown(&StoreStats::default(), &[]);
        assert!(!text.contains("Recent Runs"));
    }
}
