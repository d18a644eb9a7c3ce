//! Local mirrors of the published rows: an incremental CSV and the per-run
//! JSON summaries.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobscout_core::{AnalysisResult, SHEET_COLUMNS};
use serde::Serialize;

/// CSV file in canonical column order, flushed after every row so a crash
/// mid-run keeps everything written so far.
pub struct CsvMirror {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CsvMirror {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer
            .write_record(SHEET_COLUMNS)
            .with_context(|| format!("writing header to {}", path.display()))?;
        writer.flush()?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn write(&mut self, result: &AnalysisResult) -> Result<()> {
        self.writer
            .write_record(result.to_row())
            .with_context(|| format!("writing {} to {}", result.job_id, self.path.display()))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AggregateReport<'a> {
    pub timestamp: DateTime<Utc>,
    pub total_jobs_analyzed: usize,
    pub results: &'a [AnalysisResult],
}

#[derive(Debug, Serialize)]
pub struct RunSummaryReport {
    pub timestamp: DateTime<Utc>,
    pub total_jobs: usize,
    pub analyzed_jobs: usize,
    pub matching_jobs: usize,
    pub matching_job_ids: Vec<String>,
}
