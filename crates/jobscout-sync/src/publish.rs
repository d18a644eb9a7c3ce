//! Keyed upsert of result rows into a [`RemoteTable`].

use std::collections::HashMap;
use std::sync::Arc;

use jobscout_adapters::{AdapterError, RemoteTable, RowUpdate};
use jobscout_core::SHEET_COLUMNS;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("remote table unavailable: {0}")]
    Unavailable(#[source] AdapterError),
    #[error("reading remote rows failed: {0}")]
    Read(#[source] AdapterError),
    #[error("writing remote rows failed: {0}")]
    Write(#[source] AdapterError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub appended: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub struct Publisher {
    table: Arc<dyn RemoteTable>,
}

impl Publisher {
    pub fn new(table: Arc<dyn RemoteTable>) -> Self {
        Self { table }
    }

    /// Verify the table is reachable and write the canonical header.
    pub async fn ensure_sheet(&self) -> Result<(), PublishError> {
        self.table.probe().await.map_err(PublishError::Unavailable)?;
        self.write_header().await
    }

    async fn write_header(&self) -> Result<(), PublishError> {
        self.table
            .write_header(&SHEET_COLUMNS)
            .await
            .map_err(PublishError::Write)
    }

    /// Upsert `rows` keyed on `key_column`. Existing keys are rewritten in place
    /// when `overwrite` is set and left untouched otherwise; unknown keys are
    /// appended in one call. Rows too short to carry a key are ignored.
    pub async fn try_publish(
        &self,
        rows: &[Vec<String>],
        key_column: usize,
        overwrite: bool,
    ) -> Result<PublishReport, PublishError> {
        if rows.is_empty() {
            return Ok(PublishReport::default());
        }

        self.write_header().await?;

        let existing = self.table.read_rows().await.map_err(PublishError::Read)?;
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (position, row) in existing.iter().enumerate() {
            if let Some(key) = row.get(key_column) {
                positions.insert(key.as_str(), position);
            }
        }

        let mut report = PublishReport::default();
        let mut updates: Vec<RowUpdate> = Vec::new();
        let mut appends: Vec<Vec<String>> = Vec::new();
        let mut pending_appends: HashMap<&str, usize> = HashMap::new();

        for row in rows {
            let Some(key) = row.get(key_column).map(String::as_str) else {
                report.skipped += 1;
                continue;
            };

            if let Some(&position) = positions.get(key) {
                if !overwrite {
                    report.skipped += 1;
                    continue;
                }
                match updates.iter_mut().find(|u| u.position == position) {
                    Some(update) => {
                        update.values = row.clone();
                        report.skipped += 1;
                    }
                    None => updates.push(RowUpdate {
                        position,
                        values: row.clone(),
                    }),
                }
            } else if let Some(&idx) = pending_appends.get(key) {
                if overwrite {
                    appends[idx] = row.clone();
                }
                report.skipped += 1;
            } else {
                pending_appends.insert(key, appends.len());
                appends.push(row.clone());
            }
        }

        if !updates.is_empty() {
            self.table
                .update_rows(&updates)
                .await
                .map_err(PublishError::Write)?;
        }
        if !appends.is_empty() {
            self.table
                .append_rows(&appends)
                .await
                .map_err(PublishError::Write)?;
        }

        report.updated = updates.len();
        report.appended = appends.len();
        Ok(report)
    }

    /// Like [`Publisher::try_publish`], collapsing failures into `false`.
    pub async fn publish(&self, rows: &[Vec<String>], key_column: usize, overwrite: bool) -> bool {
        match self.try_publish(rows, key_column, overwrite).await {
            Ok(report) => {
                info!(
                    appended = report.appended,
                    updated = report.updated,
                    skipped = report.skipped,
                    "published rows"
                );
                true
            }
            Err(err) => {
                error!(error = %err, "publishing rows failed");
                false
            }
        }
    }
}
