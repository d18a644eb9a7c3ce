//! SQLite-backed listing store and run history.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use jobscout_core::{Listing, ListingRecord, RunRecord};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite caps bound parameters per statement; IN-lists are chunked below it.
const MARK_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("run {0} is already recorded")]
    DuplicateRun(String),
    #[error("creating database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid stored date or timestamp: {value}")]
    InvalidDate { value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub new: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_jobs: i64,
    pub new_jobs_in_window: i64,
    pub processed_jobs: i64,
    pub runs_in_window: i64,
    pub window_days: i64,
}

#[derive(Debug, Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    /// Open (creating if needed) the database file and its tables.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "listing store opened");
        Ok(store)
    }

    /// Private in-memory database; one pinned connection so the data survives.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                title TEXT,
                company TEXT,
                location TEXT,
                first_seen_date TEXT,
                last_checked_date TEXT,
                is_processed INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraping_history (
                run_id TEXT PRIMARY KEY,
                timestamp TEXT,
                search_config TEXT,
                job_count INTEGER,
                new_job_count INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn known_identifiers(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT job_id FROM jobs")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("job_id").map_err(StoreError::from))
            .collect()
    }

    pub async fn upsert(&self, listings: &[Listing]) -> Result<UpsertCounts, StoreError> {
        self.upsert_on(listings, Local::now().date_naive()).await
    }

    /// Insert unseen listings and bump `last_checked_date` on known ones.
    ///
    /// Title, company and location are kept as first recorded. Each row is its
    /// own statement, so a failure part-way leaves earlier rows applied.
    pub async fn upsert_on(
        &self,
        listings: &[Listing],
        today: NaiveDate,
    ) -> Result<UpsertCounts, StoreError> {
        let today = today.format(DATE_FORMAT).to_string();
        let mut counts = UpsertCounts::default();

        for listing in listings {
            let job_id = listing.id.trim();
            if job_id.is_empty() {
                continue;
            }

            let exists = sqlx::query("SELECT job_id FROM jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();

            if exists {
                sqlx::query(
                    r#"
                    UPDATE jobs
                       SET last_checked_date = MAX(COALESCE(last_checked_date, ''), ?)
                     WHERE job_id = ?
                    "#,
                )
                .bind(&today)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
                counts.updated += 1;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO jobs (job_id, title, company, location, first_seen_date, last_checked_date)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(job_id)
                .bind(&listing.title)
                .bind(&listing.company)
                .bind(&listing.location)
                .bind(&today)
                .bind(&today)
                .execute(&self.pool)
                .await?;
                counts.new += 1;
            }
        }

        info!(
            new = counts.new,
            updated = counts.updated,
            "listing store upsert complete"
        );
        Ok(counts)
    }

    /// Listings whose identifier is not yet stored, in input order.
    pub async fn filter_unseen(&self, listings: &[Listing]) -> Result<Vec<Listing>, StoreError> {
        let known = self.known_identifiers().await?;
        let unseen: Vec<Listing> = listings
            .iter()
            .filter(|listing| !known.contains(listing.id.trim()))
            .cloned()
            .collect();
        info!(
            total = listings.len(),
            unseen = unseen.len(),
            "filtered listings against store"
        );
        Ok(unseen)
    }

    /// Set the processed flag; unknown identifiers are ignored.
    pub async fn mark_processed<S: AsRef<str>>(&self, job_ids: &[S]) -> Result<u64, StoreError> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let mut affected = 0;
        for chunk in job_ids.chunks(MARK_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE jobs SET is_processed = 1 WHERE job_id IN (");
            let mut separated = builder.separated(", ");
            for job_id in chunk {
                separated.push_bind(job_id.as_ref().to_string());
            }
            separated.push_unseparated(")");
            affected += builder.build().execute(&self.pool).await?.rows_affected();
        }

        info!(count = affected, "marked listings as processed");
        Ok(affected)
    }

    pub async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scraping_history (run_id, timestamp, search_config, job_count, new_job_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.timestamp.to_rfc3339())
        .bind(&run.search_config)
        .bind(run.fetched_count as i64)
        .bind(run.new_count as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    run_id = %run.run_id,
                    fetched = run.fetched_count,
                    new = run.new_count,
                    "recorded run"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateRun(run.run_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_listing(&self, job_id: &str) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, title, company, location, first_seen_date, last_checked_date, is_processed
              FROM jobs
             WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let first_seen: String = row.try_get("first_seen_date")?;
        let last_checked: String = row.try_get("last_checked_date")?;
        let processed: i64 = row.try_get("is_processed")?;
        Ok(Some(ListingRecord {
            id: row.try_get("job_id")?,
            title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
            company: row.try_get::<Option<String>, _>("company")?.unwrap_or_default(),
            location: row.try_get::<Option<String>, _>("location")?.unwrap_or_default(),
            first_seen: parse_date(&first_seen)?,
            last_checked: parse_date(&last_checked)?,
            processed: processed != 0,
        }))
    }

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, timestamp, search_config, job_count, new_job_count
              FROM scraping_history
             ORDER BY timestamp DESC
             LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: String = row.try_get("timestamp")?;
            let fetched: i64 = row.try_get("job_count")?;
            let new: i64 = row.try_get("new_job_count")?;
            out.push(RunRecord {
                run_id: row.try_get("run_id")?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|_| StoreError::InvalidDate { value: timestamp.clone() })?
                    .with_timezone(&Utc),
                search_config: row.try_get::<Option<String>, _>("search_config")?.unwrap_or_default(),
                fetched_count: fetched.max(0) as usize,
                new_count: new.max(0) as usize,
            });
        }
        Ok(out)
    }

    pub async fn recent_stats(&self, days: i64) -> Result<StoreStats, StoreError> {
        self.recent_stats_on(days, Local::now().date_naive()).await
    }

    pub async fn recent_stats_on(&self, days: i64, today: NaiveDate) -> Result<StoreStats, StoreError> {
        let threshold = (today - Duration::days(days)).format(DATE_FORMAT).to_string();
        debug!(%threshold, "computing store stats");

        let total_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let new_jobs_in_window: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE first_seen_date >= ?")
                .bind(&threshold)
                .fetch_one(&self.pool)
                .await?;
        let processed_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE is_processed = 1")
                .fetch_one(&self.pool)
                .await?;
        let runs_in_window: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scraping_history WHERE timestamp >= ?")
                .bind(&threshold)
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            total_jobs,
            new_jobs_in_window,
            processed_jobs,
            runs_in_window,
            window_days: days,
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| StoreError::InvalidDate {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn listing(id: &str, title: &str) -> Listing {
        Listing::new(id, title, "Acme", "Lisbon").unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn filter_unseen_returns_difference_in_order() {
        let store = ListingStore::open_in_memory().await.unwrap();
        let first = vec![listing("a", "A"), listing("c", "C")];
        store.upsert_on(&first, day(1)).await.unwrap();

        let second = vec![
            listing("d", "D"),
            listing("a", "A"),
            listing("b", "B"),
            listing("c", "C"),
        ];
        let unseen = store.filter_unseen(&second).await.unwrap();
        let ids: Vec<&str> = unseen.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b"]);
    }

    #[tokio::test]
    async fn second_upsert_updates_and_keeps_first_seen() {
        let store = ListingStore::open_in_memory().await.unwrap();

        let first = store.upsert_on(&[listing("x", "Original")], day(1)).await.unwrap();
        assert_eq!(first, UpsertCounts { new: 1, updated: 0 });

        let second = store.upsert_on(&[listing("x", "Renamed")], day(3)).await.unwrap();
        assert_eq!(second, UpsertCounts { new: 0, updated: 1 });

        let record = store.get_listing("x").await.unwrap().unwrap();
        assert_eq!(record.first_seen, day(1));
        assert_eq!(record.last_checked, day(3));
        assert_eq!(record.title, "Original");
        assert!(!record.processed);
    }

    #[tokio::test]
    async fn last_checked_never_moves_backwards() {
        let store = ListingStore::open_in_memory().await.unwrap();
        store.upsert_on(&[listing("x", "X")], day(5)).await.unwrap();
        store.upsert_on(&[listing("x", "X")], day(2)).await.unwrap();

        let record = store.get_listing("x").await.unwrap().unwrap();
        assert_eq!(record.last_checked, day(5));
    }

    #[tokio::test]
    async fn empty_identifiers_are_skipped() {
        let store = ListingStore::open_in_memory().await.unwrap();
        let blank = Listing {
            id: "  ".to_string(),
            ..Default::default()
        };
        let counts = store.upsert_on(&[blank], day(1)).await.unwrap();
        assert_eq!(counts, UpsertCounts::default());
        assert!(store.known_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_processed_ignores_unknown_ids() {
        let store = ListingStore::open_in_memory().await.unwrap();
        store
            .upsert_on(&[listing("a", "A"), listing("b", "B")], day(1))
            .await
            .unwrap();

        let empty: [&str; 0] = [];
        assert_eq!(store.mark_processed(&empty).await.unwrap(), 0);
        assert_eq!(store.mark_processed(&["a", "zzz"]).await.unwrap(), 1);

        assert!(store.get_listing("a").await.unwrap().unwrap().processed);
        assert!(!store.get_listing("b").await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn duplicate_run_ids_are_rejected() {
        let store = ListingStore::open_in_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap();
        let run = RunRecord::new(RunRecord::id_for(at), at, &serde_json::json!({"q": 1}), 5, 3).unwrap();

        store.record_run(&run).await.unwrap();
        let err = store.record_run(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRun(id) if id == "run_20260301_080000"));

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs, vec![run]);
    }

    #[tokio::test]
    async fn stats_count_window_and_processed() {
        let store = ListingStore::open_in_memory().await.unwrap();
        store.upsert_on(&[listing("old", "Old")], day(1)).await.unwrap();
        store
            .upsert_on(&[listing("new1", "N1"), listing("new2", "N2")], day(20))
            .await
            .unwrap();
        store.mark_processed(&["new1"]).await.unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 20, 8, 0, 0).single().unwrap();
        store
            .record_run(&RunRecord::new("run_a", at, &(), 3, 2).unwrap())
            .await
            .unwrap();

        let stats = store.recent_stats_on(7, day(21)).await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total_jobs: 3,
                new_jobs_in_window: 2,
                processed_jobs: 1,
                runs_in_window: 1,
                window_days: 7,
            }
        );
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("jobs.db");

        {
            let store = ListingStore::open(&path).await.unwrap();
            store.upsert_on(&[listing("keep", "K")], day(1)).await.unwrap();
        }

        let reopened = ListingStore::open(&path).await.unwrap();
        assert!(reopened.known_identifiers().await.unwrap().contains("keep"));
    }
}
