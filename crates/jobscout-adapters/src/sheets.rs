//! Remote table implementations: Google Sheets values API and an in-memory table.

use std::sync::Mutex;

use async_trait::async_trait;
use jobscout_storage::HttpClientConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::{read_json, trim_base_url, AdapterError, RemoteTable, RowUpdate};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// Characters escaped inside an A1 range used as a path segment.
const RANGE_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub struct GoogleSheetsTable {
    client: reqwest::Client,
    token: String,
    spreadsheet_id: String,
    range: String,
    base_url: String,
}

impl GoogleSheetsTable {
    /// `range` is the data range, e.g. `Job Matches!A2:Z`; the header goes to
    /// `A1` of the same sheet.
    pub fn new(
        token: &str,
        spreadsheet_id: &str,
        range: &str,
        http: &HttpClientConfig,
    ) -> Result<Self, AdapterError> {
        Self::with_base_url(token, spreadsheet_id, range, http, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: &str,
        spreadsheet_id: &str,
        range: &str,
        http: &HttpClientConfig,
        base_url: &str,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http.build_client()?,
            token: token.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            base_url: trim_base_url(base_url),
        })
    }

    fn sheet_name(&self) -> &str {
        self.range.split('!').next().unwrap_or(&self.range)
    }

    /// Row number of position 0, taken from the range's start cell.
    fn first_data_row(&self) -> usize {
        first_row_of(&self.range)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            utf8_percent_encode(range, RANGE_SEGMENT)
        )
    }
}

fn first_row_of(range: &str) -> usize {
    let Some((_, cells)) = range.split_once('!') else {
        return 1;
    };
    let start = cells.split(':').next().unwrap_or_default();
    start
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap_or(1)
}

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RemoteTable for GoogleSheetsTable {
    async fn probe(&self) -> Result<(), AdapterError> {
        let url = format!(
            "{}/v4/spreadsheets/{}?fields=spreadsheetId",
            self.base_url, self.spreadsheet_id
        );
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        read_json(response, "spreadsheet metadata").await?;
        info!(spreadsheet_id = %self.spreadsheet_id, "spreadsheet reachable");
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, AdapterError> {
        let response = self
            .client
            .get(self.values_url(&self.range))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body = read_json(response, "sheet values").await?;

        let rows: Vec<Vec<String>> = body
            .get("values")
            .and_then(JsonValue::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_text).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        debug!(rows = rows.len(), "read sheet rows");
        Ok(rows)
    }

    async fn write_header(&self, header: &[&str]) -> Result<(), AdapterError> {
        let range = format!("{}!A1", self.sheet_name());
        let response = self
            .client
            .put(format!("{}?valueInputOption=RAW", self.values_url(&range)))
            .bearer_auth(&self.token)
            .json(&json!({ "range": range, "values": [header] }))
            .send()
            .await?;
        read_json(response, "sheet header update").await?;
        Ok(())
    }

    async fn update_rows(&self, updates: &[RowUpdate]) -> Result<(), AdapterError> {
        if updates.is_empty() {
            return Ok(());
        }
        let first_row = self.first_data_row();
        let data: Vec<JsonValue> = updates
            .iter()
            .map(|update| {
                json!({
                    "range": format!("{}!A{}", self.sheet_name(), first_row + update.position),
                    "values": [update.values],
                })
            })
            .collect();

        let url = format!(
            "{}/v4/spreadsheets/{}/values:batchUpdate",
            self.base_url, self.spreadsheet_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "valueInputOption": "RAW", "data": data }))
            .send()
            .await?;
        read_json(response, "sheet batch update").await?;
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), AdapterError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.values_url(&self.range)
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        read_json(response, "sheet append").await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
    failing: bool,
    calls: usize,
}

/// In-process table with the same positional semantics as a sheet.
#[derive(Debug, Default)]
pub struct MemoryTable {
    state: Mutex<MemoryState>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                rows,
                ..Default::default()
            }),
        }
    }

    /// Make every subsequent call fail as if the remote were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.lock().rows.clone()
    }

    pub fn header(&self) -> Option<Vec<String>> {
        self.lock().header.clone()
    }

    /// Number of remote calls made so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, AdapterError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.failing {
            return Err(AdapterError::Api("memory table is unavailable".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteTable for MemoryTable {
    async fn probe(&self) -> Result<(), AdapterError> {
        self.begin().map(|_| ())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, AdapterError> {
        Ok(self.begin()?.rows.clone())
    }

    async fn write_header(&self, header: &[&str]) -> Result<(), AdapterError> {
        self.begin()?.header = Some(header.iter().map(ToString::to_string).collect());
        Ok(())
    }

    async fn update_rows(&self, updates: &[RowUpdate]) -> Result<(), AdapterError> {
        let mut state = self.begin()?;
        for update in updates {
            if update.position >= state.rows.len() {
                state.rows.resize(update.position + 1, Vec::new());
            }
            state.rows[update.position] = update.values.clone();
        }
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), AdapterError> {
        self.begin()?.rows.extend(rows.iter().cloned());
        Ok(())
    }
}
