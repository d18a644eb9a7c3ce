//! Core domain model for jobscout: listings, run records and analysis results.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Canonical header of the published sheet and the CSV mirror.
pub const SHEET_COLUMNS: [&str; 26] = [
    "Timestamp",
    "Job Title",
    "Company",
    "Match Score",
    "Summary",
    "Recommendation Code",
    "Recommendation Details",
    "URL",
    "Job ID",
    "Location",
    "Seniority Level",
    "Employment Type",
    "Job Function",
    "Industries",
    "Posted Date",
    "Company Website",
    "Company LinkedIn",
    "Salary",
    "Human Fit Score",
    "ATS Fit Score",
    "Key Strengths",
    "Critical Gaps",
    "CV Tailoring",
    "Experience Positioning",
    "Talking Points",
    "Description",
];

/// Position of "Job ID" in [`SHEET_COLUMNS`]; rows are upserted by this key.
pub const JOB_ID_COLUMN: usize = 8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("listing identifier must not be empty")]
    MissingIdentifier,
    #[error("run identifier must not be empty")]
    MissingRunId,
    #[error("serializing search parameters: {0}")]
    Params(#[from] serde_json::Error),
}

/// A scraped job listing as it travels through the pipeline.
///
/// Field names follow the scraping actor's dataset items. Only the identifier,
/// title, company and location are persisted by the listing store; the rest
/// feeds the prompt and the published row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub title: String,
    #[serde(default, rename = "companyName", deserialize_with = "string_or_null")]
    pub company: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub location: String,
    #[serde(default, rename = "descriptionText", deserialize_with = "string_or_null")]
    pub description: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub link: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub seniority_level: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub employment_type: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub job_function: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub industries: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub posted_at: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub company_website: String,
    #[serde(default, rename = "companyLinkedinUrl", deserialize_with = "string_or_null")]
    pub company_linkedin: String,
    #[serde(default, deserialize_with = "salary_entries")]
    pub salary_info: Vec<String>,
}

impl Listing {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(ModelError::MissingIdentifier);
        }
        Ok(Self {
            id,
            title: title.into(),
            company: company.into(),
            location: location.into(),
            ..Default::default()
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn has_identifier(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn salary(&self) -> String {
        self.salary_info
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(text)) => text.trim().to_string(),
        Some(RawId::Int(n)) => n.to_string(),
        None => String::new(),
    })
}

fn salary_entries<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Option<String>>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}

/// Persisted view of a listing in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub first_seen: NaiveDate,
    pub last_checked: NaiveDate,
    pub processed: bool,
}

/// One row of the append-only run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub search_config: String,
    pub fetched_count: usize,
    pub new_count: usize,
}

impl RunRecord {
    pub fn new<P: Serialize + ?Sized>(
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        params: &P,
        fetched_count: usize,
        new_count: usize,
    ) -> Result<Self, ModelError> {
        let run_id = run_id.into();
        if run_id.trim().is_empty() {
            return Err(ModelError::MissingRunId);
        }
        Ok(Self {
            run_id,
            timestamp,
            search_config: serde_json::to_string(params)?,
            fetched_count,
            new_count,
        })
    }

    /// Timestamp-derived run identifier, e.g. `run_20260301_080000`.
    pub fn id_for(timestamp: DateTime<Utc>) -> String {
        format!("run_{}", timestamp.format("%Y%m%d_%H%M%S"))
    }
}

/// Categorical verdict attached to every analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationCode {
    Pursue,
    Consider,
    Avoid,
    #[default]
    Review,
}

impl RecommendationCode {
    /// Keywords searched in the recommendation text, highest priority first.
    pub const KEYWORDS: [RecommendationCode; 3] = [Self::Pursue, Self::Consider, Self::Avoid];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pursue => "PURSUE",
            Self::Consider => "CONSIDER",
            Self::Avoid => "AVOID",
            Self::Review => "REVIEW",
        }
    }
}

impl fmt::Display for RecommendationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields pulled out of one generated analysis.
///
/// Every field has a default so an empty or malformed response still yields
/// a complete value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseSections {
    pub score: f64,
    pub human_fit: f64,
    pub human_fit_text: String,
    pub ats_fit: f64,
    pub ats_fit_text: String,
    pub key_strengths: String,
    pub critical_gaps: String,
    pub cv_tailoring: String,
    pub experience_positioning: String,
    pub talking_points: String,
    pub recommendation: String,
    pub recommendation_code: RecommendationCode,
    pub summary: String,
}

/// Per-listing, per-run analysis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub match_score: f64,
    pub human_fit: f64,
    pub human_fit_text: String,
    pub ats_fit: f64,
    pub ats_fit_text: String,
    pub key_strengths: String,
    pub critical_gaps: String,
    pub cv_tailoring: String,
    pub experience_positioning: String,
    pub talking_points: String,
    pub recommendation: String,
    pub recommendation_code: RecommendationCode,
    pub summary: String,
    pub response_text: String,
    pub job_url: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub seniority_level: String,
    pub employment_type: String,
    pub job_function: String,
    pub industries: String,
    pub posted_at: String,
    pub company_website: String,
    pub company_linkedin: String,
    pub description: String,
    pub salary: String,
}

impl AnalysisResult {
    pub fn from_sections(
        listing: &Listing,
        sections: ResponseSections,
        response_text: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: listing.id.clone(),
            job_title: listing.title.clone(),
            company: listing.company.clone(),
            match_score: sections.score,
            human_fit: sections.human_fit,
            human_fit_text: sections.human_fit_text,
            ats_fit: sections.ats_fit,
            ats_fit_text: sections.ats_fit_text,
            key_strengths: sections.key_strengths,
            critical_gaps: sections.critical_gaps,
            cv_tailoring: sections.cv_tailoring,
            experience_positioning: sections.experience_positioning,
            talking_points: sections.talking_points,
            recommendation: sections.recommendation,
            recommendation_code: sections.recommendation_code,
            summary: sections.summary,
            response_text,
            job_url: listing.link.clone(),
            timestamp,
            location: listing.location.clone(),
            seniority_level: listing.seniority_level.clone(),
            employment_type: listing.employment_type.clone(),
            job_function: listing.job_function.clone(),
            industries: listing.industries.clone(),
            posted_at: listing.posted_at.clone(),
            company_website: listing.company_website.clone(),
            company_linkedin: listing.company_linkedin.clone(),
            description: listing.description.clone(),
            salary: listing.salary(),
        }
    }

    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.match_score >= threshold
    }

    /// Fixed-width row in [`SHEET_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.to_rfc3339(),
            self.job_title.clone(),
            self.company.clone(),
            format_score(self.match_score),
            self.summary.clone(),
            self.recommendation_code.to_string(),
            self.recommendation.clone(),
            self.job_url.clone(),
            self.job_id.clone(),
            self.location.clone(),
            self.seniority_level.clone(),
            self.employment_type.clone(),
            self.job_function.clone(),
            self.industries.clone(),
            self.posted_at.clone(),
            self.company_website.clone(),
            self.company_linkedin.clone(),
            self.salary.clone(),
            format_score(self.human_fit),
            format_score(self.ats_fit),
            self.key_strengths.clone(),
            self.critical_gaps.clone(),
            self.cv_tailoring.clone(),
            self.experience_positioning.clone(),
            self.talking_points.clone(),
            self.description.clone(),
        ]
    }
}

fn format_score(score: f64) -> String {
    format!("{score:.1}")
}

/// One search against the job board, expanded from the configured taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub country: String,
    pub category: String,
    pub role: String,
    pub keywords: String,
    pub location: String,
    pub jobs_per_search: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub experience_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_settings: Vec<String>,
    pub recent_jobs_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
