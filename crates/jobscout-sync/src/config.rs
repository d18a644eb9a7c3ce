//! Pipeline configuration: environment defaults, YAML profiles and secrets.

use std::collections::BTreeMap;
use std::env::VarError;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jobscout_adapters::{ProviderKind, SearchFilters};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

pub const DEFAULT_SHEET_RANGE: &str = "Job Matches!A2:Z";
pub const DEFAULT_SCHEDULE: &str = "0 8 * * *";
pub const DEFAULT_LLM_MODEL: &str = "claude-3-opus-20240229";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Everything a run needs besides secrets. Passed explicitly into each component.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub countries: Vec<String>,
    pub job_roles: BTreeMap<String, Vec<String>>,
    pub filters: SearchFilters,
    pub max_jobs_per_search: u32,
    pub total_target_jobs: u32,
    /// Zero analyzes every fetched listing.
    pub max_jobs_to_analyze: usize,
    pub match_score_threshold: f64,
    pub analysis_concurrency: usize,
    pub cv_path: PathBuf,
    pub prompt_name: String,
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub database_path: PathBuf,
    pub sheet_id: Option<String>,
    pub sheet_range: String,
    pub llm_provider: ProviderKind,
    pub llm_model: String,
    pub schedule_cron: String,
    pub log_level: String,
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            countries: [
                "Poland",
                "Portugal",
                "Spain",
                "France",
                "Germany",
                "United Kingdom",
            ]
            .map(String::from)
            .to_vec(),
            job_roles: BTreeMap::from([
                (
                    "Product Leadership".to_string(),
                    vec!["Senior Product Manager".to_string(), "Director of Product".to_string()],
                ),
                (
                    "Strategic Operations".to_string(),
                    vec!["Director of Operations".to_string(), "Chief of Staff".to_string()],
                ),
            ]),
            filters: SearchFilters {
                job_types: vec!["full-time".to_string()],
                experience_levels: vec!["mid-senior".to_string(), "director".to_string()],
                remote_settings: vec![
                    "on-site".to_string(),
                    "remote".to_string(),
                    "hybrid".to_string(),
                ],
                recent_jobs_only: true,
                time_filter: "r2592000".to_string(),
            },
            max_jobs_per_search: 30,
            total_target_jobs: 200,
            max_jobs_to_analyze: 50,
            match_score_threshold: 7.0,
            analysis_concurrency: 4,
            cv_path: data_dir.join("cv.md"),
            prompt_name: "job_analysis".to_string(),
            prompts_dir: data_dir.join("prompts"),
            database_path: data_dir.join("jobs_database.db"),
            data_dir,
            results_dir: PathBuf::from("results"),
            sheet_id: None,
            sheet_range: DEFAULT_SHEET_RANGE.to_string(),
            llm_provider: ProviderKind::Anthropic,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            schedule_cron: DEFAULT_SCHEDULE.to_string(),
            log_level: "info".to_string(),
            http_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    /// Read overrides from the process environment. Call `dotenvy::dotenv()` first
    /// if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key))
    }

    /// Build a config from an arbitrary variable lookup; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let defaults = Self::default();

        let or_default = |var: &str, default: String| -> String {
            lookup(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };
        let list = |var: &str, default: Vec<String>| -> Vec<String> {
            match lookup(var) {
                Ok(raw) if !raw.trim().is_empty() => split_list(&raw),
                _ => default,
            }
        };
        let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason,
        };

        macro_rules! parse_or {
            ($var:expr, $default:expr, $ty:ty) => {
                match lookup($var) {
                    Ok(raw) if !raw.trim().is_empty() => raw
                        .trim()
                        .parse::<$ty>()
                        .map_err(|e| invalid($var, e.to_string()))?,
                    _ => $default,
                }
            };
        }

        let llm_provider = match lookup("LLM_PROVIDER") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .parse::<ProviderKind>()
                .map_err(|e| invalid("LLM_PROVIDER", e.to_string()))?,
            _ => defaults.llm_provider,
        };

        let data_dir = PathBuf::from(or_default(
            "JOBSCOUT_DATA_DIR",
            defaults.data_dir.display().to_string(),
        ));
        let config = Self {
            countries: list("JOBSCOUT_COUNTRIES", defaults.countries),
            job_roles: defaults.job_roles,
            filters: SearchFilters {
                job_types: list("JOBSCOUT_JOB_TYPES", defaults.filters.job_types),
                experience_levels: list(
                    "JOBSCOUT_EXPERIENCE_LEVELS",
                    defaults.filters.experience_levels,
                ),
                remote_settings: list("JOBSCOUT_REMOTE_SETTINGS", defaults.filters.remote_settings),
                recent_jobs_only: parse_or!(
                    "JOBSCOUT_RECENT_ONLY",
                    defaults.filters.recent_jobs_only,
                    bool
                ),
                time_filter: or_default("JOBSCOUT_TIME_FILTER", defaults.filters.time_filter),
            },
            max_jobs_per_search: parse_or!(
                "JOBSCOUT_MAX_JOBS_PER_SEARCH",
                defaults.max_jobs_per_search,
                u32
            ),
            total_target_jobs: parse_or!(
                "JOBSCOUT_TOTAL_TARGET_JOBS",
                defaults.total_target_jobs,
                u32
            ),
            max_jobs_to_analyze: parse_or!(
                "JOBSCOUT_MAX_JOBS_TO_ANALYZE",
                defaults.max_jobs_to_analyze,
                usize
            ),
            match_score_threshold: parse_or!(
                "JOBSCOUT_MATCH_THRESHOLD",
                defaults.match_score_threshold,
                f64
            ),
            analysis_concurrency: parse_or!(
                "JOBSCOUT_ANALYSIS_CONCURRENCY",
                defaults.analysis_concurrency,
                usize
            ),
            cv_path: PathBuf::from(or_default(
                "JOBSCOUT_CV_PATH",
                data_dir.join("cv.md").display().to_string(),
            )),
            prompt_name: or_default("JOBSCOUT_PROMPT", defaults.prompt_name),
            prompts_dir: PathBuf::from(or_default(
                "JOBSCOUT_PROMPTS_DIR",
                data_dir.join("prompts").display().to_string(),
            )),
            database_path: PathBuf::from(or_default(
                "JOBSCOUT_DATABASE_PATH",
                data_dir.join("jobs_database.db").display().to_string(),
            )),
            results_dir: PathBuf::from(or_default(
                "JOBSCOUT_RESULTS_DIR",
                defaults.results_dir.display().to_string(),
            )),
            data_dir,
            sheet_id: lookup("GOOGLE_SHEET_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            sheet_range: or_default("JOBSCOUT_SHEET_RANGE", defaults.sheet_range),
            llm_provider,
            llm_model: or_default("LLM_MODEL", defaults.llm_model),
            schedule_cron: or_default("JOBSCOUT_SCHEDULE", defaults.schedule_cron),
            log_level: or_default("JOBSCOUT_LOG_LEVEL", defaults.log_level),
            http_timeout_secs: parse_or!(
                "JOBSCOUT_HTTP_TIMEOUT_SECS",
                defaults.http_timeout_secs,
                u64
            ),
        };

        if config.analysis_concurrency == 0 {
            return Err(invalid(
                "JOBSCOUT_ANALYSIS_CONCURRENCY",
                "must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Named, partial override of [`PipelineConfig`] stored as YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_roles: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_levels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_settings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_jobs_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_jobs_per_search: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_target_jobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_jobs_to_analyze: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

impl ConfigProfile {
    pub fn path_for(profiles_dir: &Path, name: &str) -> PathBuf {
        profiles_dir.join(format!("{name}.yaml"))
    }

    pub async fn load(profiles_dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path_for(profiles_dir, name);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading profile {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing profile {}", path.display()))
    }

    /// Write this profile, merged over any existing profile of the same name.
    pub async fn save(&self, profiles_dir: &Path, name: &str) -> Result<PathBuf> {
        let path = Self::path_for(profiles_dir, name);
        let merged = if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load(profiles_dir, name).await?.merge(self.clone())
        } else {
            self.clone()
        };

        fs::create_dir_all(profiles_dir)
            .await
            .with_context(|| format!("creating {}", profiles_dir.display()))?;
        let yaml = serde_yaml::to_string(&merged).context("serializing profile")?;
        fs::write(&path, yaml)
            .await
            .with_context(|| format!("writing profile {}", path.display()))?;
        Ok(path)
    }

    /// Fields set in `other` win.
    pub fn merge(self, other: ConfigProfile) -> ConfigProfile {
        ConfigProfile {
            countries: other.countries.or(self.countries),
            job_roles: other.job_roles.or(self.job_roles),
            job_types: other.job_types.or(self.job_types),
            experience_levels: other.experience_levels.or(self.experience_levels),
            remote_settings: other.remote_settings.or(self.remote_settings),
            recent_jobs_only: other.recent_jobs_only.or(self.recent_jobs_only),
            time_filter: other.time_filter.or(self.time_filter),
            max_jobs_per_search: other.max_jobs_per_search.or(self.max_jobs_per_search),
            total_target_jobs: other.total_target_jobs.or(self.total_target_jobs),
            max_jobs_to_analyze: other.max_jobs_to_analyze.or(self.max_jobs_to_analyze),
            match_score_threshold: other.match_score_threshold.or(self.match_score_threshold),
            cv_path: other.cv_path.or(self.cv_path),
            prompt_name: other.prompt_name.or(self.prompt_name),
            llm_provider: other.llm_provider.or(self.llm_provider),
            llm_model: other.llm_model.or(self.llm_model),
        }
    }

    pub fn apply(&self, config: &mut PipelineConfig) {
        let p = self.clone();
        if let Some(v) = p.countries {
            config.countries = v;
        }
        if let Some(v) = p.job_roles {
            config.job_roles = v;
        }
        if let Some(v) = p.job_types {
            config.filters.job_types = v;
        }
        if let Some(v) = p.experience_levels {
            config.filters.experience_levels = v;
        }
        if let Some(v) = p.remote_settings {
            config.filters.remote_settings = v;
        }
        if let Some(v) = p.recent_jobs_only {
            config.filters.recent_jobs_only = v;
        }
        if let Some(v) = p.time_filter {
            config.filters.time_filter = v;
        }
        if let Some(v) = p.max_jobs_per_search {
            config.max_jobs_per_search = v;
        }
        if let Some(v) = p.total_target_jobs {
            config.total_target_jobs = v;
        }
        if let Some(v) = p.max_jobs_to_analyze {
            config.max_jobs_to_analyze = v;
        }
        if let Some(v) = p.match_score_threshold {
            config.match_score_threshold = v;
        }
        if let Some(v) = p.cv_path {
            config.cv_path = v;
        }
        if let Some(v) = p.prompt_name {
            config.prompt_name = v;
        }
        if let Some(v) = p.llm_provider {
            config.llm_provider = v;
        }
        if let Some(v) = p.llm_model {
            config.llm_model = v;
        }
    }
}

/// Credentials, read from the environment only and never written to profiles.
#[derive(Clone, Default)]
pub struct Secrets {
    pub apify_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_sheets_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("apify_api_key", &mask(&self.apify_api_key))
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("google_sheets_token", &mask(&self.google_sheets_token))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key))
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let get = |var: &str| {
            lookup(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            apify_api_key: get("APIFY_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            google_sheets_token: get("GOOGLE_SHEETS_TOKEN"),
        }
    }
}
