//! Search-query expansion and job-board URL construction.

use std::collections::BTreeMap;

use jobscout_core::SearchQuery;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

const SEARCH_BASE_URL: &str = "https://www.linkedin.com/jobs/search/";

/// Board time filter for "posted in the last 30 days".
const RECENT_TIME_FILTER: &str = "r2592000";

/// Filters applied to every expanded query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub job_types: Vec<String>,
    #[serde(default)]
    pub experience_levels: Vec<String>,
    #[serde(default)]
    pub remote_settings: Vec<String>,
    #[serde(default)]
    pub recent_jobs_only: bool,
    #[serde(default)]
    pub time_filter: String,
}

/// One query per (country, category, role), in country-major order.
pub fn expand_queries(
    countries: &[String],
    roles: &BTreeMap<String, Vec<String>>,
    filters: &SearchFilters,
    jobs_per_search: u32,
) -> Vec<SearchQuery> {
    let mut queries = Vec::new();
    for country in countries {
        for (category, category_roles) in roles {
            for role in category_roles {
                let mut query = SearchQuery {
                    country: country.clone(),
                    category: category.clone(),
                    role: role.clone(),
                    keywords: role.clone(),
                    location: country.clone(),
                    jobs_per_search,
                    job_types: filters.job_types.clone(),
                    experience_levels: filters.experience_levels.clone(),
                    remote_settings: filters.remote_settings.clone(),
                    recent_jobs_only: filters.recent_jobs_only,
                    time_filter: Some(filters.time_filter.clone()).filter(|t| !t.is_empty()),
                    url: None,
                };
                query.url = Some(search_url(&query));
                queries.push(query);
            }
        }
    }
    queries
}

fn job_type_code(value: &str) -> Option<&'static str> {
    match value.to_lowercase().as_str() {
        "full-time" => Some("F"),
        "part-time" => Some("P"),
        "contract" => Some("C"),
        "temporary" => Some("T"),
        "volunteer" => Some("V"),
        "internship" => Some("I"),
        "other" => Some("O"),
        _ => None,
    }
}

fn experience_code(value: &str) -> Option<&'static str> {
    match value.to_lowercase().as_str() {
        "internship" => Some("1"),
        "entry" => Some("2"),
        "associate" => Some("3"),
        "mid-senior" => Some("4"),
        "director" => Some("5"),
        "executive" => Some("6"),
        _ => None,
    }
}

fn remote_code(value: &str) -> Option<&'static str> {
    match value.to_lowercase().as_str() {
        "on-site" => Some("1"),
        "remote" => Some("2"),
        "hybrid" => Some("3"),
        _ => None,
    }
}

fn filter_param(
    key: &str,
    values: &[String],
    code: fn(&str) -> Option<&'static str>,
) -> Option<String> {
    let codes: Vec<&str> = values.iter().filter_map(|v| code(v)).collect();
    (!codes.is_empty()).then(|| format!("{key}={}", codes.join(",")))
}

/// Board search URL for one query. Unknown filter values are dropped.
pub fn search_url(query: &SearchQuery) -> String {
    let mut params = Vec::new();

    if !query.keywords.is_empty() {
        params.push(format!(
            "keywords={}",
            utf8_percent_encode(&query.keywords, NON_ALPHANUMERIC)
        ));
    }
    if !query.location.is_empty() {
        params.push(format!(
            "location={}",
            utf8_percent_encode(&query.location, NON_ALPHANUMERIC)
        ));
    }
    params.extend(filter_param("f_JT", &query.job_types, job_type_code));
    params.extend(filter_param("f_E", &query.experience_levels, experience_code));
    params.extend(filter_param("f_WT", &query.remote_settings, remote_code));

    match query.time_filter.as_deref().filter(|t| !t.is_empty()) {
        Some(filter) => params.push(format!("f_TPR={filter}")),
        None if query.recent_jobs_only => params.push(format!("f_TPR={RECENT_TIME_FILTER}")),
        None => {}
    }

    if params.is_empty() {
        SEARCH_BASE_URL.to_string()
    } else {
        format!("{SEARCH_BASE_URL}?{}", params.join("&"))
    }
}

/// Listings to request per URL so the run lands near `total_target`, bounded
/// by `max_per_search` and never below 20.
pub fn jobs_per_url(max_per_search: u32, total_target: u32, url_count: usize) -> u32 {
    if url_count == 0 {
        return max_per_search;
    }
    let share = total_target / u32::try_from(url_count).unwrap_or(u32::MAX);
    max_per_search.min(share.max(20))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> SearchFilters {
        SearchFilters {
            job_types: vec!["full-time".into(), "part-time".into()],
            experience_levels: vec!["mid-senior".into(), "director".into(), "wizard".into()],
            remote_settings: vec!["remote".into()],
            recent_jobs_only: true,
            time_filter: String::new(),
        }
    }

    #[test]
    fn expansion_covers_every_country_and_role() {
        let countries = vec!["Poland".to_string(), "Spain".to_string()];
        let mut roles = BTreeMap::new();
        roles.insert(
            "Product Leadership".to_string(),
            vec!["Senior Product Manager".to_string(), "Director of Product".to_string()],
        );
        roles.insert("Operations".to_string(), vec!["Chief of Staff".to_string()]);

        let queries = expand_queries(&countries, &roles, &filters(), 30);
        assert_eq!(queries.len(), 6);
        assert_eq!(queries[0].country, "Poland");
        assert_eq!(queries[0].category, "Operations");
        assert_eq!(queries[0].keywords, "Chief of Staff");
        assert!(queries.iter().all(|q| q.url.is_some()));
        assert_eq!(queries[5].location, "Spain");
    }

    #[test]
    fn url_encodes_terms_and_filters() {
        let mut roles = BTreeMap::new();
        roles.insert("p".to_string(), vec!["Senior Product Manager".to_string()]);
        let query = expand_queries(&["United Kingdom".to_string()], &roles, &filters(), 30)
            .remove(0);

        assert_eq!(
            query.url.as_deref(),
            Some(
                "https://www.linkedin.com/jobs/search/?keywords=Senior%20Product%20Manager\
                 &location=United%20Kingdom&f_JT=F,P&f_E=4,5&f_WT=2&f_TPR=r2592000"
            )
        );
    }

    #[test]
    fn explicit_time_filter_wins_over_recent_flag() {
        let mut f = filters();
        f.time_filter = "r86400".into();
        let mut roles = BTreeMap::new();
        roles.insert("p".to_string(), vec!["PM".to_string()]);
        let url = expand_queries(&["Spain".to_string()], &roles, &f, 30)
            .remove(0)
            .url
            .unwrap();

        assert!(url.ends_with("f_TPR=r86400"));
        assert_eq!(url.matches("f_TPR").count(), 1);
    }

    #[test]
    fn per_url_count_is_bounded() {
        assert_eq!(jobs_per_url(30, 200, 24), 20);
        assert_eq!(jobs_per_url(30, 200, 4), 30);
        assert_eq!(jobs_per_url(100, 200, 4), 50);
        assert_eq!(jobs_per_url(30, 200, 0), 30);
    }
}
