//! Analysis prompt templates stored as `<prompts_dir>/<name>.json`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

const FALLBACK_TEMPLATE: &str = "\
Human: Analyze how well this job matches the candidate's CV.

Here's the candidate's CV:

{candidate_cv}

Here's the job description:

{job_description}

Assistant:";

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    template: String,
}

/// Template with `{candidate_cv}` and `{job_description}` placeholders.
/// `{{` and `}}` render as literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_TEMPLATE)
    }

    /// Load a named template. A missing file falls back to the built-in
    /// template; an unreadable or malformed one is an error.
    pub async fn load(prompts_dir: &Path, name: &str) -> Result<Self> {
        let path = prompts_dir.join(format!("{name}.json"));
        if !fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = %path.display(), "prompt file not found; using built-in template");
            return Ok(Self::fallback());
        }

        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading prompt {}", path.display()))?;
        let file: PromptFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing prompt {}", path.display()))?;
        if file.template.trim().is_empty() {
            anyhow::bail!("prompt {} has an empty template", path.display());
        }
        Ok(Self::new(file.template))
    }

    pub fn render(&self, candidate_cv: &str, job_description: &str) -> String {
        let mut out = String::with_capacity(
            self.text.len() + candidate_cv.len() + job_description.len(),
        );
        let mut rest = self.text.as_str();

        while let Some(idx) = rest.find(['{', '}']) {
            out.push_str(&rest[..idx]);
            rest = &rest[idx..];

            if rest.starts_with("{{") || rest.starts_with("}}") {
                out.push_str(&rest[..1]);
                rest = &rest[2..];
            } else if let Some(after) = rest.strip_prefix("{candidate_cv}") {
                out.push_str(candidate_cv);
                rest = after;
            } else if let Some(after) = rest.strip_prefix("{job_description}") {
                out.push_str(job_description);
                rest = after;
            } else {
                out.push_str(&rest[..1]);
                rest = &rest[1..];
            }
        }
        out.push_str(rest);
        out
    }
}
