//! Structured-field extraction from generated analysis text.
//!
//! The model is asked to wrap each field in `<tag>...</tag>`. Extraction is
//! total: a missing or malformed field falls back to `0.0` / `""` / `REVIEW`.

use std::sync::LazyLock;

use jobscout_core::{RecommendationCode, ResponseSections};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    /// Whole content must be a number.
    Number,
    /// First number in the content is the score; the content is kept as text.
    ScoredText,
    Text,
    /// Text plus a categorical code.
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Score,
    HumanFit,
    AtsFit,
    KeyStrengths,
    CriticalGaps,
    CvTailoring,
    ExperiencePositioning,
    TalkingPoints,
    Recommendation,
    Summary,
}

const TAGS: [(&str, TagKind, Slot); 10] = [
    ("score", TagKind::Number, Slot::Score),
    ("human_fit", TagKind::ScoredText, Slot::HumanFit),
    ("ats_fit", TagKind::ScoredText, Slot::AtsFit),
    ("key_strengths", TagKind::Text, Slot::KeyStrengths),
    ("critical_gaps", TagKind::Text, Slot::CriticalGaps),
    ("cv_tailoring", TagKind::Text, Slot::CvTailoring),
    ("experience_positioning", TagKind::Text, Slot::ExperiencePositioning),
    ("talking_points", TagKind::Text, Slot::TalkingPoints),
    ("recommendation", TagKind::Recommendation, Slot::Recommendation),
    ("summary", TagKind::Text, Slot::Summary),
];

static TAG_PATTERNS: LazyLock<Vec<(TagKind, Slot, Regex)>> = LazyLock::new(|| {
    TAGS.iter()
        .map(|(tag, kind, slot)| {
            let pattern = format!(r"(?s)<{tag}>\s*(.*?)\s*</{tag}>");
            (*kind, *slot, Regex::new(&pattern).expect("valid tag regex"))
        })
        .collect()
});

static WHOLE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("valid number regex"));

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

enum Value {
    Number(f64),
    ScoredText(f64, String),
    Text(String),
    Recommendation(String, RecommendationCode),
}

/// Pull every tagged field out of `raw`. Only the first occurrence of a tag counts.
pub fn extract(raw: &str) -> ResponseSections {
    let mut sections = ResponseSections::default();

    for (kind, slot, pattern) in TAG_PATTERNS.iter() {
        let Some(content) = pattern
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
        else {
            continue;
        };

        let value = match kind {
            TagKind::Number => Value::Number(whole_number(content)),
            TagKind::ScoredText => Value::ScoredText(first_number(content), content.to_string()),
            TagKind::Text => Value::Text(content.to_string()),
            TagKind::Recommendation => {
                Value::Recommendation(content.to_string(), recommendation_code(content))
            }
        };
        assign(&mut sections, *slot, value);
    }

    sections
}

fn assign(sections: &mut ResponseSections, slot: Slot, value: Value) {
    match (slot, value) {
        (Slot::Score, Value::Number(n)) => sections.score = n,
        (Slot::HumanFit, Value::ScoredText(n, text)) => {
            sections.human_fit = n;
            sections.human_fit_text = text;
        }
        (Slot::AtsFit, Value::ScoredText(n, text)) => {
            sections.ats_fit = n;
            sections.ats_fit_text = text;
        }
        (Slot::KeyStrengths, Value::Text(text)) => sections.key_strengths = text,
        (Slot::CriticalGaps, Value::Text(text)) => sections.critical_gaps = text,
        (Slot::CvTailoring, Value::Text(text)) => sections.cv_tailoring = text,
        (Slot::ExperiencePositioning, Value::Text(text)) => sections.experience_positioning = text,
        (Slot::TalkingPoints, Value::Text(text)) => sections.talking_points = text,
        (Slot::Summary, Value::Text(text)) => sections.summary = text,
        (Slot::Recommendation, Value::Recommendation(text, code)) => {
            sections.recommendation = text;
            sections.recommendation_code = code;
        }
        // The tag table pairs every slot with exactly one kind.
        _ => {}
    }
}

fn whole_number(content: &str) -> f64 {
    if WHOLE_NUMBER.is_match(content) {
        content.parse().unwrap_or(0.0)
    } else {
        0.0
    }
}

fn first_number(content: &str) -> f64 {
    FIRST_NUMBER
        .find(content)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

/// Leading keyword wins; otherwise the first keyword present by priority;
/// otherwise `REVIEW`.
pub fn recommendation_code(text: &str) -> RecommendationCode {
    let upper = text.to_uppercase();
    RecommendationCode::KEYWORDS
        .iter()
        .find(|code| upper.starts_with(code.as_str()))
        .or_else(|| {
            RecommendationCode::KEYWORDS
                .iter()
                .find(|code| upper.contains(code.as_str()))
        })
        .copied()
        .unwrap_or(RecommendationCode::Review)
}
