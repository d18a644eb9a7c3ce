//! Candidate CV loading and condensing for the analysis prompt.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

pub const MAX_PROMPT_CHARS: usize = 4000;
const TRUNCATION_NOTE: &str = "...\n[Content truncated due to length]";
const PRIORITY_SECTIONS: [&str; 5] = ["Summary", "Skills", "Experience", "Education", "Projects"];

/// A markdown CV split into `# Section` blocks; `## Sub` headings become keys
/// inside their section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateProfile {
    sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    name: String,
    content: String,
    subsections: Vec<(String, String)>,
}

impl Section {
    fn text(&self) -> String {
        let mut parts = Vec::new();
        if !self.content.is_empty() {
            parts.push(self.content.clone());
        }
        for (name, body) in &self.subsections {
            if body.is_empty() {
                parts.push(name.clone());
            } else {
                parts.push(format!("{name}\n{body}"));
            }
        }
        parts.join("\n\n")
    }
}

impl CandidateProfile {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading CV {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(markdown: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();
        let mut in_subsection = false;

        for line in markdown.lines() {
            if let Some(name) = line.strip_prefix("# ") {
                flush(&mut sections, &mut buffer, in_subsection);
                sections.push(Section {
                    name: name.trim().to_string(),
                    ..Default::default()
                });
                in_subsection = false;
            } else if let Some(name) = line.strip_prefix("## ") {
                flush(&mut sections, &mut buffer, in_subsection);
                if let Some(section) = sections.last_mut() {
                    section.subsections.push((name.trim().to_string(), String::new()));
                    in_subsection = true;
                }
            } else if !sections.is_empty() {
                buffer.push(line);
            }
        }
        flush(&mut sections, &mut buffer, in_subsection);

        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Priority sections first, then the rest in document order, capped at
    /// `max_chars` characters plus a truncation note.
    pub fn format_for_prompt(&self, max_chars: usize) -> String {
        let mut parts = Vec::new();

        for name in PRIORITY_SECTIONS {
            let Some(section) = self.section(name) else {
                continue;
            };
            let text = section.text();
            if text.is_empty() {
                continue;
            }
            if name == "Skills" {
                let skills = text
                    .lines()
                    .map(|l| l.trim().trim_start_matches('-').trim())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                parts.push(format!("Skills: {skills}"));
            } else {
                parts.push(format!("{name}:\n{text}"));
            }
        }

        for section in &self.sections {
            if PRIORITY_SECTIONS.contains(&section.name.as_str()) {
                continue;
            }
            let text = section.text();
            if !text.is_empty() {
                parts.push(format!("{}:\n{}", section.name, text));
            }
        }

        let formatted = parts.join("\n\n");
        if formatted.chars().count() > max_chars {
            let head: String = formatted.chars().take(max_chars).collect();
            format!("{head}{TRUNCATION_NOTE}")
        } else {
            formatted
        }
    }
}

fn flush(sections: &mut [Section], buffer: &mut Vec<&str>, in_subsection: bool) {
    let text = buffer.join("\n").trim().to_string();
    buffer.clear();
    let Some(section) = sections.last_mut() else {
        return;
    };
    match (in_subsection, section.subsections.last_mut()) {
        (true, Some((_, body))) => *body = text,
        _ => section.content = text,
    }
}
