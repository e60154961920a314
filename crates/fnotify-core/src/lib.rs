//! Core domain model for the Freelance Notify intake pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fnotify-core";

/// One candidate job posting pulled from a source.
///
/// Created at acquisition, enriched in place by matching and scoring,
/// discarded after dispatch or rejection. Only `id` survives the run
/// (in the dedup ledger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCandidate {
    /// Source-qualified identifier. For link-based sources this is a
    /// truncated one-way hash of a canonical locator fragment.
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_id: String,
    pub acquired_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    /// Raw rate/budget text as shown by the source ("500 €", "$30/hr").
    #[serde(default)]
    pub rate_text: Option<String>,
    /// Numeric budget extracted from `rate_text`, when one could be read.
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub experience_level: Option<String>,
    /// Comma-joined skill tags the source attached to the posting.
    #[serde(default)]
    pub required_skills: Option<String>,
    #[serde(default)]
    pub posted_at: Option<String>,
    // Enrichment, filled by the pipeline.
    #[serde(default)]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub total_weight: i32,
    #[serde(default)]
    pub ai_score: Option<u8>,
    #[serde(default)]
    pub ai_reason: Option<String>,
}

impl JobCandidate {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            source_id: source_id.into(),
            acquired_at: Utc::now(),
            description: None,
            rate_text: None,
            budget: None,
            category: None,
            experience_level: None,
            required_skills: None,
            posted_at: None,
            matched_skills: Vec::new(),
            total_weight: 0,
            ai_score: None,
            ai_reason: None,
        }
    }

    /// Concatenated text the skill matcher runs against.
    pub fn match_text(&self) -> String {
        let mut text = self.title.clone();
        for part in [
            self.description.as_deref(),
            self.category.as_deref(),
            self.required_skills.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            text.push(' ');
            text.push_str(part);
        }
        text
    }
}

/// One skill in the weighted matching index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    /// Keyword triggers, tested in configured order; the first hit wins.
    pub keywords: Vec<String>,
    /// Signed contribution to the weight gate. Negative weights demote.
    #[serde(default)]
    pub weight: i32,
    /// Self-assessed relevance, 1-10, surfaced in the scoring context.
    #[serde(default)]
    pub score: u8,
    /// Supplementary profile text for this skill, relative to the skills dir.
    #[serde(default)]
    pub profile_file: Option<String>,
    /// Portfolio report files backing this skill, relative to the portfolio dir.
    #[serde(default)]
    pub projects: Vec<String>,
}

/// Name-to-definition index, loaded once and immutable for the run.
///
/// BTreeMap keeps skill iteration deterministic; per-skill keyword order is
/// the configured order from the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillIndex {
    #[serde(default)]
    pub skills: BTreeMap<String, SkillDefinition>,
}

impl SkillIndex {
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Every keyword configured anywhere in the index, lowercased.
    pub fn known_keywords(&self) -> Vec<String> {
        self.skills
            .values()
            .flat_map(|s| s.keywords.iter().map(|k| k.to_lowercase()))
            .collect()
    }
}

/// One skill hit against a job's text. Derived only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedSkill {
    pub name: String,
    pub weight: i32,
    pub score: u8,
    pub matched_keyword: String,
    pub profile_file: Option<String>,
    pub projects: Vec<String>,
}

pub fn total_weight(matched: &[MatchedSkill]) -> i32 {
    matched.iter().map(|m| m.weight).sum()
}

/// Verdict from the external semantic scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: u8,
    #[serde(default)]
    pub reason: String,
}

/// Identifier for one pipeline cycle, used in logs and reports.
pub fn new_run_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_text_concatenates_present_parts_only() {
        let mut job = JobCandidate::new("j1", "Need VBA macro", "https://x/1", "feed");
        job.category = Some("Automation".into());
        assert_eq!(job.match_text(), "Need VBA macro Automation");

        job.description = Some("for Excel".into());
        job.required_skills = Some("vba, excel".into());
        assert_eq!(job.match_text(), "Need VBA macro for Excel Automation vba, excel");
    }

    #[test]
    fn total_weight_is_sum_of_matched_weights() {
        let matched = vec![
            MatchedSkill {
                name: "vba".into(),
                weight: 8,
                score: 9,
                matched_keyword: "vba".into(),
                profile_file: None,
                projects: vec![],
            },
            MatchedSkill {
                name: "wordpress".into(),
                weight: -3,
                score: 2,
                matched_keyword: "wordpress".into(),
                profile_file: None,
                projects: vec![],
            },
        ];
        assert_eq!(total_weight(&matched), 5);
    }

    #[test]
    fn skill_index_collects_lowercased_keywords() {
        let mut index = SkillIndex::default();
        index.skills.insert(
            "python".into(),
            SkillDefinition {
                keywords: vec!["Python".into(), "py".into()],
                weight: 7,
                score: 8,
                profile_file: None,
                projects: vec![],
            },
        );
        assert_eq!(index.known_keywords(), vec!["python", "py"]);
    }
}
