//! Deterministic whole-word skill matching.

use std::collections::HashSet;

use anyhow::Context;
use fnotify_core::{MatchedSkill, SkillIndex};
use regex::Regex;

/// Technology terms worth counting when they appear in postings even though
/// no configured skill covers them. Informational only.
pub fn default_watch_keywords() -> Vec<String> {
    [
        "angular", "django", "docker", "flutter", "golang", "graphql", "kubernetes", "laravel",
        "nextjs", "nodejs", "react", "rust", "shopify", "svelte", "swift", "symfony",
        "typescript", "vue", "webflow", "wordpress",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

struct CompiledKeyword {
    keyword: String,
    pattern: Regex,
}

struct CompiledSkill {
    name: String,
    weight: i32,
    score: u8,
    profile_file: Option<String>,
    projects: Vec<String>,
    keywords: Vec<CompiledKeyword>,
}

/// All keyword regexes are compiled once here; matching itself allocates
/// only the result vector.
pub struct SkillMatcher {
    skills: Vec<CompiledSkill>,
    watch: Vec<CompiledKeyword>,
}

/// Case-insensitive whole-word pattern. Word boundaries keep substrings
/// inside longer words from matching ("ecommerce" never triggers "c").
fn compile_keyword(keyword: &str) -> anyhow::Result<CompiledKeyword> {
    let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword)))
        .with_context(|| format!("compiling keyword pattern for {keyword:?}"))?;
    Ok(CompiledKeyword {
        keyword: keyword.to_string(),
        pattern,
    })
}

impl SkillMatcher {
    /// Watch keywords already covered by the index are dropped so a term is
    /// never counted as both known and unknown.
    pub fn new(index: &SkillIndex, watch_keywords: &[String]) -> anyhow::Result<Self> {
        let mut skills = Vec::with_capacity(index.skills.len());
        for (name, def) in &index.skills {
            skills.push(CompiledSkill {
                name: name.clone(),
                weight: def.weight,
                score: def.score,
                profile_file: def.profile_file.clone(),
                projects: def.projects.clone(),
                keywords: def
                    .keywords
                    .iter()
                    .map(|kw| compile_keyword(kw))
                    .collect::<anyhow::Result<Vec<_>>>()?,
            });
        }

        let known: HashSet<String> = index.known_keywords().into_iter().collect();
        let watch = watch_keywords
            .iter()
            .filter(|kw| !known.contains(&kw.to_lowercase()))
            .map(|kw| compile_keyword(kw))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self { skills, watch })
    }

    /// Per skill, keywords are tested in configured order and the first hit
    /// wins, so a skill contributes its weight at most once per job.
    pub fn match_job(&self, text: &str) -> Vec<MatchedSkill> {
        let mut matched = Vec::new();
        for skill in &self.skills {
            let Some(hit) = skill.keywords.iter().find(|kw| kw.pattern.is_match(text)) else {
                continue;
            };
            matched.push(MatchedSkill {
                name: skill.name.clone(),
                weight: skill.weight,
                score: skill.score,
                matched_keyword: hit.keyword.clone(),
                profile_file: skill.profile_file.clone(),
                projects: skill.projects.clone(),
            });
        }
        matched
    }

    /// Watch-list hits, lowercased.
    pub fn unknown_hits(&self, text: &str) -> Vec<String> {
        self.watch
            .iter()
            .filter(|kw| kw.pattern.is_match(text))
            .map(|kw| kw.keyword.to_lowercase())
            .collect()
    }
}
