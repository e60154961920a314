//! Scoring-context assembly.
//!
//! The scorer receives the base profile plus the supplementary text of every
//! matched skill (heaviest first) and the portfolio reports those skills
//! reference. File reads are best-effort: a missing supplement degrades the
//! context, it never blocks scoring.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fnotify_core::MatchedSkill;
use tracing::debug;

pub struct ProfileAssembler {
    base_profile: String,
    skills_dir: PathBuf,
    portfolio_dir: PathBuf,
}

impl ProfileAssembler {
    pub fn load(
        profile_file: &Path,
        skills_dir: impl Into<PathBuf>,
        portfolio_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let base_profile = std::fs::read_to_string(profile_file)
            .with_context(|| format!("reading base profile {}", profile_file.display()))?;
        Ok(Self {
            base_profile,
            skills_dir: skills_dir.into(),
            portfolio_dir: portfolio_dir.into(),
        })
    }

    #[cfg(test)]
    pub fn from_text(base_profile: impl Into<String>) -> Self {
        Self {
            base_profile: base_profile.into(),
            skills_dir: PathBuf::from("skills"),
            portfolio_dir: PathBuf::from("portfolio"),
        }
    }

    /// Build the scoring context for one job's matched skills.
    ///
    /// Skill sections come in descending weight order (name as tie-break);
    /// portfolio reports are deduplicated and sorted so the output is stable
    /// for a given match set.
    pub fn assemble(&self, matched: &[MatchedSkill]) -> String {
        let mut context = self.base_profile.trim_end().to_string();

        let mut ordered: Vec<&MatchedSkill> = matched.iter().collect();
        ordered.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));

        for skill in &ordered {
            let Some(file) = &skill.profile_file else {
                continue;
            };
            match self.read_section(&self.skills_dir.join(file)) {
                Some(text) => {
                    context.push_str(&format!(
                        "\n\n## {} (Score: {}/10)\n\n{}",
                        skill.name, skill.score, text
                    ));
                }
                None => debug!(skill = %skill.name, %file, "skill supplement missing, skipped"),
            }
        }

        let projects: BTreeSet<&String> = matched.iter().flat_map(|m| &m.projects).collect();
        for project in projects {
            match self.read_section(&self.portfolio_dir.join(project)) {
                Some(text) => {
                    context.push_str(&format!("\n\n### Project report: {project}\n\n{text}"));
                }
                None => debug!(%project, "portfolio report missing, skipped"),
            }
        }

        context
    }

    fn read_section(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn matched(name: &str, weight: i32, profile_file: Option<&str>, projects: &[&str]) -> MatchedSkill {
        MatchedSkill {
            name: name.to_string(),
            weight,
            score: 9,
            matched_keyword: name.to_string(),
            profile_file: profile_file.map(ToString::to_string),
            projects: projects.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn sections_come_in_descending_weight_order() {
        let dir = tempdir().expect("tempdir");
        let skills = dir.path().join("skills");
        std::fs::create_dir_all(&skills).expect("mkdir");
        std::fs::write(skills.join("vba.md"), "Deep VBA background.").expect("write");
        std::fs::write(skills.join("excel.md"), "Excel power user.").expect("write");

        let assembler = ProfileAssembler {
            base_profile: "# Profile".to_string(),
            skills_dir: skills,
            portfolio_dir: dir.path().join("portfolio"),
        };
        let context = assembler.assemble(&[
            matched("excel", 3, Some("excel.md"), &[]),
            matched("vba", 8, Some("vba.md"), &[]),
        ]);

        let vba_at = context.find("Deep VBA background").expect("vba section");
        let excel_at = context.find("Excel power user").expect("excel section");
        assert!(vba_at < excel_at);
        assert!(context.contains("## vba (Score: 9/10)"));
    }

    #[test]
    fn shared_project_reports_appear_once() {
        let dir = tempdir().expect("tempdir");
        let portfolio = dir.path().join("portfolio");
        std::fs::create_dir_all(&portfolio).expect("mkdir");
        std::fs::write(portfolio.join("report_tool.md"), "Built a reporting tool.").expect("write");

        let assembler = ProfileAssembler {
            base_profile: "# Profile".to_string(),
            skills_dir: dir.path().join("skills"),
            portfolio_dir: portfolio,
        };
        let context = assembler.assemble(&[
            matched("vba", 8, None, &["report_tool.md"]),
            matched("excel", 3, None, &["report_tool.md"]),
        ]);

        assert_eq!(context.matches("Built a reporting tool.").count(), 1);
    }

    #[test]
    fn missing_files_degrade_to_the_base_profile() {
        let dir = tempdir().expect("tempdir");
        let assembler = ProfileAssembler {
            base_profile: "# Profile".to_string(),
            skills_dir: dir.path().join("skills"),
            portfolio_dir: dir.path().join("portfolio"),
        };
        let context = assembler.assemble(&[matched("vba", 8, Some("absent.md"), &["gone.md"])]);
        assert_eq!(context, "# Profile");
    }
}
