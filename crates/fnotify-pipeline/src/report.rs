//! Weekly skill-demand digest.

use chrono::{NaiveDate, Utc};
use fnotify_storage::{SkillStatsLedger, Trend};

use crate::notify::{field, Embed};

const REPORT_COLOR: u32 = 0x9b59b6;
const TOP_SKILLS: usize = 10;
const TOP_UNKNOWN: usize = 5;

/// Build the weekly digest embed: this week's top skills with
/// week-over-week trends, newly appearing skills, and the most frequent
/// uncovered keywords.
pub fn weekly_report_embed(stats: &SkillStatsLedger, today: NaiveDate) -> Embed {
    let this_week = stats.aggregate(&SkillStatsLedger::window(today, 7, 0));
    let prev_week = stats.aggregate(&SkillStatsLedger::window(today, 7, 7));
    let month = stats.aggregate(&SkillStatsLedger::window(today, 30, 0));

    let volume = Trend::classify(this_week.jobs, prev_week.jobs);
    let mut fields = Vec::new();

    let top = this_week.top_skills(TOP_SKILLS);
    if !top.is_empty() {
        let lines: Vec<String> = top
            .iter()
            .map(|(name, count)| {
                let prev = prev_week.skills.get(name).copied().unwrap_or(0);
                let trend = Trend::classify(*count, prev);
                format!("{name}: {count} ({})", trend.label())
            })
            .collect();
        fields.push(field("Top skills (7d)", &lines.join("\n"), false));
    }

    let emerging: Vec<String> = top
        .iter()
        .filter(|(name, _)| !prev_week.skills.contains_key(name))
        .map(|(name, count)| format!("{name}: {count}"))
        .collect();
    if !emerging.is_empty() {
        fields.push(field("Emerging skills", &emerging.join("\n"), false));
    }

    let unknown = this_week.top_unknown(TOP_UNKNOWN);
    if !unknown.is_empty() {
        let lines: Vec<String> = unknown
            .iter()
            .map(|(kw, count)| format!("{kw}: {count}"))
            .collect();
        fields.push(field("Uncovered keywords (7d)", &lines.join("\n"), false));
    }

    Embed {
        title: format!("Weekly skill report — {today}"),
        url: None,
        color: REPORT_COLOR,
        description: Some(format!(
            "{} jobs analyzed this week ({} vs last week), {} over the last 30 days.",
            this_week.jobs,
            volume.label(),
            month.jobs
        )),
        fields,
        footer: None,
        timestamp: Utc::now().to_rfc3339(),
    }
}
