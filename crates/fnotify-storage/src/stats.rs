//! Day-bucketed rolling skill-demand statistics.
//!
//! Counts every observed job exactly once, regardless of whether it ever
//! qualified for notification, and keeps a 30-day window of daily buckets
//! for trend reporting.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::blob::{read_json_blob, write_json_blob};

const RETENTION_DAYS: i64 = 30;
const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBucket {
    #[serde(default)]
    pub jobs_count: u64,
    #[serde(default)]
    pub skills: BTreeMap<String, u64>,
    #[serde(default)]
    pub unknown: BTreeMap<String, u64>,
}

/// On-disk blob shape:
/// `{last_updated, daily_data: {date: bucket}, analyzed_jobs: {job_id: date}}`.
/// Date keys use `%Y-%m-%d`, so lexicographic order is chronological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatsBlob {
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    daily_data: BTreeMap<String, DayBucket>,
    #[serde(default)]
    analyzed_jobs: BTreeMap<String, String>,
}

/// Aggregate over a set of day buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodTotals {
    pub jobs: u64,
    pub skills: BTreeMap<String, u64>,
    pub unknown: BTreeMap<String, u64>,
}

impl PeriodTotals {
    /// Skill counts sorted descending, name as tie-break, truncated to `n`.
    pub fn top_skills(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.skills, n)
    }

    pub fn top_unknown(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.unknown, n)
    }
}

fn top_n(map: &BTreeMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Week-over-week movement of one counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trend {
    /// No occurrences in either window.
    Quiet,
    /// Absent in the prior window, present now.
    New,
    /// More than +20% versus the prior window.
    Up(f64),
    /// More than -20% versus the prior window.
    Down(f64),
    Flat(f64),
}

impl Trend {
    pub fn classify(current: u64, previous: u64) -> Trend {
        if previous == 0 {
            return if current > 0 { Trend::New } else { Trend::Quiet };
        }
        let pct = (current as f64 - previous as f64) / previous as f64 * 100.0;
        if pct > 20.0 {
            Trend::Up(pct)
        } else if pct < -20.0 {
            Trend::Down(pct)
        } else {
            Trend::Flat(pct)
        }
    }

    pub fn label(&self) -> String {
        match self {
            Trend::Quiet => "-".to_string(),
            Trend::New => "NEW".to_string(),
            Trend::Up(pct) | Trend::Down(pct) | Trend::Flat(pct) => {
                if *pct > 0.0 {
                    format!("+{pct:.0}%")
                } else {
                    format!("{pct:.0}%")
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct SkillStatsLedger {
    path: PathBuf,
    blob: StatsBlob,
}

impl SkillStatsLedger {
    /// Load the ledger, upgrading an old cumulative blob in place.
    ///
    /// The upgrade attributes all historical counts to `today` — a one-time,
    /// lossy migration; the original per-day granularity is unrecoverable.
    pub async fn load(path: impl Into<PathBuf>, today: NaiveDate) -> Self {
        let path = path.into();
        let blob = match read_json_blob::<Value>(&path).await {
            Ok(Some(value)) => parse_or_migrate(value, today, &path),
            Ok(None) => StatsBlob::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "stats ledger unreadable, starting empty");
                StatsBlob::default()
            }
        };
        Self { path, blob }
    }

    /// Count one observed job under today's bucket. No-op when the job id
    /// already has a recorded day, so a re-observed job contributes to
    /// exactly one day's counts.
    pub fn record(
        &mut self,
        job_id: &str,
        matched_skills: &[String],
        unknown_keywords: &[String],
        today: NaiveDate,
    ) {
        if self.blob.analyzed_jobs.contains_key(job_id) {
            return;
        }
        let day_key = today.format(DATE_FMT).to_string();
        self.blob
            .analyzed_jobs
            .insert(job_id.to_string(), day_key.clone());

        let bucket = self.blob.daily_data.entry(day_key).or_default();
        bucket.jobs_count += 1;
        for skill in matched_skills {
            *bucket.skills.entry(skill.clone()).or_default() += 1;
        }
        for kw in unknown_keywords {
            *bucket.unknown.entry(kw.to_lowercase()).or_default() += 1;
        }
    }

    /// Sum the buckets for the given day keys. Days without data contribute
    /// nothing.
    pub fn aggregate(&self, dates: &[String]) -> PeriodTotals {
        let mut totals = PeriodTotals::default();
        for date in dates {
            let Some(bucket) = self.blob.daily_data.get(date) else {
                continue;
            };
            totals.jobs += bucket.jobs_count;
            for (skill, count) in &bucket.skills {
                *totals.skills.entry(skill.clone()).or_default() += count;
            }
            for (kw, count) in &bucket.unknown {
                *totals.unknown.entry(kw.clone()).or_default() += count;
            }
        }
        totals
    }

    /// Day keys for `days` days ending at `end - offset` (most recent first),
    /// e.g. `(today, 7, 0)` = this week, `(today, 7, 7)` = the week before.
    pub fn window(end: NaiveDate, days: u32, offset: u32) -> Vec<String> {
        (offset..offset + days)
            .map(|i| (end - Duration::days(i as i64)).format(DATE_FMT).to_string())
            .collect()
    }

    pub fn total_jobs(&self) -> u64 {
        self.blob.daily_data.values().map(|b| b.jobs_count).sum()
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.blob.last_updated.as_deref()
    }

    /// Persist the blob, pruning buckets and job-index entries older than the
    /// 30-day retention window. Pruned data is permanently discarded.
    pub async fn persist(&mut self, today: NaiveDate) -> anyhow::Result<()> {
        let cutoff = (today - Duration::days(RETENTION_DAYS))
            .format(DATE_FMT)
            .to_string();
        self.blob.daily_data.retain(|date, _| date.as_str() >= cutoff.as_str());
        self.blob
            .analyzed_jobs
            .retain(|_, date| date.as_str() >= cutoff.as_str());
        self.blob.last_updated = Some(Utc::now().to_rfc3339());
        write_json_blob(&self.path, &self.blob).await
    }
}

fn parse_or_migrate(value: Value, today: NaiveDate, path: &std::path::Path) -> StatsBlob {
    if value.get("daily_data").is_some() {
        return match serde_json::from_value(value) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(path = %path.display(), %err, "stats ledger malformed, starting empty");
                StatsBlob::default()
            }
        };
    }
    info!(path = %path.display(), "migrating cumulative stats blob to daily buckets");
    migrate_cumulative(&value, today)
}

/// Upgrade the legacy cumulative format
/// `{total_jobs_analyzed, known_skills: {name: {count}}, unknown_keywords:
/// {kw: {count}}, analyzed_jobs: [id]}` into a single bucket dated `today`.
fn migrate_cumulative(old: &Value, today: NaiveDate) -> StatsBlob {
    let day_key = today.format(DATE_FMT).to_string();

    let counts_of = |key: &str| -> BTreeMap<String, u64> {
        old.get(key)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(name, entry)| {
                        entry
                            .get("count")
                            .and_then(Value::as_u64)
                            .map(|count| (name.clone(), count))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let bucket = DayBucket {
        jobs_count: old
            .get("total_jobs_analyzed")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        skills: counts_of("known_skills"),
        unknown: counts_of("unknown_keywords"),
    };

    let analyzed_jobs = old
        .get("analyzed_jobs")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(|id| (id.to_string(), day_key.clone()))
                .collect()
        })
        .unwrap_or_default();

    StatsBlob {
        last_updated: old
            .get("last_updated")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        daily_data: BTreeMap::from([(day_key, bucket)]),
        analyzed_jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[tokio::test]
    async fn recording_the_same_job_twice_counts_once() {
        let dir = tempdir().expect("tempdir");
        let today = day(2026, 8, 24);
        let mut ledger = SkillStatsLedger::load(dir.path().join("stats.json"), today).await;

        ledger.record("job-1", &["vba".into()], &["svelte".into()], today);
        ledger.record("job-1", &["vba".into()], &["svelte".into()], today);

        let totals = ledger.aggregate(&SkillStatsLedger::window(today, 1, 0));
        assert_eq!(totals.jobs, 1);
        assert_eq!(totals.skills.get("vba"), Some(&1));
        assert_eq!(totals.unknown.get("svelte"), Some(&1));
    }

    #[tokio::test]
    async fn aggregate_sums_buckets_in_range_only() {
        let dir = tempdir().expect("tempdir");
        let today = day(2026, 8, 24);
        let mut ledger = SkillStatsLedger::load(dir.path().join("stats.json"), today).await;

        ledger.record("a", &["python".into()], &[], today);
        ledger.record("b", &["python".into()], &[], today - Duration::days(3));
        ledger.record("c", &["python".into()], &[], today - Duration::days(10));

        let week = ledger.aggregate(&SkillStatsLedger::window(today, 7, 0));
        assert_eq!(week.jobs, 2);
        assert_eq!(week.skills.get("python"), Some(&2));

        let month = ledger.aggregate(&SkillStatsLedger::window(today, 30, 0));
        assert_eq!(month.jobs, 3);
    }

    #[tokio::test]
    async fn persist_prunes_buckets_older_than_thirty_days() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stats.json");
        let today = day(2026, 8, 24);
        let mut ledger = SkillStatsLedger::load(&path, today).await;

        ledger.record("old", &["php".into()], &[], today - Duration::days(31));
        ledger.record("fresh", &["rust".into()], &[], today);
        ledger.persist(today).await.expect("persist");

        let reloaded = SkillStatsLedger::load(&path, today).await;
        let all = reloaded.aggregate(&SkillStatsLedger::window(today, 60, 0));
        assert_eq!(all.jobs, 1);
        assert!(all.skills.get("php").is_none());
        assert_eq!(all.skills.get("rust"), Some(&1));
        // The pruned job id is forgotten too, so it could be counted anew.
        assert_eq!(reloaded.blob.analyzed_jobs.len(), 1);
    }

    #[tokio::test]
    async fn cumulative_blob_migrates_into_one_bucket() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stats.json");
        let old = serde_json::json!({
            "last_updated": "2026-07-01T08:00:00",
            "total_jobs_analyzed": 42,
            "known_skills": {"vba": {"count": 12}, "python": {"count": 30}},
            "unknown_keywords": {"svelte": {"count": 4}},
            "analyzed_jobs": ["j1", "j2"]
        });
        tokio::fs::write(&path, serde_json::to_vec(&old).unwrap())
            .await
            .expect("write");

        let today = day(2026, 8, 24);
        let ledger = SkillStatsLedger::load(&path, today).await;

        assert_eq!(ledger.blob.daily_data.len(), 1);
        let bucket = ledger.blob.daily_data.get("2026-08-24").expect("bucket");
        assert_eq!(bucket.jobs_count, 42);
        assert_eq!(bucket.skills.get("vba"), Some(&12));
        assert_eq!(bucket.skills.get("python"), Some(&30));
        assert_eq!(bucket.unknown.get("svelte"), Some(&4));
        assert_eq!(ledger.blob.analyzed_jobs.get("j1"), Some(&"2026-08-24".to_string()));
    }

    #[test]
    fn trend_classification_boundaries() {
        assert_eq!(Trend::classify(0, 0), Trend::Quiet);
        assert_eq!(Trend::classify(3, 0), Trend::New);
        assert!(matches!(Trend::classify(13, 10), Trend::Up(_)));
        assert!(matches!(Trend::classify(7, 10), Trend::Down(_)));
        assert!(matches!(Trend::classify(11, 10), Trend::Flat(_)));
        assert!(matches!(Trend::classify(12, 10), Trend::Flat(_)));
        assert_eq!(Trend::classify(13, 10).label(), "+30%");
        assert_eq!(Trend::classify(7, 10).label(), "-30%");
    }

    #[test]
    fn top_skills_sorts_by_count_then_name() {
        let totals = PeriodTotals {
            jobs: 5,
            skills: BTreeMap::from([
                ("python".to_string(), 3),
                ("api".to_string(), 3),
                ("vba".to_string(), 9),
            ]),
            unknown: BTreeMap::new(),
        };
        assert_eq!(
            totals.top_skills(2),
            vec![("vba".to_string(), 9), ("api".to_string(), 3)]
        );
    }
}
