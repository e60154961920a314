//! One intake cycle: acquire, count, dedup, gate, notify.
//!
//! Ordering invariants the cycle protects:
//! - every acquired job is counted in the skill statistics, duplicate or not;
//! - the dedup ledger is persisted before any notification goes out, so a
//!   crash mid-cycle can drop a notification but never repeat one;
//! - scorer calls are paced with a jittered delay, and only jobs that pass
//!   the weight threshold spend one.

use chrono::Utc;
use fnotify_core::{new_run_id, total_weight, JobCandidate};
use fnotify_sources::JobSource;
use fnotify_storage::{DedupLedger, SkillStatsLedger, StealthDelays};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gate::QualificationGate;
use crate::matching::SkillMatcher;
use crate::notify::{ColorScheme, Dispatcher};
use crate::profile::ProfileAssembler;
use crate::score::Scorer;

/// Cycle-level verdict, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The source contributed nothing this cycle.
    SourceUnreachable,
    /// Nothing fresh matched any configured skill at or above the threshold.
    NoJobsMatched,
    /// Jobs reached the scorer but none came back scored.
    NoJobsScored,
    Notified(usize),
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub query: String,
    pub source_id: String,
    /// Candidates the source returned.
    pub acquired: usize,
    /// Candidates not already in the dedup ledger.
    pub fresh: usize,
    /// Fresh candidates that passed both gate stages.
    pub qualified: usize,
    /// Qualifying jobs actually handed to the webhook.
    pub notified: usize,
    pub outcome: CycleOutcome,
}

pub struct Pipeline {
    pub matcher: SkillMatcher,
    pub assembler: ProfileAssembler,
    pub gate: QualificationGate,
    pub scorer: Box<dyn Scorer>,
    pub dispatcher: Dispatcher,
    pub colors: ColorScheme,
    /// Jittered pause before each scorer call.
    pub score_pacing: StealthDelays,
}

impl Pipeline {
    pub async fn run_cycle(
        &self,
        source: &dyn JobSource,
        query: &str,
        max_jobs: usize,
        dedup: &mut DedupLedger,
        stats: &mut SkillStatsLedger,
        dry_run: bool,
    ) -> anyhow::Result<CycleReport> {
        let run_id = new_run_id();
        let source_id = source.source_id().to_string();
        info!(%run_id, query, source_id, "cycle started");

        let candidates = match source.acquire(query, max_jobs).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(%run_id, %err, "acquisition failed");
                return Ok(self.report(run_id, query, source_id, 0, 0, 0, 0, CycleOutcome::SourceUnreachable));
            }
        };
        let acquired = candidates.len();
        let today = Utc::now().date_naive();

        // Every acquired job feeds the statistics exactly once, including
        // duplicates: demand data must not depend on notification history.
        let mut fresh: Vec<JobCandidate> = Vec::new();
        for job in candidates {
            let text = job.match_text();
            let matched: Vec<String> = self
                .matcher
                .match_job(&text)
                .iter()
                .map(|m| m.name.clone())
                .collect();
            let unknown = self.matcher.unknown_hits(&text);
            stats.record(&job.id, &matched, &unknown, today);

            if !dedup.has(&job.id) {
                fresh.push(job);
            }
        }
        let fresh_count = fresh.len();
        if !dry_run {
            stats.persist(today).await?;
        }

        let mut qualified: Vec<JobCandidate> = Vec::new();
        let mut sent_to_scorer = 0usize;
        let mut any_scored = false;
        for mut job in fresh {
            let matched = self.matcher.match_job(&job.match_text());
            if total_weight(&matched) >= self.gate.min_weight {
                sent_to_scorer += 1;
                if let Some(delay) = self.score_pacing.pick() {
                    tokio::time::sleep(delay).await;
                }
            }

            let decision = self
                .gate
                .evaluate(&mut job, &matched, &self.assembler, self.scorer.as_ref())
                .await;
            any_scored |= decision.scored;
            if !dry_run {
                dedup.add(job.id.clone());
            }
            if decision.accepted {
                qualified.push(job);
            }
        }

        // Ledger hits disk before the webhook is touched.
        if !dry_run {
            dedup.persist().await?;
        }

        let notified = if dry_run || qualified.is_empty() {
            0
        } else {
            self.dispatcher.dispatch_jobs(&qualified, &self.colors).await
        };

        let outcome = if sent_to_scorer == 0 {
            CycleOutcome::NoJobsMatched
        } else if !any_scored {
            CycleOutcome::NoJobsScored
        } else {
            CycleOutcome::Notified(notified)
        };

        Ok(self.report(
            run_id,
            query,
            source_id,
            acquired,
            fresh_count,
            qualified.len(),
            notified,
            outcome,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        run_id: Uuid,
        query: &str,
        source_id: String,
        acquired: usize,
        fresh: usize,
        qualified: usize,
        notified: usize,
        outcome: CycleOutcome,
    ) -> CycleReport {
        info!(%run_id, acquired, fresh, qualified, notified, ?outcome, "cycle finished");
        CycleReport {
            run_id,
            query: query.to_string(),
            source_id,
            acquired,
            fresh,
            qualified,
            notified,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::SkillMatcher;
    use crate::notify::{DispatchError, Embed, Notifier};
    use crate::score::{Scorer, ScoringError};
    use async_trait::async_trait;
    use fnotify_core::{ScoreOutcome, SkillDefinition, SkillIndex};
    use fnotify_sources::AcquisitionError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    struct MockSource {
        jobs: Vec<JobCandidate>,
        unreachable: bool,
    }

    #[async_trait]
    impl JobSource for MockSource {
        fn source_id(&self) -> &str {
            "mock"
        }

        async fn acquire(
            &self,
            _query: &str,
            max_jobs: usize,
        ) -> Result<Vec<JobCandidate>, AcquisitionError> {
            if self.unreachable {
                return Err(AcquisitionError::Unreachable("dns failure".to_string()));
            }
            Ok(self.jobs.iter().take(max_jobs).cloned().collect())
        }
    }

    struct FixedScorer {
        score: u8,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Scorer for FixedScorer {
        async fn score(
            &self,
            _context: &str,
            _job: &JobCandidate,
        ) -> Result<ScoreOutcome, ScoringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ScoringError::Transport("connection reset".to_string()));
            }
            Ok(ScoreOutcome {
                score: self.score,
                reason: "fits".to_string(),
            })
        }
    }

    struct RecordingNotifier {
        batches: Arc<Mutex<Vec<Vec<Embed>>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(&self, embeds: &[Embed]) -> Result<(), DispatchError> {
            self.batches.lock().unwrap().push(embeds.to_vec());
            Ok(())
        }
    }

    fn skill_index() -> SkillIndex {
        SkillIndex {
            skills: BTreeMap::from([(
                "vba".to_string(),
                SkillDefinition {
                    keywords: vec!["vba".to_string(), "excel macro".to_string()],
                    weight: 8,
                    score: 9,
                    profile_file: None,
                    projects: vec![],
                },
            )]),
        }
    }

    struct Harness {
        pipeline: Pipeline,
        scorer_calls: Arc<AtomicUsize>,
        batches: Arc<Mutex<Vec<Vec<Embed>>>>,
    }

    fn harness(score: u8) -> Harness {
        harness_with(score, false)
    }

    fn harness_with(score: u8, scorer_fails: bool) -> Harness {
        let scorer_calls = Arc::new(AtomicUsize::new(0));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline {
            matcher: SkillMatcher::new(&skill_index(), &[]).expect("matcher"),
            assembler: ProfileAssembler::from_text("# Profile"),
            gate: QualificationGate {
                min_weight: 5,
                min_score: 7,
                min_score_by_source: BTreeMap::new(),
            },
            scorer: Box::new(FixedScorer {
                score,
                fail: scorer_fails,
                calls: Arc::clone(&scorer_calls),
            }),
            dispatcher: Dispatcher::new(
                Box::new(RecordingNotifier {
                    batches: Arc::clone(&batches),
                }),
                Duration::from_millis(1),
            ),
            colors: ColorScheme::default(),
            score_pacing: StealthDelays::disabled(),
        };
        Harness {
            pipeline,
            scorer_calls,
            batches,
        }
    }

    fn vba_job(id: &str) -> JobCandidate {
        let mut job = JobCandidate::new(id, "Need a VBA macro expert", "https://x/1", "mock");
        job.description = Some("Automate Excel reporting with VBA.".to_string());
        job
    }

    async fn ledgers(dir: &tempfile::TempDir) -> (DedupLedger, SkillStatsLedger) {
        let dedup = DedupLedger::load(dir.path().join("seen.json")).await;
        let stats =
            SkillStatsLedger::load(dir.path().join("stats.json"), Utc::now().date_naive()).await;
        (dedup, stats)
    }

    #[tokio::test]
    async fn a_qualifying_job_is_scored_and_notified_once() {
        let dir = tempdir().expect("tempdir");
        let h = harness(9);
        let source = MockSource {
            jobs: vec![vba_job("j1")],
            unreachable: false,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.acquired, 1);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.qualified, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.outcome, CycleOutcome::Notified(1));
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.batches.lock().unwrap().len(), 1);

        // A rerun over the same listing is all duplicates: no scoring, no
        // dispatch, and the statistics still count the job only once.
        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");
        assert_eq!(report.fresh, 0);
        assert_eq!(report.notified, 0);
        assert_eq!(report.outcome, CycleOutcome::NoJobsMatched);
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.batches.lock().unwrap().len(), 1);
        assert_eq!(stats.total_jobs(), 1);
    }

    #[tokio::test]
    async fn unmatched_jobs_never_reach_scorer_or_webhook_but_are_counted() {
        let dir = tempdir().expect("tempdir");
        let h = harness(9);
        let source = MockSource {
            jobs: vec![JobCandidate::new(
                "j1",
                "WordPress theme tweaks",
                "https://x/1",
                "mock",
            )],
            unreachable: false,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "wordpress", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.outcome, CycleOutcome::NoJobsMatched);
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 0);
        assert!(h.batches.lock().unwrap().is_empty());
        assert_eq!(stats.total_jobs(), 1);
        // Below-threshold jobs still land in the ledger: they are settled,
        // not pending.
        assert!(dedup.has("j1"));
    }

    #[tokio::test]
    async fn low_scores_qualify_nothing() {
        let dir = tempdir().expect("tempdir");
        let h = harness(5);
        let source = MockSource {
            jobs: vec![vba_job("j1")],
            unreachable: false,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.qualified, 0);
        assert_eq!(report.outcome, CycleOutcome::Notified(0));
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 1);
        assert!(h.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn an_unreachable_source_yields_an_empty_report() {
        let dir = tempdir().expect("tempdir");
        let h = harness(9);
        let source = MockSource {
            jobs: vec![],
            unreachable: true,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.outcome, CycleOutcome::SourceUnreachable);
        assert_eq!(report.acquired, 0);
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 0);
    }

    /// A source behind an anti-bot wall that never clears looks exactly like
    /// an unreachable one, not like a cycle that found nothing to match.
    #[tokio::test]
    async fn a_blocked_source_reports_unreachable_not_unmatched() {
        struct BlockedSource;

        #[async_trait]
        impl JobSource for BlockedSource {
            fn source_id(&self) -> &str {
                "blocked"
            }

            async fn acquire(
                &self,
                _query: &str,
                _max_jobs: usize,
            ) -> Result<Vec<JobCandidate>, AcquisitionError> {
                Err(AcquisitionError::ChallengeTimeout { waited_secs: 120 })
            }
        }

        let dir = tempdir().expect("tempdir");
        let h = harness(9);
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&BlockedSource, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.outcome, CycleOutcome::SourceUnreachable);
        assert_eq!(report.acquired, 0);
    }

    #[tokio::test]
    async fn a_failing_scorer_reports_no_jobs_scored_and_still_settles_the_job() {
        let dir = tempdir().expect("tempdir");
        let h = harness_with(9, true);
        let source = MockSource {
            jobs: vec![vba_job("j1")],
            unreachable: false,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, false)
            .await
            .expect("report");

        assert_eq!(report.outcome, CycleOutcome::NoJobsScored);
        assert_eq!(report.qualified, 0);
        assert_eq!(report.notified, 0);
        assert_eq!(h.scorer_calls.load(Ordering::SeqCst), 1);
        assert!(h.batches.lock().unwrap().is_empty());
        // An unscored job is settled, not retried next cycle.
        assert!(dedup.has("j1"));
    }

    #[tokio::test]
    async fn dry_run_touches_no_state_and_sends_nothing() {
        let dir = tempdir().expect("tempdir");
        let h = harness(9);
        let source = MockSource {
            jobs: vec![vba_job("j1")],
            unreachable: false,
        };
        let (mut dedup, mut stats) = ledgers(&dir).await;

        let report = h
            .pipeline
            .run_cycle(&source, "vba", 20, &mut dedup, &mut stats, true)
            .await
            .expect("report");

        assert_eq!(report.qualified, 1);
        assert_eq!(report.notified, 0);
        assert!(h.batches.lock().unwrap().is_empty());
        assert!(!dedup.has("j1"));
        assert!(!dir.path().join("seen.json").exists());
        assert!(!dir.path().join("stats.json").exists());
    }
}
