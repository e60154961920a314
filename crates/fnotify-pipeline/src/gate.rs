//! Two-stage qualification gate.
//!
//! Stage 1 is free: jobs below the weight threshold are rejected without
//! ever touching the scorer. Stage 2 assembles the profile context and asks
//! the scorer; a scoring failure downgrades the job to 0, it never aborts
//! the cycle.

use std::collections::BTreeMap;

use fnotify_core::{total_weight, JobCandidate, MatchedSkill};
use tracing::{debug, warn};

use crate::profile::ProfileAssembler;
use crate::score::Scorer;

#[derive(Debug, Clone)]
pub struct QualificationGate {
    pub min_weight: i32,
    pub min_score: u8,
    /// Per-source overrides of the score threshold.
    pub min_score_by_source: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub accepted: bool,
    /// Whether the scorer produced a verdict for this job.
    pub scored: bool,
}

impl QualificationGate {
    pub fn min_score_for(&self, source_id: &str) -> u8 {
        self.min_score_by_source
            .get(source_id)
            .copied()
            .unwrap_or(self.min_score)
    }

    /// Evaluate one job, writing weight/score/reason back onto it.
    pub async fn evaluate(
        &self,
        job: &mut JobCandidate,
        matched: &[MatchedSkill],
        assembler: &ProfileAssembler,
        scorer: &dyn Scorer,
    ) -> GateDecision {
        let weight = total_weight(matched);
        job.total_weight = weight;
        job.matched_skills = matched.iter().map(|m| m.name.clone()).collect();

        if weight < self.min_weight {
            job.ai_score = Some(0);
            job.ai_reason = Some(format!(
                "insufficient weight ({weight} < {})",
                self.min_weight
            ));
            debug!(job_id = %job.id, weight, "rejected below weight threshold");
            return GateDecision {
                accepted: false,
                scored: false,
            };
        }

        let context = assembler.assemble(matched);
        match scorer.score(&context, job).await {
            Ok(outcome) => {
                let threshold = self.min_score_for(&job.source_id);
                let accepted = outcome.score >= threshold;
                debug!(
                    job_id = %job.id,
                    score = outcome.score,
                    threshold,
                    accepted,
                    "scorer verdict"
                );
                job.ai_score = Some(outcome.score);
                job.ai_reason = Some(outcome.reason);
                GateDecision {
                    accepted,
                    scored: true,
                }
            }
            Err(err) => {
                warn!(job_id = %job.id, %err, "scoring failed, downgrading to 0");
                job.ai_score = Some(0);
                job.ai_reason = Some(format!("scoring failed: {err}"));
                GateDecision {
                    accepted: false,
                    scored: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoringError;
    use async_trait::async_trait;
    use fnotify_core::ScoreOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScorer {
        score: u8,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedScorer {
        fn new(score: u8) -> Self {
            Self {
                score,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                score: 0,
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
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
                reason: "fits the profile".to_string(),
            })
        }
    }

    fn gate() -> QualificationGate {
        QualificationGate {
            min_weight: 5,
            min_score: 7,
            min_score_by_source: BTreeMap::new(),
        }
    }

    fn vba_match(weight: i32) -> Vec<MatchedSkill> {
        vec![MatchedSkill {
            name: "vba".to_string(),
            weight,
            score: 9,
            matched_keyword: "vba".to_string(),
            profile_file: None,
            projects: vec![],
        }]
    }

    #[tokio::test]
    async fn below_weight_threshold_never_invokes_the_scorer() {
        let scorer = FixedScorer::new(10);
        let assembler = ProfileAssembler::from_text("# Profile");
        let mut job = JobCandidate::new("j1", "WordPress theme", "https://x/1", "feed");

        let decision = gate().evaluate(&mut job, &[], &assembler, &scorer).await;

        assert!(!decision.accepted);
        assert!(!decision.scored);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(job.ai_score, Some(0));
        assert_eq!(job.ai_reason.as_deref(), Some("insufficient weight (0 < 5)"));
    }

    #[tokio::test]
    async fn weight_and_score_above_thresholds_accept() {
        let scorer = FixedScorer::new(9);
        let assembler = ProfileAssembler::from_text("# Profile");
        let mut job = JobCandidate::new("j1", "Need VBA macro", "https://x/1", "feed");

        let decision = gate()
            .evaluate(&mut job, &vba_match(8), &assembler, &scorer)
            .await;

        assert!(decision.accepted);
        assert!(decision.scored);
        assert_eq!(job.total_weight, 8);
        assert_eq!(job.ai_score, Some(9));
        assert_eq!(job.matched_skills, vec!["vba".to_string()]);
    }

    #[tokio::test]
    async fn score_below_threshold_rejects() {
        let scorer = FixedScorer::new(5);
        let assembler = ProfileAssembler::from_text("# Profile");
        let mut job = JobCandidate::new("j1", "Need VBA macro", "https://x/1", "feed");

        let decision = gate()
            .evaluate(&mut job, &vba_match(8), &assembler, &scorer)
            .await;

        assert!(!decision.accepted);
        assert!(decision.scored);
        assert_eq!(job.ai_score, Some(5));
    }

    #[tokio::test]
    async fn per_source_threshold_overrides_the_default() {
        let mut gate = gate();
        gate.min_score_by_source.insert("interactive".to_string(), 9);
        let scorer = FixedScorer::new(8);
        let assembler = ProfileAssembler::from_text("# Profile");
        let mut job = JobCandidate::new("j1", "Need VBA macro", "https://x/1", "interactive");

        let decision = gate
            .evaluate(&mut job, &vba_match(8), &assembler, &scorer)
            .await;

        assert!(!decision.accepted);
        assert!(decision.scored);
    }

    #[tokio::test]
    async fn scorer_failure_downgrades_to_zero_and_continues() {
        let scorer = FixedScorer::failing();
        let assembler = ProfileAssembler::from_text("# Profile");
        let mut job = JobCandidate::new("j1", "Need VBA macro", "https://x/1", "feed");

        let decision = gate()
            .evaluate(&mut job, &vba_match(8), &assembler, &scorer)
            .await;

        assert!(!decision.accepted);
        assert!(!decision.scored);
        assert_eq!(job.ai_score, Some(0));
        assert!(job.ai_reason.as_deref().unwrap().starts_with("scoring failed"));
    }
}
