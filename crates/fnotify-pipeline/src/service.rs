//! Long-running service loop around the cycle orchestrator.
//!
//! Each pass runs every configured query against the source, saving the
//! checkpoint after each cycle, then sleeps a jittered interval. Sleeps
//! happen in short
//! steps so a shutdown request is honored within one step, not one
//! interval.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fnotify_sources::JobSource;
use fnotify_storage::{DedupLedger, ServiceCheckpoint, SkillStatsLedger, StealthDelays};
use rand::Rng;
use tracing::{info, warn};

use crate::cycle::Pipeline;

/// Cooperative shutdown flag shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceLoopSettings {
    /// Base pause between passes.
    pub interval: Duration,
    /// Uniform jitter added to each interval.
    pub jitter: Duration,
    /// Idle delay before the first pass.
    pub settle: Duration,
    /// Granularity of interruptible sleeps.
    pub sleep_step: Duration,
    /// Jittered pause between queries within one pass.
    pub query_delays: StealthDelays,
    pub max_jobs_per_query: usize,
}

impl Default for ServiceLoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4 * 3600),
            jitter: Duration::from_secs(30 * 60),
            settle: Duration::from_secs(60),
            sleep_step: Duration::from_secs(10),
            query_delays: StealthDelays::default(),
            max_jobs_per_query: 20,
        }
    }
}

pub struct StatePathSet {
    pub seen_jobs: PathBuf,
    pub skill_stats: PathBuf,
    pub checkpoint: PathBuf,
}

pub struct Service {
    pub pipeline: Pipeline,
    pub source: Box<dyn JobSource>,
    pub queries: Vec<String>,
    pub settings: ServiceLoopSettings,
    pub paths: StatePathSet,
}

impl Service {
    /// Run passes until shutdown is requested. State is loaded once and kept
    /// in memory; the cycle persists it at its own safe points.
    pub async fn run(&self, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        let mut dedup = DedupLedger::load(&self.paths.seen_jobs).await;
        let mut stats =
            SkillStatsLedger::load(&self.paths.skill_stats, Utc::now().date_naive()).await;
        let checkpoint = ServiceCheckpoint::load(&self.paths.checkpoint).await;
        match checkpoint.last_check {
            Some(at) => info!(last_check = %at, seen = dedup.len(), "service resuming"),
            None => info!(seen = dedup.len(), "service starting fresh"),
        }

        if !self
            .sleep_interruptible(self.settings.settle, shutdown)
            .await
        {
            return Ok(());
        }

        while !shutdown.is_requested() {
            for (i, query) in self.queries.iter().enumerate() {
                if shutdown.is_requested() {
                    return Ok(());
                }
                if i > 0 {
                    if let Some(delay) = self.settings.query_delays.pick() {
                        tokio::time::sleep(delay).await;
                    }
                }
                if let Err(err) = self
                    .pipeline
                    .run_cycle(
                        self.source.as_ref(),
                        query,
                        self.settings.max_jobs_per_query,
                        &mut dedup,
                        &mut stats,
                        false,
                    )
                    .await
                {
                    warn!(query, %err, "cycle failed, continuing with next query");
                }

                let checkpoint = ServiceCheckpoint {
                    last_check: Some(Utc::now()),
                };
                if let Err(err) = checkpoint.save(&self.paths.checkpoint).await {
                    warn!(%err, "checkpoint save failed");
                }
            }

            let pause = self.next_interval();
            info!(pause_secs = pause.as_secs(), "pass complete, sleeping");
            if !self.sleep_interruptible(pause, shutdown).await {
                break;
            }
        }
        info!("service loop stopped");
        Ok(())
    }

    fn next_interval(&self) -> Duration {
        let jitter_ms = self.settings.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.settings.interval + Duration::from_millis(extra)
    }

    /// Sleep `total` in `sleep_step` chunks. Returns false when shutdown was
    /// requested before the sleep finished.
    async fn sleep_interruptible(&self, total: Duration, shutdown: &ShutdownToken) -> bool {
        let step = self.settings.sleep_step.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() {
            if shutdown.is_requested() {
                return false;
            }
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining -= chunk;
        }
        !shutdown.is_requested()
    }
}
