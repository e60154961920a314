//! Anti-bot challenge detection and resolution for rendered pages.
//!
//! A page is blocked when a challenge marker is present AND no target
//! content marker is, so a results page that merely mentions "verify" in a
//! posting never counts as blocked. Resolution escalates: solver against the
//! detected widget, then a coordinate click on the challenge frame, then a
//! bounded manual wait with an operator cue. The resolver never hangs and
//! never fails the run; the worst outcome is `TimedOut` for this page.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::AcquisitionError;

/// Page capabilities the resolver drives. The render engine implements this
/// in production; tests drive the machine with scripted surfaces.
#[async_trait]
pub trait ChallengeSurface: Send + Sync {
    /// Current page HTML.
    async fn snapshot(&self) -> Result<String, AcquisitionError>;

    /// Drive the solver against the detected challenge widget.
    /// Returns whether the attempt completed (not whether it worked:
    /// only a fresh snapshot can tell).
    async fn try_auto_solve(&self) -> bool;

    /// Coordinate click against the detected challenge frame.
    async fn try_fallback_click(&self) -> bool;

    /// One audible/visible operator cue at manual-wait start.
    async fn alert_operator(&self);
}

/// Marker sets for challenge detection.
#[derive(Debug, Clone)]
pub struct ChallengeProbe {
    pub challenge_markers: Vec<String>,
    pub content_markers: Vec<String>,
}

impl Default for ChallengeProbe {
    fn default() -> Self {
        Self {
            challenge_markers: vec![
                "verify you are human".to_string(),
                "just a moment".to_string(),
                "checking your browser".to_string(),
                "cf-turnstile".to_string(),
                "challenge-platform".to_string(),
            ],
            content_markers: vec![
                "data-test=\"jobtile\"".to_string(),
                "job-tile".to_string(),
            ],
        }
    }
}

impl ChallengeProbe {
    /// Blocked = challenge marker present AND no content marker present.
    pub fn is_blocked(&self, html: &str) -> bool {
        let lower = html.to_lowercase();
        let challenged = self
            .challenge_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()));
        if !challenged {
            return false;
        }
        let has_content = self
            .content_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()));
        !has_content
    }
}

/// Wait tuning. Defaults match interactive use; tests shrink these to
/// milliseconds so the timeout path stays fast.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeResolverConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub progress_every: Duration,
}

impl Default for ChallengeResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(120),
            progress_every: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// No challenge present; page content as fetched.
    Clear(String),
    /// A challenge was detected and cleared; refreshed page content.
    Resolved(String),
    /// Manual wait exhausted. Abort this acquisition attempt and return
    /// whatever was collected from earlier pages.
    TimedOut,
}

#[derive(Debug, Clone, Default)]
pub struct ChallengeResolver {
    probe: ChallengeProbe,
    config: ChallengeResolverConfig,
}

impl ChallengeResolver {
    pub fn new(probe: ChallengeProbe, config: ChallengeResolverConfig) -> Self {
        Self { probe, config }
    }

    /// Upper bound on the manual wait, for callers reporting a timeout.
    pub fn max_wait(&self) -> Duration {
        self.config.max_wait
    }

    /// Run detection and, when blocked, the full escalation ladder.
    pub async fn resolve(
        &self,
        surface: &dyn ChallengeSurface,
    ) -> Result<ChallengeOutcome, AcquisitionError> {
        let html = surface.snapshot().await?;
        if !self.probe.is_blocked(&html) {
            return Ok(ChallengeOutcome::Clear(html));
        }
        info!("anti-bot challenge detected");

        if surface.try_auto_solve().await {
            let html = surface.snapshot().await?;
            if !self.probe.is_blocked(&html) {
                info!("challenge cleared by auto-solve");
                return Ok(ChallengeOutcome::Resolved(html));
            }
            debug!("auto-solve attempt did not clear the challenge");
        }

        if surface.try_fallback_click().await {
            let html = surface.snapshot().await?;
            if !self.probe.is_blocked(&html) {
                info!("challenge cleared by fallback click");
                return Ok(ChallengeOutcome::Resolved(html));
            }
            debug!("fallback click did not clear the challenge");
        }

        self.manual_wait(surface).await
    }

    async fn manual_wait(
        &self,
        surface: &dyn ChallengeSurface,
    ) -> Result<ChallengeOutcome, AcquisitionError> {
        warn!(
            max_wait_secs = self.config.max_wait.as_secs(),
            "challenge needs manual resolution, waiting"
        );
        surface.alert_operator().await;

        let started = Instant::now();
        let mut last_progress = started;
        while started.elapsed() < self.config.max_wait {
            tokio::time::sleep(self.config.poll_interval).await;
            let html = surface.snapshot().await?;
            if !self.probe.is_blocked(&html) {
                info!(
                    waited_secs = started.elapsed().as_secs(),
                    "challenge cleared during manual wait"
                );
                return Ok(ChallengeOutcome::Resolved(html));
            }
            if last_progress.elapsed() >= self.config.progress_every {
                info!(
                    waited_secs = started.elapsed().as_secs(),
                    "still waiting on challenge"
                );
                last_progress = Instant::now();
            }
        }

        warn!(
            waited_secs = started.elapsed().as_secs(),
            "challenge wait exhausted, abandoning this page"
        );
        Ok(ChallengeOutcome::TimedOut)
    }
}
