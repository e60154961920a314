//! Interactive source: browser-rendered listings behind an anti-bot wall.
//!
//! One page/session at a time. Each page is rendered, run through the
//! challenge resolver, then tile-parsed. A timed-out challenge or a failure
//! past the first page returns whatever was already collected; one with
//! nothing collected fails the acquisition outright.

use async_trait::async_trait;
use fnotify_core::JobCandidate;
use fnotify_storage::StealthDelays;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::challenge::{ChallengeOutcome, ChallengeResolver, ChallengeSurface};
use crate::tile::TileParser;
use crate::{AcquisitionError, JobSource};

/// Opens a query URL in the render engine and hands back the resulting page.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<Box<dyn ChallengeSurface>, AcquisitionError>;
}

fn default_page_size() -> usize {
    50
}

fn default_max_pages() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractiveSourceConfig {
    pub source_id: String,
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

pub struct InteractiveSource {
    config: InteractiveSourceConfig,
    renderer: Box<dyn Renderer>,
    resolver: ChallengeResolver,
    tiles: TileParser,
    page_delays: StealthDelays,
}

impl InteractiveSource {
    pub fn new(
        config: InteractiveSourceConfig,
        renderer: Box<dyn Renderer>,
        resolver: ChallengeResolver,
        page_delays: StealthDelays,
    ) -> Result<Self, AcquisitionError> {
        Ok(Self {
            config,
            renderer,
            resolver,
            tiles: TileParser::new()?,
            page_delays,
        })
    }

    fn page_url(&self, query: &str, page: usize) -> String {
        format!(
            "{}/nx/search/jobs/?q={}&sort=recency&page={}&per_page={}",
            self.config.base_url.trim_end_matches('/'),
            encode_query(query),
            page,
            self.config.page_size
        )
    }

    async fn fetch_page(
        &self,
        query: &str,
        page: usize,
    ) -> Result<ChallengeOutcome, AcquisitionError> {
        let url = self.page_url(query, page);
        debug!(page, %url, "rendering listing page");
        let surface = self.renderer.render(&url).await?;
        self.resolver.resolve(surface.as_ref()).await
    }
}

#[async_trait]
impl JobSource for InteractiveSource {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    async fn acquire(
        &self,
        query: &str,
        max_jobs: usize,
    ) -> Result<Vec<JobCandidate>, AcquisitionError> {
        let mut jobs: Vec<JobCandidate> = Vec::new();

        for page in 1..=self.config.max_pages {
            if page > 1 {
                if let Some(delay) = self.page_delays.pick() {
                    debug!(page, ?delay, "inter-page pacing delay");
                    tokio::time::sleep(delay).await;
                }
            }

            let outcome = match self.fetch_page(query, page).await {
                Ok(outcome) => outcome,
                // First-page failure means the source is down; after that,
                // what we have is worth keeping.
                Err(err) if jobs.is_empty() => return Err(err),
                Err(err) => {
                    warn!(page, %err, "page failed, returning partial results");
                    break;
                }
            };

            let html = match outcome {
                ChallengeOutcome::Clear(html) | ChallengeOutcome::Resolved(html) => html,
                // A wall on the first page means the source gave us nothing;
                // past that, what we have is worth keeping.
                ChallengeOutcome::TimedOut if jobs.is_empty() => {
                    return Err(AcquisitionError::ChallengeTimeout {
                        waited_secs: self.resolver.max_wait().as_secs(),
                    });
                }
                ChallengeOutcome::TimedOut => {
                    warn!(page, "challenge timed out, returning partial results");
                    break;
                }
            };

            let tiles = self.tiles.parse(&html, &self.config.base_url, &self.config.source_id);
            if tiles.is_empty() {
                debug!(page, "no tiles on page, stopping pagination");
                break;
            }
            jobs.extend(tiles);
            if jobs.len() >= max_jobs {
                jobs.truncate(max_jobs);
                break;
            }
        }

        info!(
            source_id = %self.config.source_id,
            count = jobs.len(),
            "interactive acquisition complete"
        );
        Ok(jobs)
    }
}

fn encode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for ch in query.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(ch),
            ' ' => out.push_str("%20"),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}
