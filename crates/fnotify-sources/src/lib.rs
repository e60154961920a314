//! Job sources: RSS feed polling, browser-rendered listings, and the
//! anti-bot challenge resolver that guards the latter.

mod challenge;
mod feed;
mod interactive;
mod tile;

pub use challenge::{
    ChallengeOutcome, ChallengeProbe, ChallengeResolver, ChallengeResolverConfig, ChallengeSurface,
};
pub use feed::{FeedSource, FeedSourceConfig};
pub use interactive::{InteractiveSource, InteractiveSourceConfig, Renderer};
pub use tile::TileParser;

use async_trait::async_trait;
use fnotify_core::JobCandidate;
use thiserror::Error;

pub const CRATE_NAME: &str = "fnotify-sources";

/// Why an acquisition attempt produced no usable records. Callers recover
/// locally: a failed source yields zero jobs this cycle, never a dead run.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("malformed source data: {0}")]
    Malformed(String),
    #[error("challenge unresolved after {waited_secs}s")]
    ChallengeTimeout { waited_secs: u64 },
}

/// One external job listing source.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Pull up to `max_jobs` candidates for one query. Partial results are
    /// valid output; an error means this source contributed nothing.
    async fn acquire(
        &self,
        query: &str,
        max_jobs: usize,
    ) -> Result<Vec<JobCandidate>, AcquisitionError>;
}
