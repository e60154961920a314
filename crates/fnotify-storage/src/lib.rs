//! Persisted run state + HTTP fetch utilities for Freelance Notify.
//!
//! Everything here is single-writer and process-local: the orchestrator
//! guarantees at most one active cycle, so the ledgers take no locks.

mod blob;
mod checkpoint;
mod dedup;
mod http;
mod stats;

pub use blob::{read_json_blob, write_json_blob};
pub use checkpoint::ServiceCheckpoint;
pub use dedup::{derive_job_id, DedupLedger};
pub use http::{FetchError, FetchedText, HttpClient, HttpClientConfig, StealthDelays};
pub use stats::{PeriodTotals, SkillStatsLedger, Trend};

pub const CRATE_NAME: &str = "fnotify-storage";
