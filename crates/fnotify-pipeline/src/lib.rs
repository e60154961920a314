//! Qualification pipeline: skill matching, weighted gating, external
//! scoring, notification dispatch, and the cycle/service orchestration
//! that ties the sources and ledgers together.

mod config;
mod cycle;
mod gate;
mod matching;
mod notify;
mod profile;
mod report;
mod score;
mod service;

pub use config::{
    AppConfig, ConfigError, ScorerSettings, ServiceSettings, StatePaths, StealthSettings,
    SCORER_API_KEY_VAR,
};
pub use cycle::{CycleOutcome, CycleReport, Pipeline};
pub use gate::{GateDecision, QualificationGate};
pub use matching::{default_watch_keywords, SkillMatcher};
pub use notify::{
    job_embed, ColorBucket, ColorRules, ColorScheme, DispatchError, Dispatcher, Embed, EmbedField,
    EmbedFooter, Notifier, WebhookNotifier,
};
pub use profile::ProfileAssembler;
pub use report::weekly_report_embed;
pub use score::{parse_score_reply, HttpScorer, Scorer, ScoringError};
pub use service::{Service, ServiceLoopSettings, ShutdownToken, StatePathSet};

pub const CRATE_NAME: &str = "fnotify-pipeline";
