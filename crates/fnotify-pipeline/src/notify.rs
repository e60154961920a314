//! Webhook notification dispatch.
//!
//! Wire shape is the common webhook-embed format:
//! `{embeds: [{title, url, color, description, fields, footer, timestamp}]}`.
//! At most ten embeds go out per call, with a short pacing delay between
//! calls; a failed call is logged and the remaining batches still go out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fnotify_core::JobCandidate;
use fnotify_storage::HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_EMBEDS_PER_DISPATCH: usize = 10;
const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 500;
const FOOTER_LIMIT: usize = 200;
const FIELD_VALUE_LIMIT: usize = 1024;
const MAX_SKILLS_SHOWN: usize = 5;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("webhook transport: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorBucket {
    pub min_score: u8,
    pub color: u32,
}

/// Score-to-color mapping. Buckets may appear in any order; the highest
/// qualifying one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRules {
    pub buckets: Vec<ColorBucket>,
    pub fallback: u32,
}

impl Default for ColorRules {
    fn default() -> Self {
        Self {
            buckets: vec![
                ColorBucket {
                    min_score: 9,
                    color: 0x2ecc71,
                },
                ColorBucket {
                    min_score: 7,
                    color: 0x3498db,
                },
            ],
            fallback: 0x95a5a6,
        }
    }
}

impl ColorRules {
    pub fn color_for(&self, score: u8) -> u32 {
        self.buckets
            .iter()
            .filter(|b| score >= b.min_score)
            .max_by_key(|b| b.min_score)
            .map(|b| b.color)
            .unwrap_or(self.fallback)
    }
}

/// Default rules plus per-source overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    #[serde(default)]
    pub default: ColorRules,
    #[serde(default)]
    pub by_source: BTreeMap<String, ColorRules>,
}

impl ColorScheme {
    pub fn rules_for(&self, source_id: &str) -> &ColorRules {
        self.by_source.get(source_id).unwrap_or(&self.default)
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: truncate_chars(value, FIELD_VALUE_LIMIT),
        inline,
    }
}

/// Format one qualifying job as a webhook embed.
pub fn job_embed(job: &JobCandidate, rules: &ColorRules) -> Embed {
    let score = job.ai_score.unwrap_or(0);
    let mut fields = vec![field("Score", &format!("{score}/10"), true)];

    if !job.matched_skills.is_empty() {
        let shown = job
            .matched_skills
            .iter()
            .take(MAX_SKILLS_SHOWN)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let overflow = job.matched_skills.len().saturating_sub(MAX_SKILLS_SHOWN);
        let value = if overflow > 0 {
            format!("{shown} (+{overflow})")
        } else {
            shown
        };
        fields.push(field("Matched skills", &value, true));
    }
    if let Some(rate) = &job.rate_text {
        fields.push(field("Rate/budget", rate, true));
    }
    if let Some(category) = &job.category {
        fields.push(field("Category", category, true));
    }
    if let Some(level) = &job.experience_level {
        fields.push(field("Experience level", level, true));
    }

    Embed {
        title: truncate_chars(&job.title, TITLE_LIMIT),
        url: Some(job.url.clone()),
        color: rules.color_for(score),
        description: job
            .description
            .as_deref()
            .map(|d| truncate_chars(d, DESCRIPTION_LIMIT)),
        fields,
        footer: job.ai_reason.as_deref().map(|reason| EmbedFooter {
            text: truncate_chars(reason, FOOTER_LIMIT),
        }),
        timestamp: job.acquired_at.to_rfc3339(),
    }
}

/// Transport for one batch of embeds.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, embeds: &[Embed]) -> Result<(), DispatchError>;
}

pub struct WebhookNotifier {
    http: Arc<HttpClient>,
    url: String,
}

impl WebhookNotifier {
    pub fn new(http: Arc<HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn dispatch(&self, embeds: &[Embed]) -> Result<(), DispatchError> {
        let body = json!({ "embeds": embeds });
        self.http
            .post_json_ack(&self.url, &body)
            .await
            .map_err(|err| DispatchError::Transport(err.to_string()))
    }
}

pub struct Dispatcher {
    notifier: Box<dyn Notifier>,
    batch_pacing: Duration,
}

impl Dispatcher {
    pub fn new(notifier: Box<dyn Notifier>, batch_pacing: Duration) -> Self {
        Self {
            notifier,
            batch_pacing,
        }
    }

    /// Send all qualifying jobs in batches. Returns how many jobs actually
    /// went out; a failed batch drops its jobs but never the later batches.
    pub async fn dispatch_jobs(&self, jobs: &[JobCandidate], colors: &ColorScheme) -> usize {
        let mut sent = 0;
        for (i, chunk) in jobs.chunks(MAX_EMBEDS_PER_DISPATCH).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_pacing).await;
            }
            let embeds: Vec<Embed> = chunk
                .iter()
                .map(|job| job_embed(job, colors.rules_for(&job.source_id)))
                .collect();
            match self.notifier.dispatch(&embeds).await {
                Ok(()) => sent += chunk.len(),
                Err(err) => {
                    warn!(batch = i, size = chunk.len(), %err, "batch dispatch failed, continuing");
                }
            }
        }
        info!(sent, total = jobs.len(), "notification dispatch complete");
        sent
    }

    /// Send one standalone embed (reports, alerts).
    pub async fn dispatch_embed(&self, embed: Embed) -> Result<(), DispatchError> {
        self.notifier.dispatch(std::slice::from_ref(&embed)).await
    }
}
