//! External semantic scorer client.
//!
//! One call per job, no retries: a transport or parse failure downgrades the
//! job to score 0 at the gate and the cycle moves on.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use fnotify_core::{JobCandidate, ScoreOutcome};
use regex::Regex;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use fnotify_storage::HttpClient;

const MAX_SCORE: u8 = 10;
const PROMPT_DESCRIPTION_LIMIT: usize = 1500;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scorer transport: {0}")]
    Transport(String),
    #[error("unparseable scorer reply: {0}")]
    Unparseable(String),
}

#[async_trait]
pub trait Scorer: Send + Sync {
    /// Judge one job against the assembled profile context, returning a
    /// 1-10 relevance score with a short reason.
    async fn score(&self, context: &str, job: &JobCandidate)
        -> Result<ScoreOutcome, ScoringError>;
}

/// Messages-API scorer client.
pub struct HttpScorer {
    http: Arc<HttpClient>,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpScorer {
    pub fn new(
        http: Arc<HttpClient>,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn prompt_for(job: &JobCandidate) -> String {
        let mut summary = format!("Title: {}\n", job.title);
        if let Some(description) = &job.description {
            let cut = description
                .char_indices()
                .nth(PROMPT_DESCRIPTION_LIMIT)
                .map(|(idx, _)| &description[..idx])
                .unwrap_or(description);
            summary.push_str(&format!("Description: {cut}\n"));
        }
        if let Some(rate) = &job.rate_text {
            summary.push_str(&format!("Rate/budget: {rate}\n"));
        }
        if let Some(category) = &job.category {
            summary.push_str(&format!("Category: {category}\n"));
        }
        if let Some(skills) = &job.required_skills {
            summary.push_str(&format!("Listed skills: {skills}\n"));
        }
        format!(
            "Rate how well this job posting fits the freelancer profile you \
             were given.\n\n{summary}\nReply with strict JSON only: \
             {{\"score\": <integer 1-10>, \"reason\": \"<one sentence>\"}}"
        )
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(
        &self,
        context: &str,
        job: &JobCandidate,
    ) -> Result<ScoreOutcome, ScoringError> {
        let body = json!({
            "model": self.model,
            "max_tokens": 300,
            "system": context,
            "messages": [{"role": "user", "content": Self::prompt_for(job)}],
        });
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", "2023-06-01"),
        ];

        let reply = self
            .http
            .post_json(&self.api_url, &headers, &body)
            .await
            .map_err(|err| ScoringError::Transport(err.to_string()))?;

        let text = reply
            .pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScoringError::Unparseable("reply carries no text block".to_string()))?;
        debug!(job_id = %job.id, "scorer replied");
        parse_score_reply(text)
    }
}

fn score_fallback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""score"\s*:\s*(\d+)"#).expect("static pattern"))
}

fn reason_fallback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""reason"\s*:\s*"([^"]*)""#).expect("static pattern"))
}

/// Parse a scorer reply: strict JSON first (after stripping markdown code
/// fences), then a best-effort scan for the score/reason pair.
pub fn parse_score_reply(text: &str) -> Result<ScoreOutcome, ScoringError> {
    let cleaned = strip_code_fences(text);

    if let Ok(outcome) = serde_json::from_str::<ScoreOutcome>(cleaned) {
        return Ok(clamp(outcome));
    }

    let Some(score) = score_fallback_pattern()
        .captures(cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
    else {
        return Err(ScoringError::Unparseable(format!(
            "no score in reply: {}",
            cleaned.chars().take(120).collect::<String>()
        )));
    };
    let reason = reason_fallback_pattern()
        .captures(cleaned)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "reply recovered by fallback parsing".to_string());

    Ok(clamp(ScoreOutcome { score, reason }))
}

fn clamp(mut outcome: ScoreOutcome) -> ScoreOutcome {
    outcome.score = outcome.score.min(MAX_SCORE);
    outcome
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line ("```json") and the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
