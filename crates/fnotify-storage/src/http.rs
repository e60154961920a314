//! Thin HTTP client with the pacing habits the sources expect: rotating
//! user agents, a random pre-request delay, and graceful 429 handling.

use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

/// Pool of realistic user agents, rotated per request.
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Feedly/1.0 (+http://www.feedly.com/fetcher.html)",
    "Inoreader/1.0 (+https://www.inoreader.com)",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

#[derive(Debug, Clone, Copy)]
pub struct StealthDelays {
    pub enabled: bool,
    pub min: Duration,
    pub max: Duration,
}

impl Default for StealthDelays {
    fn default() -> Self {
        Self {
            enabled: true,
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }
}

impl StealthDelays {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Draw one jittered pause, or `None` when pacing is disabled.
    pub fn pick(&self) -> Option<Duration> {
        if !self.enabled || self.max.is_zero() {
            return None;
        }
        let (lo, hi) = (self.min.min(self.max), self.max);
        Some(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agents: Vec<String>,
    pub delays: StealthDelays,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agents: DEFAULT_USER_AGENTS.iter().map(ToString::to_string).collect(),
            delays: StealthDelays::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedText {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("rate limited for {url}, retry after {retry_after:?}")]
    RateLimited { url: String, retry_after: Duration },
}

#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    user_agents: Vec<String>,
    delays: StealthDelays,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            user_agents: config.user_agents,
            delays: config.delays,
        })
    }

    fn next_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..self.user_agents.len());
        Some(&self.user_agents[idx])
    }

    /// GET a text resource. 429 responses surface as `RateLimited` with the
    /// server's Retry-After so the caller can log it and yield zero records.
    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<FetchedText, FetchError> {
        if let Some(delay) = self.delays.pick() {
            debug!(source_id, ?delay, "pre-request pacing delay");
            tokio::time::sleep(delay).await;
        }

        let span = info_span!("http_fetch", source_id, url);
        async {
            let mut request = self.client.get(url);
            if let Some(ua) = self.next_user_agent() {
                request = request.header(reqwest::header::USER_AGENT, ua);
            }
            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(60));
                return Err(FetchError::RateLimited {
                    url: final_url,
                    retry_after,
                });
            }
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await?;
            Ok(FetchedText {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }

    /// POST a JSON body where only success matters (webhooks answering 204).
    pub async fn post_json_ack(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), FetchError> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(())
    }

    /// POST a JSON body and parse a JSON response. Used by the scorer
    /// client; no retries, callers own failure policy.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.json().await?)
    }
}
