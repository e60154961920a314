//! RSS-over-HTTP feed source with best-effort item extraction.
//!
//! The feed is treated as hostile input: extraction is regex-based and
//! tolerant, items missing a guid or link are dropped, and a rate-limited
//! fetch yields zero records for this cycle instead of an error.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use fnotify_core::JobCandidate;
use fnotify_storage::{derive_job_id, FetchError, HttpClient};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{AcquisitionError, JobSource};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSourceConfig {
    pub source_id: String,
    pub feed_url: String,
}

pub struct FeedSource {
    config: FeedSourceConfig,
    http: Arc<HttpClient>,
    patterns: ItemPatterns,
}

struct ItemPatterns {
    item: Regex,
    guid: Regex,
    title: Regex,
    link: Regex,
    description: Regex,
    pub_date: Regex,
    budget: Regex,
    category: Regex,
}

impl ItemPatterns {
    fn compile() -> anyhow::Result<Self> {
        Ok(Self {
            item: Regex::new(r"(?s)<item[^>]*>(.*?)</item>").context("compiling item pattern")?,
            guid: tag_pattern("guid")?,
            title: tag_pattern("title")?,
            link: tag_pattern("link")?,
            description: tag_pattern("description")?,
            pub_date: tag_pattern("pubDate")?,
            budget: Regex::new(r"Budget\s*:\s*([^<\n]+)").context("compiling budget pattern")?,
            category: Regex::new(r"Cat(?:&#233;|é)gorie(?:\(s\))?\s*:\s*([^<\n]+)")
                .context("compiling category pattern")?,
        })
    }
}

/// Matches `<tag>…</tag>` with an optional CDATA wrapper around the content.
fn tag_pattern(tag: &str) -> anyhow::Result<Regex> {
    Regex::new(&format!(
        r"(?s)<{tag}[^>]*>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</{tag}>"
    ))
    .with_context(|| format!("compiling {tag} pattern"))
}

fn unescape_entities(text: &str) -> String {
    text.replace("&#39;", "'")
        .replace("&#233;", "é")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Digits of the first number in a budget fragment, separators ignored
/// ("1 500 €" and "1,500" both read as 1500).
fn parse_budget_amount(text: &str) -> Option<i64> {
    let mut digits = String::new();
    let mut started = false;
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            started = true;
        } else if started && !matches!(ch, ' ' | ',' | '.' | '\u{a0}') {
            break;
        }
    }
    digits.parse().ok()
}

impl FeedSource {
    pub fn new(config: FeedSourceConfig, http: Arc<HttpClient>) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            http,
            patterns: ItemPatterns::compile()?,
        })
    }

    fn capture<'a>(&self, pattern: &Regex, item: &'a str) -> Option<&'a str> {
        pattern
            .captures(item)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    }

    fn parse_items(&self, xml: &str) -> Vec<JobCandidate> {
        let mut jobs = Vec::new();
        for item in self.patterns.item.captures_iter(xml) {
            let item = item.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Some(guid) = self.capture(&self.patterns.guid, item) else {
                debug!("dropping feed item without guid");
                continue;
            };
            let Some(link) = self.capture(&self.patterns.link, item) else {
                debug!("dropping feed item without link");
                continue;
            };

            let title = self
                .capture(&self.patterns.title, item)
                .map(unescape_entities)
                .unwrap_or_else(|| link.to_string());

            let mut job = JobCandidate::new(
                derive_job_id(guid),
                title,
                link.to_string(),
                &self.config.source_id,
            );

            if let Some(raw) = self.capture(&self.patterns.description, item) {
                let description = unescape_entities(raw);
                if let Some(budget_text) = self.capture(&self.patterns.budget, &description) {
                    job.budget = parse_budget_amount(budget_text);
                    job.rate_text = Some(budget_text.to_string());
                }
                if let Some(category) = self.capture(&self.patterns.category, &description) {
                    job.category = Some(category.to_string());
                }
                job.description = Some(description);
            }

            if let Some(pub_date) = self.capture(&self.patterns.pub_date, item) {
                job.posted_at = Some(
                    DateTime::parse_from_rfc2822(pub_date)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|_| pub_date.to_string()),
                );
            }

            jobs.push(job);
        }
        jobs
    }
}

#[async_trait]
impl JobSource for FeedSource {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    async fn acquire(
        &self,
        _query: &str,
        max_jobs: usize,
    ) -> Result<Vec<JobCandidate>, AcquisitionError> {
        let fetched = match self
            .http
            .fetch_text(&self.config.source_id, &self.config.feed_url)
            .await
        {
            Ok(fetched) => fetched,
            Err(FetchError::RateLimited { url, retry_after }) => {
                warn!(
                    %url,
                    retry_after_secs = retry_after.as_secs(),
                    "feed rate limited, yielding zero records this cycle"
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(AcquisitionError::Unreachable(err.to_string())),
        };

        let mut jobs = self.parse_items(&fetched.body);
        jobs.truncate(max_jobs);
        info!(
            source_id = %self.config.source_id,
            count = jobs.len(),
            "feed acquisition complete"
        );
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<item>
  <title>Macro Excel &amp; VBA pour reporting</title>
  <link>https://example.test/projets/412345</link>
  <guid isPermaLink="true">https://example.test/projets/412345</guid>
  <pubDate>Mon, 24 Aug 2026 09:30:00 +0200</pubDate>
  <description><![CDATA[Automatiser l&#39;export mensuel.<br/>
Budget : 1 500 €
Cat&#233;gorie(s) : D&#233;veloppement]]></description>
</item>
<item>
  <title>Item sans lien</title>
  <guid>orphan-guid</guid>
  <description>Budget : 200 €</description>
</item>
<item>
  <title>Refonte WordPress</title>
  <link>https://example.test/projets/412346</link>
  <guid>https://example.test/projets/412346</guid>
  <description>Pas de budget indique</description>
</item>
</channel></rss>"#;

    fn source() -> FeedSource {
        let http = Arc::new(HttpClient::new(Default::default()).expect("client"));
        FeedSource::new(
            FeedSourceConfig {
                source_id: "feed".into(),
                feed_url: "https://example.test/rss".into(),
            },
            http,
        )
        .expect("source")
    }

    #[test]
    fn extracts_fields_and_unescapes_entities() {
        let jobs = source().parse_items(FEED);
        assert_eq!(jobs.len(), 2);

        let first = &jobs[0];
        assert_eq!(first.title, "Macro Excel & VBA pour reporting");
        assert_eq!(first.url, "https://example.test/projets/412345");
        assert_eq!(first.budget, Some(1500));
        assert_eq!(first.category.as_deref(), Some("Développement"));
        assert!(first
            .description
            .as_deref()
            .unwrap()
            .contains("Automatiser l'export mensuel."));
        assert_eq!(
            first.posted_at.as_deref(),
            Some("2026-08-24T09:30:00+02:00")
        );
        assert_eq!(first.id, derive_job_id("https://example.test/projets/412345"));
    }

    #[test]
    fn item_without_link_is_dropped() {
        let jobs = source().parse_items(FEED);
        assert!(jobs.iter().all(|j| j.title != "Item sans lien"));
    }

    #[test]
    fn missing_budget_stays_unset() {
        let jobs = source().parse_items(FEED);
        let second = &jobs[1];
        assert_eq!(second.title, "Refonte WordPress");
        assert_eq!(second.budget, None);
        assert_eq!(second.rate_text, None);
    }

    #[test]
    fn budget_amounts_ignore_separators() {
        assert_eq!(parse_budget_amount("1 500 €"), Some(1500));
        assert_eq!(parse_budget_amount("1,500"), Some(1500));
        assert_eq!(parse_budget_amount("moins de 500 €"), Some(500));
        assert_eq!(parse_budget_amount("à discuter"), None);
    }
}
