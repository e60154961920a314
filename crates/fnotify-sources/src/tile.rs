//! Job tile extraction from rendered listing HTML.

use fnotify_core::JobCandidate;
use fnotify_storage::derive_job_id;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::AcquisitionError;

const DESCRIPTION_LIMIT: usize = 1000;
const MAX_SKILL_TAGS: usize = 10;

/// Compiled selectors and locator patterns, built once per source.
pub struct TileParser {
    tile_selectors: Vec<Selector>,
    title_links: Vec<Selector>,
    descriptions: Vec<Selector>,
    rates: Vec<Selector>,
    experience: Vec<Selector>,
    skill_tags: Vec<Selector>,
    locator_patterns: Vec<Regex>,
    rate_fallback: Regex,
}

fn parse_selector(raw: &str) -> Result<Selector, AcquisitionError> {
    Selector::parse(raw).map_err(|e| AcquisitionError::Malformed(format!("selector {raw}: {e}")))
}

fn parse_selectors(raw: &[&str]) -> Result<Vec<Selector>, AcquisitionError> {
    raw.iter().map(|s| parse_selector(s)).collect()
}

impl TileParser {
    pub fn new() -> Result<Self, AcquisitionError> {
        let pattern = |raw: &str| {
            Regex::new(raw).map_err(|e| AcquisitionError::Malformed(format!("pattern {raw}: {e}")))
        };
        Ok(Self {
            tile_selectors: parse_selectors(&[
                r#"section[data-test="JobTile"]"#,
                r#"article[data-test="JobTile"]"#,
                "section.job-tile",
                "div.job-tile",
            ])?,
            title_links: parse_selectors(&[
                r#"a[data-test*="job-title"]"#,
                "h2 a[href]",
                "h3 a[href]",
                "a[href]",
            ])?,
            descriptions: parse_selectors(&[
                r#"[data-test="job-description-text"]"#,
                r#"[data-test*="JobDescription"]"#,
                "p",
            ])?,
            rates: parse_selectors(&[
                r#"[data-test="job-type-label"]"#,
                r#"li[data-test="job-type"]"#,
            ])?,
            experience: parse_selectors(&[
                r#"[data-test="experience-level"]"#,
                r#"li[data-test="contractor-tier"]"#,
            ])?,
            skill_tags: parse_selectors(&[r#"[data-test="token"] span"#, ".air3-token"])?,
            // Stable locator fragments, most specific first. The trailing
            // path fallback keeps ids stable for unfamiliar URL shapes.
            locator_patterns: vec![
                pattern(r"~0?([0-9a-z]{10,})")?,
                pattern(r"/apply/([^/?#]+)")?,
                pattern(r"/jobs/([^/?#]+)")?,
            ],
            rate_fallback: pattern(r"\$[\d,]+(?:\.\d+)?(?:\s*-\s*\$[\d,]+(?:\.\d+)?)?(?:/hr)?")?,
        })
    }

    /// Extract candidates from one rendered listing page. Tiles without a
    /// usable link are skipped; an empty result is the pagination stop signal.
    pub fn parse(&self, html: &str, base_url: &str, source_id: &str) -> Vec<JobCandidate> {
        let document = Html::parse_document(html);
        let tiles: Vec<ElementRef> = self
            .tile_selectors
            .iter()
            .map(|sel| document.select(sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
            .unwrap_or_default();

        let mut jobs = Vec::new();
        for tile in tiles {
            let Some((title, href)) = self.title_and_href(&tile) else {
                debug!("skipping tile without a title link");
                continue;
            };
            let url = absolutize(&href, base_url);
            let fragment = self.locator_fragment(&href);
            let mut job = JobCandidate::new(derive_job_id(&fragment), title, url, source_id);

            job.description = self
                .first_text(&tile, &self.descriptions)
                .map(|d| truncate_chars(&d, DESCRIPTION_LIMIT));
            job.rate_text = self.first_text(&tile, &self.rates).or_else(|| {
                let text = element_text(&tile);
                self.rate_fallback
                    .find(&text)
                    .map(|m| m.as_str().to_string())
            });
            job.experience_level = self.first_text(&tile, &self.experience);

            let tags: Vec<String> = tile
                .select(&self.skill_tags[0])
                .chain(tile.select(&self.skill_tags[1]))
                .filter_map(|el| non_empty(element_text(&el)))
                .take(MAX_SKILL_TAGS)
                .collect();
            if !tags.is_empty() {
                job.required_skills = Some(tags.join(", "));
            }

            jobs.push(job);
        }
        jobs
    }

    fn title_and_href(&self, tile: &ElementRef) -> Option<(String, String)> {
        for selector in &self.title_links {
            if let Some(anchor) = tile.select(selector).next() {
                let href = anchor.value().attr("href")?.trim();
                let title = non_empty(element_text(&anchor))?;
                if !href.is_empty() {
                    return Some((title, href.to_string()));
                }
            }
        }
        None
    }

    fn first_text(&self, tile: &ElementRef, selectors: &[Selector]) -> Option<String> {
        selectors
            .iter()
            .find_map(|sel| tile.select(sel).next())
            .and_then(|el| non_empty(element_text(&el)))
    }

    fn locator_fragment(&self, href: &str) -> String {
        for pattern in &self.locator_patterns {
            if let Some(caps) = pattern.captures(href) {
                if let Some(m) = caps.get(1) {
                    return m.as_str().to_string();
                }
            }
        }
        href.trim_end_matches('/').to_string()
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn non_empty(text: String) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
