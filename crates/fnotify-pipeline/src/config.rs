//! Application configuration.
//!
//! One JSON file drives the whole pipeline. Everything operational has a
//! default; only the webhook, the profile, and at least one skill are truly
//! required.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fnotify_core::{SkillDefinition, SkillIndex};
use fnotify_sources::{FeedSourceConfig, InteractiveSourceConfig};
use fnotify_storage::StealthDelays;
use serde::Deserialize;
use thiserror::Error;

use crate::notify::ColorScheme;

/// Environment variable consulted when the config omits the scorer key.
pub const SCORER_API_KEY_VAR: &str = "SCORER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("missing {what} (required by {component})")]
    Missing { what: String, component: String },
    #[error("bad value for {field}: {reason}")]
    Value { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Falls back to the `SCORER_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_min_weight")]
    pub min_weight: i32,
    #[serde(default = "default_min_score")]
    pub min_score: u8,
    #[serde(default)]
    pub min_score_by_source: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StealthSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl StealthSettings {
    pub fn to_delays(&self) -> StealthDelays {
        StealthDelays {
            enabled: self.enabled,
            min: Duration::from_secs_f64(self.min_delay_secs),
            max: Duration::from_secs_f64(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatePaths {
    #[serde(default = "default_seen_jobs_path")]
    pub seen_jobs: PathBuf,
    #[serde(default = "default_skill_stats_path")]
    pub skill_stats: PathBuf,
    #[serde(default = "default_service_state_path")]
    pub service: PathBuf,
}

impl Default for StatePaths {
    fn default() -> Self {
        Self {
            seen_jobs: default_seen_jobs_path(),
            skill_stats: default_skill_stats_path(),
            service: default_service_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,
    #[serde(default = "default_jitter_minutes")]
    pub jitter_minutes: u64,
    /// Idle delay after startup before the first cycle.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default = "default_max_jobs_per_query")]
    pub max_jobs_per_query: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            jitter_minutes: default_jitter_minutes(),
            settle_secs: default_settle_secs(),
            max_jobs_per_query: default_max_jobs_per_query(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub webhook_url: String,
    pub profile_file: PathBuf,
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,
    #[serde(default = "default_portfolio_dir")]
    pub portfolio_dir: PathBuf,
    #[serde(default)]
    pub skills: BTreeMap<String, SkillDefinition>,
    /// Empty means the built-in watch list.
    #[serde(default)]
    pub watch_keywords: Vec<String>,
    pub scorer: ScorerSettings,
    #[serde(default)]
    pub stealth: StealthSettings,
    #[serde(default)]
    pub feed: Option<FeedSourceConfig>,
    #[serde(default)]
    pub interactive: Option<InteractiveSourceConfig>,
    /// Named query shortcuts for the control surface and CLI.
    #[serde(default)]
    pub presets: BTreeMap<String, String>,
    #[serde(default)]
    pub colors: ColorScheme,
    #[serde(default)]
    pub state: StatePaths,
    #[serde(default)]
    pub service: ServiceSettings,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let config: AppConfig =
            serde_json::from_str(&raw).map_err(|err| ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn skill_index(&self) -> SkillIndex {
        SkillIndex {
            skills: self.skills.clone(),
        }
    }

    /// Config key first, then the environment.
    pub fn resolve_scorer_api_key(&self) -> Option<String> {
        self.scorer
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(SCORER_API_KEY_VAR).ok().filter(|key| !key.is_empty()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_url.is_empty() {
            return Err(ConfigError::Missing {
                what: "webhook_url".to_string(),
                component: "notification dispatch".to_string(),
            });
        }
        if self.skills.is_empty() {
            return Err(ConfigError::Missing {
                what: "at least one skill definition".to_string(),
                component: "skill matching".to_string(),
            });
        }
        for (name, def) in &self.skills {
            if def.keywords.is_empty() {
                return Err(ConfigError::Value {
                    field: format!("skills.{name}.keywords"),
                    reason: "must list at least one keyword".to_string(),
                });
            }
            if def.score > 10 {
                return Err(ConfigError::Value {
                    field: format!("skills.{name}.score"),
                    reason: "must be 0-10".to_string(),
                });
            }
        }
        if self.scorer.enabled {
            if self.resolve_scorer_api_key().is_none() {
                return Err(ConfigError::Missing {
                    what: format!("scorer api key (config or ${SCORER_API_KEY_VAR})"),
                    component: "semantic scoring".to_string(),
                });
            }
            if self.scorer.min_score > 10 {
                return Err(ConfigError::Value {
                    field: "scorer.min_score".to_string(),
                    reason: "must be 0-10".to_string(),
                });
            }
        }
        if self.stealth.min_delay_secs > self.stealth.max_delay_secs {
            return Err(ConfigError::Value {
                field: "stealth.min_delay_secs".to_string(),
                reason: "must not exceed max_delay_secs".to_string(),
            });
        }
        if self.service.interval_hours <= 0.0 {
            return Err(ConfigError::Value {
                field: "service.interval_hours".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.feed.is_none() && self.interactive.is_none() {
            return Err(ConfigError::Missing {
                what: "a feed or interactive source".to_string(),
                component: "acquisition".to_string(),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_min_weight() -> i32 {
    5
}

fn default_min_score() -> u8 {
    7
}

fn default_min_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    3.0
}

fn default_skills_dir() -> PathBuf {
    PathBuf::from("skills")
}

fn default_portfolio_dir() -> PathBuf {
    PathBuf::from("portfolio")
}

fn default_seen_jobs_path() -> PathBuf {
    PathBuf::from("state/seen_jobs.json")
}

fn default_skill_stats_path() -> PathBuf {
    PathBuf::from("state/skill_stats.json")
}

fn default_service_state_path() -> PathBuf {
    PathBuf::from("state/service_state.json")
}

fn default_interval_hours() -> f64 {
    4.0
}

fn default_jitter_minutes() -> u64 {
    30
}

fn default_settle_secs() -> u64 {
    60
}

fn default_max_jobs_per_query() -> usize {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "webhook_url": "https://hooks.example/wh/123",
            "profile_file": "profile.md",
            "skills": {
                "vba": {"keywords": ["vba", "excel macro"], "weight": 8, "score": 9}
            },
            "scorer": {"model": "scout-1", "api_key": "sk-test"},
            "feed": {"source_id": "feed", "feed_url": "https://example.test/rss"}
        })
    }

    fn write_config(value: &serde_json::Value) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).expect("write");
        (dir, path)
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let (_dir, path) = write_config(&minimal_json());
        let config = AppConfig::load(&path).expect("config");

        assert_eq!(config.scorer.min_weight, 5);
        assert_eq!(config.scorer.min_score, 7);
        assert_eq!(config.scorer.api_url, "https://api.anthropic.com/v1/messages");
        assert!(config.stealth.enabled);
        assert_eq!(config.state.seen_jobs, PathBuf::from("state/seen_jobs.json"));
        assert_eq!(config.service.max_jobs_per_query, 20);
        assert_eq!(config.skill_index().skills.len(), 1);
    }

    #[test]
    fn missing_skills_are_rejected() {
        let mut value = minimal_json();
        value["skills"] = serde_json::json!({});
        let (_dir, path) = write_config(&value);
        let err = AppConfig::load(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn enabled_scorer_without_key_is_rejected() {
        let mut value = minimal_json();
        value["scorer"] = serde_json::json!({"model": "scout-1"});
        let (_dir, path) = write_config(&value);
        // Only meaningful when the environment carries no key.
        if std::env::var(SCORER_API_KEY_VAR).is_err() {
            let err = AppConfig::load(&path).expect_err("should fail");
            assert!(matches!(err, ConfigError::Missing { .. }));
        }
    }

    #[test]
    fn disabled_scorer_needs_no_key() {
        let mut value = minimal_json();
        value["scorer"] = serde_json::json!({"model": "scout-1", "enabled": false});
        let (_dir, path) = write_config(&value);
        let config = AppConfig::load(&path).expect("config");
        assert!(!config.scorer.enabled);
    }

    #[test]
    fn out_of_range_skill_score_is_rejected() {
        let mut value = minimal_json();
        value["skills"]["vba"]["score"] = serde_json::json!(11);
        let (_dir, path) = write_config(&value);
        let err = AppConfig::load(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Value { .. }));
    }

    #[test]
    fn a_config_without_any_source_is_rejected() {
        let mut value = minimal_json();
        value.as_object_mut().unwrap().remove("feed");
        let (_dir, path) = write_config(&value);
        let err = AppConfig::load(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn malformed_json_reports_invalid() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("write");
        let err = AppConfig::load(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
