use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fnotify_core::{JobCandidate, ScoreOutcome};
use fnotify_pipeline::{
    default_watch_keywords, weekly_report_embed, AppConfig, CycleReport, Dispatcher, HttpScorer,
    Pipeline, ProfileAssembler, QualificationGate, Scorer, ScoringError, Service,
    ServiceLoopSettings, ShutdownToken, SkillMatcher, StatePathSet, WebhookNotifier,
};
use fnotify_sources::{FeedSource, JobSource};
use fnotify_storage::{DedupLedger, HttpClient, HttpClientConfig, SkillStatsLedger};
use fnotify_web::{AppState, CycleRunner, StatusSnapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fnotify-cli")]
#[command(about = "Freelance job intake pipeline")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one intake cycle and exit.
    Run {
        /// Free-form search query.
        #[arg(long)]
        query: Option<String>,
        /// Named preset from the configuration.
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        max_jobs: Option<usize>,
        /// Match and score but touch no state and send nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the service loop until interrupted.
    Watch,
    /// Print the rolling skill statistics.
    Stats,
    /// Send the weekly skill report to the webhook.
    WeeklyReport,
    /// Serve the JSON control surface.
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

/// Stands in when semantic scoring is turned off: weight-qualified jobs
/// pass straight through.
struct DisabledScorer;

#[async_trait]
impl Scorer for DisabledScorer {
    async fn score(
        &self,
        _context: &str,
        _job: &JobCandidate,
    ) -> Result<ScoreOutcome, ScoringError> {
        Ok(ScoreOutcome {
            score: 10,
            reason: "semantic scoring disabled".to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Commands that drive a source must fail here, not mid-cycle.
    match &cli.command {
        Commands::Run { .. } | Commands::Watch | Commands::Serve { .. } => {
            ensure_feed_configured(&config)?;
        }
        Commands::Stats | Commands::WeeklyReport => {}
    }

    match cli.command {
        Commands::Run {
            query,
            preset,
            max_jobs,
            dry_run,
        } => {
            let query = resolve_query(&config, query, preset)?;
            let max_jobs = max_jobs.unwrap_or(config.service.max_jobs_per_query);
            let report = run_once(&config, &query, max_jobs, dry_run).await?;
            print_report(&report);
        }
        Commands::Watch => watch(&config).await?,
        Commands::Stats => print_stats(&config).await,
        Commands::WeeklyReport => send_weekly_report(&config).await?,
        Commands::Serve { port } => serve(config, port).await?,
    }

    Ok(())
}

fn resolve_query(
    config: &AppConfig,
    query: Option<String>,
    preset: Option<String>,
) -> Result<String> {
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        return Ok(query);
    }
    if let Some(name) = preset {
        return config
            .presets
            .get(&name)
            .cloned()
            .with_context(|| format!("unknown preset {name:?}"));
    }
    if let Some(query) = config.presets.get("default") {
        return Ok(query.clone());
    }
    bail!("pass --query or --preset (no \"default\" preset configured)");
}

fn build_http(config: &AppConfig) -> Result<Arc<HttpClient>> {
    let http = HttpClient::new(HttpClientConfig {
        delays: config.stealth.to_delays(),
        ..HttpClientConfig::default()
    })?;
    Ok(Arc::new(http))
}

/// The interactive source needs a page renderer wired in by an embedding
/// binary; this CLI can only drive the feed source, so an interactive-only
/// config is rejected at startup.
fn ensure_feed_configured(config: &AppConfig) -> Result<()> {
    if config.feed.is_none() {
        bail!(
            "no feed source configured (the interactive source needs an \
             embedding renderer and cannot run from this binary)"
        );
    }
    Ok(())
}

fn build_source(config: &AppConfig, http: Arc<HttpClient>) -> Result<Box<dyn JobSource>> {
    if let Some(feed) = &config.feed {
        return Ok(Box::new(FeedSource::new(feed.clone(), http)?));
    }
    bail!("no feed source configured");
}

fn build_pipeline(config: &AppConfig, http: Arc<HttpClient>) -> Result<Pipeline> {
    let watch = if config.watch_keywords.is_empty() {
        default_watch_keywords()
    } else {
        config.watch_keywords.clone()
    };
    let matcher = SkillMatcher::new(&config.skill_index(), &watch)?;
    let assembler = ProfileAssembler::load(
        &config.profile_file,
        &config.skills_dir,
        &config.portfolio_dir,
    )?;
    let gate = QualificationGate {
        min_weight: config.scorer.min_weight,
        min_score: config.scorer.min_score,
        min_score_by_source: config.scorer.min_score_by_source.clone(),
    };
    let scorer: Box<dyn Scorer> = if config.scorer.enabled {
        let api_key = config
            .resolve_scorer_api_key()
            .context("scorer enabled but no api key available")?;
        Box::new(HttpScorer::new(
            Arc::clone(&http),
            config.scorer.api_url.clone(),
            api_key,
            config.scorer.model.clone(),
        ))
    } else {
        Box::new(DisabledScorer)
    };
    let dispatcher = Dispatcher::new(
        Box::new(WebhookNotifier::new(
            Arc::clone(&http),
            config.webhook_url.clone(),
        )),
        Duration::from_secs(1),
    );

    Ok(Pipeline {
        matcher,
        assembler,
        gate,
        scorer,
        dispatcher,
        colors: config.colors.clone(),
        score_pacing: config.stealth.to_delays(),
    })
}

async fn run_once(
    config: &AppConfig,
    query: &str,
    max_jobs: usize,
    dry_run: bool,
) -> Result<CycleReport> {
    let http = build_http(config)?;
    let source = build_source(config, Arc::clone(&http))?;
    let pipeline = build_pipeline(config, http)?;

    let mut dedup = DedupLedger::load(&config.state.seen_jobs).await;
    let mut stats =
        SkillStatsLedger::load(&config.state.skill_stats, Utc::now().date_naive()).await;
    pipeline
        .run_cycle(source.as_ref(), query, max_jobs, &mut dedup, &mut stats, dry_run)
        .await
}

fn print_report(report: &CycleReport) {
    println!(
        "cycle complete: run_id={} query={:?} acquired={} fresh={} qualified={} notified={} outcome={:?}",
        report.run_id,
        report.query,
        report.acquired,
        report.fresh,
        report.qualified,
        report.notified,
        report.outcome
    );
}

async fn watch(config: &AppConfig) -> Result<()> {
    let http = build_http(config)?;
    let source = build_source(config, Arc::clone(&http))?;
    let pipeline = build_pipeline(config, http)?;

    let mut queries: Vec<String> = config.presets.values().cloned().collect();
    if queries.is_empty() {
        bail!("watch needs at least one preset query");
    }
    queries.sort();
    queries.dedup();

    let service = Service {
        pipeline,
        source,
        queries,
        settings: ServiceLoopSettings {
            interval: Duration::from_secs_f64(config.service.interval_hours * 3600.0),
            jitter: Duration::from_secs(config.service.jitter_minutes * 60),
            settle: Duration::from_secs(config.service.settle_secs),
            query_delays: config.stealth.to_delays(),
            max_jobs_per_query: config.service.max_jobs_per_query,
            ..ServiceLoopSettings::default()
        },
        paths: StatePathSet {
            seen_jobs: config.state.seen_jobs.clone(),
            skill_stats: config.state.skill_stats.clone(),
            checkpoint: config.state.service.clone(),
        },
    };

    let shutdown = ShutdownToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.request();
            }
        });
    }
    service.run(&shutdown).await
}

async fn print_stats(config: &AppConfig) {
    let today = Utc::now().date_naive();
    let stats = SkillStatsLedger::load(&config.state.skill_stats, today).await;

    let week = stats.aggregate(&SkillStatsLedger::window(today, 7, 0));
    let month = stats.aggregate(&SkillStatsLedger::window(today, 30, 0));
    println!("jobs analyzed: {} (7d), {} (30d)", week.jobs, month.jobs);
    println!("top skills (7d):");
    for (name, count) in week.top_skills(10) {
        println!("  {name}: {count}");
    }
    println!("top uncovered keywords (7d):");
    for (name, count) in week.top_unknown(5) {
        println!("  {name}: {count}");
    }
}

async fn send_weekly_report(config: &AppConfig) -> Result<()> {
    let today = Utc::now().date_naive();
    let stats = SkillStatsLedger::load(&config.state.skill_stats, today).await;
    let embed = weekly_report_embed(&stats, today);

    let http = build_http(config)?;
    let dispatcher = Dispatcher::new(
        Box::new(WebhookNotifier::new(http, config.webhook_url.clone())),
        Duration::from_secs(1),
    );
    dispatcher
        .dispatch_embed(embed)
        .await
        .context("sending weekly report")?;
    println!("weekly report sent");
    Ok(())
}

struct OneShotRunner {
    config: AppConfig,
}

#[async_trait]
impl CycleRunner for OneShotRunner {
    async fn run(&self, query: &str, max_jobs: usize, dry_run: bool) -> Result<CycleReport> {
        run_once(&self.config, query, max_jobs, dry_run).await
    }
}

async fn serve(config: AppConfig, port: u16) -> Result<()> {
    let status = StatusSnapshot {
        feed_configured: config.feed.is_some(),
        interactive_configured: config.interactive.is_some(),
        scorer_enabled: config.scorer.enabled,
        scorer_key_present: config.resolve_scorer_api_key().is_some(),
        webhook_configured: !config.webhook_url.is_empty(),
    };
    let presets: BTreeMap<String, String> = config.presets.clone();
    let stats_path = config.state.skill_stats.clone();
    let default_max_jobs = config.service.max_jobs_per_query;

    let state = AppState::new(
        presets,
        Arc::new(OneShotRunner { config }),
        status,
        stats_path,
        default_max_jobs,
    );
    fnotify_web::serve(state, port).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_sources(sources: serde_json::Value) -> AppConfig {
        let mut value = serde_json::json!({
            "webhook_url": "https://hooks.example/wh/123",
            "profile_file": "profile.md",
            "skills": {
                "vba": {"keywords": ["vba"], "weight": 8, "score": 9}
            },
            "scorer": {"model": "scout-1", "api_key": "sk-test"}
        });
        for (key, source) in sources.as_object().expect("sources object") {
            value[key] = source.clone();
        }
        serde_json::from_value(value).expect("config")
    }

    #[test]
    fn an_interactive_only_config_fails_the_startup_check() {
        let config = config_with_sources(serde_json::json!({
            "interactive": {
                "source_id": "interactive",
                "base_url": "https://jobs.example.test"
            }
        }));
        let err = ensure_feed_configured(&config).expect_err("should fail");
        assert!(err.to_string().contains("no feed source configured"));
    }

    #[test]
    fn a_feed_config_passes_the_startup_check() {
        let config = config_with_sources(serde_json::json!({
            "feed": {"source_id": "feed", "feed_url": "https://example.test/rss"}
        }));
        assert!(ensure_feed_configured(&config).is_ok());
    }
}
