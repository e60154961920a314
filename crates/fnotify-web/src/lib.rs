//! JSON control surface over the intake pipeline.
//!
//! Four routes: trigger a cycle, list query presets, report configuration
//! status, and summarize the rolling skill statistics. One cycle at a time:
//! a trigger while a cycle is running answers 409 instead of queueing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fnotify_pipeline::CycleReport;
use fnotify_storage::{SkillStatsLedger, Trend};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

pub const CRATE_NAME: &str = "fnotify-web";

/// Executes one intake cycle on behalf of the control surface. The web
/// layer never touches ledgers or sources directly.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run(
        &self,
        query: &str,
        max_jobs: usize,
        dry_run: bool,
    ) -> anyhow::Result<CycleReport>;
}

/// Configuration snapshot surfaced by `GET /status`. Booleans only; no
/// secrets leave the process.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub feed_configured: bool,
    pub interactive_configured: bool,
    pub scorer_enabled: bool,
    pub scorer_key_present: bool,
    pub webhook_configured: bool,
}

pub struct AppState {
    pub presets: BTreeMap<String, String>,
    pub runner: Arc<dyn CycleRunner>,
    pub status: StatusSnapshot,
    pub stats_path: PathBuf,
    pub default_max_jobs: usize,
    busy: Mutex<()>,
}

impl AppState {
    pub fn new(
        presets: BTreeMap<String, String>,
        runner: Arc<dyn CycleRunner>,
        status: StatusSnapshot,
        stats_path: impl Into<PathBuf>,
        default_max_jobs: usize,
    ) -> Self {
        Self {
            presets,
            runner,
            status,
            stats_path: stats_path.into(),
            default_max_jobs,
            busy: Mutex::new(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleRequest {
    /// Free-form query. Mutually exclusive with `preset`.
    #[serde(default)]
    pub query: Option<String>,
    /// Named preset from the configuration.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub max_jobs: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/cycle", post(cycle_handler))
        .route("/presets", get(presets_handler))
        .route("/status", get(status_handler))
        .route("/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "control surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn cycle_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CycleRequest>,
) -> Response {
    let query = match resolve_query(&state, &request) {
        Ok(query) => query,
        Err(response) => return response,
    };

    // One cycle at a time. Callers retry; queueing would stack stale
    // triggers behind a slow source.
    let Ok(_guard) = state.busy.try_lock() else {
        return error_response(StatusCode::CONFLICT, "cycle already running");
    };

    let max_jobs = request.max_jobs.unwrap_or(state.default_max_jobs);
    match state.runner.run(&query, max_jobs, request.dry_run).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn resolve_query(state: &AppState, request: &CycleRequest) -> Result<String, Response> {
    if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
        return Ok(query.to_string());
    }
    let Some(preset) = request.preset.as_deref() else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "either query or preset is required",
        ));
    };
    match state.presets.get(preset) {
        Some(query) => Ok(query.clone()),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            &format!("unknown preset: {preset}"),
        )),
    }
}

async fn presets_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({ "presets": state.presets })).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(&state.status).into_response()
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    let today = Utc::now().date_naive();
    // Read-only view; the pipeline owns the writable ledger.
    let stats = SkillStatsLedger::load(&state.stats_path, today).await;

    let this_week = stats.aggregate(&SkillStatsLedger::window(today, 7, 0));
    let prev_week = stats.aggregate(&SkillStatsLedger::window(today, 7, 7));
    let month = stats.aggregate(&SkillStatsLedger::window(today, 30, 0));

    let top_skills: Vec<serde_json::Value> = this_week
        .top_skills(10)
        .into_iter()
        .map(|(name, count)| {
            let prev = prev_week.skills.get(&name).copied().unwrap_or(0);
            serde_json::json!({
                "name": name,
                "count": count,
                "trend": Trend::classify(count, prev).label(),
            })
        })
        .collect();
    let top_unknown: Vec<serde_json::Value> = this_week
        .top_unknown(5)
        .into_iter()
        .map(|(name, count)| serde_json::json!({ "name": name, "count": count }))
        .collect();

    Json(serde_json::json!({
        "last_updated": stats.last_updated(),
        "jobs_7d": this_week.jobs,
        "jobs_prev_7d": prev_week.jobs,
        "jobs_30d": month.jobs,
        "volume_trend": Trend::classify(this_week.jobs, prev_week.jobs).label(),
        "top_skills_7d": top_skills,
        "top_unknown_7d": top_unknown,
    }))
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
