//! HTTP trigger endpoints.
//!
//! `GET /timeline`, `GET /trend` and `GET /search` run a scenario to
//! completion and answer with the plain-text signal `done.`. The `/api`
//! routes return JSON for operators.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::DatabaseError;
use crate::pipeline::processor::SelectionPipeline;
use crate::pipeline::types::ScenarioKind;
use crate::store::HistoryStore;

/// Completion signal returned by the scenario endpoints.
pub const DONE: &str = "done.";

const DEFAULT_RECENT_LIMIT: usize = 20;
const MAX_RECENT_LIMIT: usize = 200;

/// Shared state for trigger routes.
#[derive(Clone)]
pub struct TriggerState {
    pub pipeline: Arc<SelectionPipeline>,
    pub history: Arc<dyn HistoryStore>,
}

async fn run_timeline(State(state): State<TriggerState>) -> &'static str {
    state.pipeline.run(ScenarioKind::Timeline).await;
    DONE
}

async fn run_trend(State(state): State<TriggerState>) -> &'static str {
    state.pipeline.run(ScenarioKind::Trend).await;
    DONE
}

async fn run_search(State(state): State<TriggerState>) -> &'static str {
    state.pipeline.run(ScenarioKind::Keyword).await;
    DONE
}

/// POST /api/runs/{scenario}
///
/// Runs a scenario and returns its `RunReport`.
async fn run_with_report(
    State(state): State<TriggerState>,
    Path(scenario): Path<ScenarioKind>,
) -> impl IntoResponse {
    Json(state.pipeline.run(scenario).await)
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    limit: Option<usize>,
}

/// GET /api/status
///
/// Returns how many posts have been recorded and the most recent ones.
async fn get_status(
    State(state): State<TriggerState>,
    Query(params): Query<StatusParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);

    let lookup = async {
        let count = state.history.count().await?;
        let recent = state.history.recent(limit).await?;
        Ok::<_, DatabaseError>((count, recent))
    };
    let (count, recent) = match lookup.await {
        Ok(found) => found,
        Err(e) => {
            error!(error = %e, "Status lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    Json(serde_json::json!({
        "recorded": count,
        "recent": recent,
    }))
    .into_response()
}

/// Build the trigger routes.
pub fn trigger_routes(state: TriggerState) -> Router {
    Router::new()
        .route("/timeline", get(run_timeline))
        .route("/trend", get(run_trend))
        .route("/search", get(run_search))
        .route("/api/runs/{scenario}", post(run_with_report))
        .route("/api/status", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
