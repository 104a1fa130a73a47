//! Thin HTTP translation layer over the search engine: `/search`, `/health`,
//! and `/stats` map one-to-one onto the engine facade and hold no search
//! logic of their own.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use searchcore::{Health, QueryResult, SearchEngine, SearchError, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    10
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u64,
    pub cached: bool,
    /// True when the query ran out of budget; `results` is then the partial
    /// ranking computed before the deadline.
    pub timed_out: bool,
    pub total: usize,
    pub results: Vec<QueryResult>,
}

pub fn build_app(engine: Arc<SearchEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health_handler))
        .route("/search", get(search_handler))
        .route("/stats", get(stats_handler))
        .with_state(AppState { engine })
        .layer(cors)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let k = params.k.clamp(1, 100);
    match state.engine.search(&params.q, k) {
        Ok(outcome) => Json(SearchResponse {
            query: params.q,
            took_ms: outcome.elapsed.as_millis() as u64,
            cached: outcome.cached,
            timed_out: false,
            total: outcome.results.len(),
            results: outcome.results,
        }),
        Err(SearchError::Timeout { partial, budget_ms }) => Json(SearchResponse {
            query: params.q,
            took_ms: budget_ms,
            cached: false,
            timed_out: true,
            total: partial.len(),
            results: partial,
        }),
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(state.engine.health())
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.engine.stats())
}
