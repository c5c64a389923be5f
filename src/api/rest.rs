// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The whole surface is unauthenticated and read-only: this engine only
// emits signals, it never accepts orders or mutates trading state. CORS is
// left permissive since consumers are internal dashboards and bots.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::ranking::{CompareWindow, MoverDirection, RankingType};
use crate::signal_history::SignalQuery;
use crate::pattern_history::PatternQuery;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/history", get(history))
        .route("/api/patterns", get(patterns))
        .route("/api/pivot-status", get(pivot_status))
        .route("/api/pivots/:symbol", get(pivots_for_symbol))
        .route("/api/tickers", get(tickers))
        .route("/api/ranking/current", get(ranking_current))
        .route("/api/ranking/history/:symbol", get(ranking_history))
        .route("/api/ranking/movers", get(ranking_movers))
        .route("/api/sse", get(crate::api::sse::sse_handler))
        .layer(cors)
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() })))
}

// =============================================================================
// GET /healthz
// =============================================================================

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

// =============================================================================
// GET /api/history
// =============================================================================

#[derive(Debug, Deserialize)]
struct HistoryParams {
    symbol: Option<String>,
    period: Option<String>,
    #[serde(default)]
    level: Vec<String>,
    direction: Option<String>,
    source: Option<String>,
    limit: Option<i64>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let query = SignalQuery {
        symbol: params.symbol,
        period: params.period,
        levels: params.level,
        direction: params.direction,
        source: params.source,
        limit: params.limit.unwrap_or(200),
    };
    Json(state.signal_history.query(&query))
}

// =============================================================================
// GET /api/patterns
// =============================================================================

#[derive(Debug, Deserialize)]
struct PatternParams {
    symbol: Option<String>,
    pattern: Option<String>,
    direction: Option<String>,
    limit: Option<i64>,
}

async fn patterns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PatternParams>,
) -> impl IntoResponse {
    let query = PatternQuery {
        symbol: params.symbol,
        pattern: params.pattern,
        direction: params.direction,
        limit: params.limit.unwrap_or(200),
    };
    Json(state.pattern_history.query(&query))
}

// =============================================================================
// GET /api/pivot-status
// =============================================================================

async fn pivot_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pivot_refresher.status())
}

// =============================================================================
// GET /api/pivots/:symbol
// =============================================================================

async fn pivots_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let daily = state.pivot_store.get_levels(crate::types::Period::Daily, &symbol);
    let weekly = state.pivot_store.get_levels(crate::types::Period::Weekly, &symbol);
    Json(serde_json::json!({ "daily": daily, "weekly": weekly }))
}

// =============================================================================
// GET /api/tickers
// =============================================================================

#[derive(Debug, Deserialize)]
struct TickersParams {
    symbols: Option<String>,
}

async fn tickers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TickersParams>,
) -> impl IntoResponse {
    match params.symbols {
        Some(raw) => {
            let wanted: HashSet<String> = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            Json(state.ticker_store.snapshot_for(&wanted))
        }
        None => Json(state.ticker_store.snapshot()),
    }
}

// =============================================================================
// GET /api/ranking/current
// =============================================================================

#[derive(Debug, Deserialize)]
struct RankingCurrentParams {
    #[serde(rename = "type")]
    rtype: Option<String>,
    compare: Option<String>,
    limit: Option<usize>,
}

fn parse_ranking_type(raw: Option<&str>) -> Result<RankingType, (StatusCode, Json<serde_json::Value>)> {
    match raw.unwrap_or("volume") {
        "volume" => Ok(RankingType::Volume),
        "trades" => Ok(RankingType::Trades),
        other => Err(bad_request(format!("invalid type '{other}', expected 'volume' or 'trades'"))),
    }
}

fn parse_compare(raw: Option<&str>) -> Result<Option<CompareWindow>, (StatusCode, Json<serde_json::Value>)> {
    match raw {
        None => Ok(None),
        Some(raw) => CompareWindow::parse(raw)
            .map(Some)
            .ok_or_else(|| bad_request(format!("invalid compare window '{raw}'"))),
    }
}

async fn ranking_current(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RankingCurrentParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let rtype = parse_ranking_type(params.rtype.as_deref())?;
    let compare = parse_compare(params.compare.as_deref())?;
    let limit = params.limit.unwrap_or(50).min(500);
    let items = state.ranking_store.get_current(rtype, compare, limit);
    Ok(Json(serde_json::json!({
        "timestamp": chrono::Utc::now(),
        "compare_to": params.compare,
        "items": items,
    })))
}

// =============================================================================
// GET /api/ranking/history/:symbol
// =============================================================================

async fn ranking_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let snapshots = state.ranking_store.get_history(&symbol);
    Json(serde_json::json!({ "symbol": symbol, "snapshots": snapshots }))
}

// =============================================================================
// GET /api/ranking/movers
// =============================================================================

#[derive(Debug, Deserialize)]
struct MoversParams {
    #[serde(rename = "type")]
    rtype: Option<String>,
    direction: Option<String>,
    compare: Option<String>,
    limit: Option<usize>,
}

async fn ranking_movers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MoversParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let rtype = parse_ranking_type(params.rtype.as_deref())?;
    let compare = parse_compare(params.compare.as_deref())?;
    let direction = match params.direction.as_deref() {
        Some("up") => MoverDirection::Up,
        Some("down") => MoverDirection::Down,
        Some(other) => return Err(bad_request(format!("invalid direction '{other}', expected 'up' or 'down'"))),
        None => return Err(bad_request("missing required parameter 'direction'")),
    };
    let limit = params.limit.unwrap_or(20).min(500);
    let items = state.ranking_store.get_movers(rtype, direction, compare, limit);
    Ok(Json(serde_json::json!({
        "timestamp": chrono::Utc::now(),
        "compare_to": params.compare,
        "direction": params.direction,
        "items": items,
    })))
}
