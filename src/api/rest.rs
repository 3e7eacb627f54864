// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only views over
// Persistence; the engine has no control surface (no order routing, no
// runtime mutation). CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/signals/active", get(active_signals))
        .route("/api/v1/signals/history", get(signal_history))
        .route("/api/v1/signals/cancelled", get(cancelled_signals))
        .route("/api/v1/watchlist", get(watchlist))
        .route("/api/v1/watchlist/expired", get(expired_watchlist))
        .route("/api/v1/watchlist/expire-summary", get(expire_summary))
        .route("/api/v1/performance", get(performance))
        .route("/api/v1/params", get(params))
        .route("/api/v1/optimization-log", get(optimization_log))
        .route("/api/v1/intel/:symbol", get(futures_intel))
        .layer(cors)
        .with_state(state)
}

fn db_error(e: anyhow::Error) -> (StatusCode, String) {
    warn!(error = %e, "status API query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    symbols: usize,
    used_weight_1m: u32,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        symbols: state.symbols.read().len(),
        used_weight_1m: state.client.rate_limit().snapshot().used_weight_1m,
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct SignalView {
    id: i64,
    symbol: String,
    direction: String,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    status: String,
    entry_mode: String,
    rr_ratio: Option<f64>,
    timeframe: Option<String>,
    components: Vec<String>,
    entry_time: String,
    close_time: Option<String>,
    close_price: Option<f64>,
    pnl_pct: Option<f64>,
    notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    breakeven_moved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trailing_sl: Option<f64>,
}

impl From<crate::db::SignalRecord> for SignalView {
    fn from(s: crate::db::SignalRecord) -> Self {
        Self {
            id: s.id,
            symbol: s.symbol,
            direction: s.direction.as_str().to_string(),
            entry_price: s.entry_price,
            stop_loss: s.stop_loss,
            take_profit: s.take_profit,
            status: s.status.as_str().to_string(),
            entry_mode: s.entry_mode,
            rr_ratio: s.rr_ratio,
            timeframe: s.timeframe,
            components: s.components,
            entry_time: s.entry_time.to_rfc3339(),
            close_time: s.close_time.map(|t| t.to_rfc3339()),
            close_price: s.close_price,
            pnl_pct: s.pnl_pct,
            notes: s.notes,
            breakeven_moved: None,
            trailing_sl: None,
        }
    }
}

async fn active_signals(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let signals = state.db.get_active_signals().map_err(db_error)?;
    let views: Vec<SignalView> = signals
        .into_iter()
        .map(|s| {
            let id = s.id;
            let mut view = SignalView::from(s);
            if let Some(ts) = state.trade_manager.trade_state(id) {
                view.breakeven_moved = Some(ts.breakeven_moved);
                view.trailing_sl = ts.trailing_sl;
            }
            view
        })
        .collect();
    Ok(Json(views))
}

async fn signal_history(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let signals = state.db.get_signal_history(100).map_err(db_error)?;
    Ok(Json(signals.into_iter().map(SignalView::from).collect::<Vec<_>>()))
}

async fn cancelled_signals(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let signals = state.db.get_cancelled_signals(50).map_err(db_error)?;
    Ok(Json(signals.into_iter().map(SignalView::from).collect::<Vec<_>>()))
}

#[derive(Serialize)]
struct WatchView {
    id: i64,
    symbol: String,
    direction: String,
    potential_entry: f64,
    potential_sl: f64,
    potential_tp: f64,
    watch_reason: Option<String>,
    candles_watched: u32,
    max_watch_candles: u32,
}

async fn watchlist(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let items = state.db.get_watching_items().map_err(db_error)?;
    Ok(Json(
        items
            .into_iter()
            .map(|w| WatchView {
                id: w.id,
                symbol: w.symbol,
                direction: w.direction.as_str().to_string(),
                potential_entry: w.potential_entry,
                potential_sl: w.potential_sl,
                potential_tp: w.potential_tp,
                watch_reason: w.watch_reason,
                candles_watched: w.candles_watched,
                max_watch_candles: w.max_watch_candles,
            })
            .collect::<Vec<_>>(),
    ))
}

#[derive(Serialize)]
struct ExpiredWatchView {
    id: i64,
    symbol: String,
    direction: String,
    status: String,
    watch_reason: Option<String>,
    expire_reason: Option<String>,
    candles_watched: u32,
    max_watch_candles: u32,
}

async fn expired_watchlist(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let items = state.db.get_expired_watch_items(50).map_err(db_error)?;
    Ok(Json(
        items
            .into_iter()
            .map(|w| ExpiredWatchView {
                id: w.id,
                symbol: w.symbol,
                direction: w.direction.as_str().to_string(),
                status: w.status.as_str().to_string(),
                watch_reason: w.watch_reason,
                expire_reason: w.expire_reason,
                candles_watched: w.candles_watched,
                max_watch_candles: w.max_watch_candles,
            })
            .collect::<Vec<_>>(),
    ))
}

async fn expire_summary(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = state.db.expire_reason_summary().map_err(db_error)?;
    Ok(Json(summary))
}

async fn performance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = state.db.get_performance_summary().map_err(db_error)?;
    let components = state.db.get_component_performance().map_err(db_error)?;
    let htf_bias = state.db.get_htf_bias_accuracy().map_err(db_error)?;
    let losses = state.db.get_loss_analysis(20).map_err(db_error)?;
    Ok(Json(serde_json::json!({
        "summary": summary,
        "components": components,
        "htf_bias": htf_bias,
        "recent_losses": losses,
    })))
}

#[derive(Serialize)]
struct ParamView {
    name: String,
    current_value: f64,
    default_value: f64,
    min: f64,
    max: f64,
}

async fn params(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stored: std::collections::HashMap<String, f64> = state
        .db
        .get_all_bot_params()
        .map_err(db_error)?
        .into_iter()
        .map(|(name, value, _)| (name, value))
        .collect();

    let view: Vec<ParamView> = crate::params::TUNABLE_PARAMS
        .iter()
        .map(|spec| ParamView {
            name: spec.name.to_string(),
            current_value: stored.get(spec.name).copied().unwrap_or(spec.default),
            default_value: spec.default,
            min: spec.min,
            max: spec.max,
        })
        .collect();
    Ok(Json(view))
}

async fn optimization_log(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let logs = state.db.get_optimization_logs(50).map_err(db_error)?;
    Ok(Json(logs))
}

/// Live funding rate and open interest for one symbol. Not consumed by the
/// detection pipeline; surfaced for the dashboard only.
async fn futures_intel(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let symbol = symbol.to_uppercase();
    let funding_rate = state.client.get_funding_rate(&symbol).await.ok();
    let open_interest = state.client.get_open_interest(&symbol).await.ok();
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "funding_rate": funding_rate,
        "open_interest": open_interest,
    })))
}
