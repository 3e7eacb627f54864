// =============================================================================
// SMC Sentinel — Main Entry Point
// =============================================================================
//
// Autonomous intraday signal engine for crypto perpetuals: scans the symbol
// universe for Smart Money Concept setups, tracks fired signals through a
// breakeven/trailing discipline, re-checks watchlisted setups on every new
// 5m candle, and periodically tunes its own detection thresholds from
// realized outcomes.
//
// Four independent cadences, each a long-lived task; parameter changes take
// effect on the next tick, never mid-iteration.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod config;
mod db;
mod engine;
mod market_data;
mod optimizer;
mod params;
mod structure;
mod trade_manager;
mod types;
mod watchlist;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Settings;
use crate::db::Database;
use crate::engine::{DetectionEngine, Emission};
use crate::optimizer::SelfOptimizer;
use crate::watchlist::{WATCH_15M_CANDLES, WATCH_5M_CANDLES};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           SMC Sentinel — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut settings = Settings::load("settings.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        Settings::default()
    });

    if let Ok(syms) = std::env::var("SENTINEL_SYMBOLS") {
        settings.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(path) = std::env::var("SENTINEL_DB_PATH") {
        settings.db_path = path;
    }
    if let Ok(addr) = std::env::var("SENTINEL_BIND_ADDR") {
        settings.bind_addr = addr;
    }

    // ── 2. Persistence (fatal if unreachable) ────────────────────────────
    let db = Arc::new(
        Database::open(&settings.db_path)
            .with_context(|| format!("cannot open database at {}", settings.db_path))?,
    );

    let state = Arc::new(AppState::new(settings, db));

    // ── 3. Startup hygiene ───────────────────────────────────────────────
    // Death-spiral escape hatch: stored params outside bounds reset to
    // defaults before the first tick reads a snapshot.
    state.params.enforce_bounds_on_startup();

    // Rebuild breakeven/trailing state from persisted stop levels.
    state.trade_manager.recover_state()?;

    // ── 4. Symbol universe ───────────────────────────────────────────────
    {
        let configured = state.settings.read().symbols.clone();
        let symbols = if configured.is_empty() {
            let limit = state.settings.read().universe_size;
            match state.client.get_perp_universe(limit).await {
                Ok(universe) if !universe.is_empty() => universe,
                Ok(_) | Err(_) => {
                    warn!("universe discovery failed, falling back to majors");
                    vec![
                        "BTCUSDT".into(),
                        "ETHUSDT".into(),
                        "BNBUSDT".into(),
                        "XRPUSDT".into(),
                        "SOLUSDT".into(),
                    ]
                }
            }
        } else {
            configured
        };
        info!(count = symbols.len(), "symbol universe ready");
        *state.symbols.write() = symbols;
    }

    // ── 5. Status API server ─────────────────────────────────────────────
    {
        let api_state = state.clone();
        let bind_addr = state.settings.read().bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "status API listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "status API server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
            }
        });
    }

    // ── 6. Rate-limit window reset ───────────────────────────────────────
    {
        let tracker = state.client.rate_limit();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracker.reset_1m_weight();
            }
        });
    }

    // ── 7. Scan loop ─────────────────────────────────────────────────────
    {
        let scan_state = state.clone();
        let scan_interval = state.settings.read().scan_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(scan_interval));
            loop {
                interval.tick().await;
                run_scan_tick(&scan_state).await;
            }
        });
    }

    // ── 8. Open-trade loop ───────────────────────────────────────────────
    {
        let trade_state = state.clone();
        let check_interval = state.settings.read().trade_check_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(check_interval));
            loop {
                interval.tick().await;
                run_trade_tick(&trade_state).await;
            }
        });
    }

    // ── 9. Watchlist loop ────────────────────────────────────────────────
    {
        let watch_state = state.clone();
        let watch_interval = state.settings.read().watch_check_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(watch_interval));
            loop {
                interval.tick().await;
                run_watch_tick(&watch_state).await;
            }
        });
    }

    // ── 10. Optimiser loop ───────────────────────────────────────────────
    {
        let opt_state = state.clone();
        let opt_interval = state.settings.read().optimize_interval_secs;
        tokio::spawn(async move {
            let optimizer = SelfOptimizer::new(opt_state.db.clone(), opt_state.params.clone());
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(opt_interval));
            loop {
                interval.tick().await;
                match optimizer.run_cycle() {
                    Ok(outcome) => {
                        info!(outcome = ?outcome, "optimisation cycle complete");
                        opt_state.increment_version();
                    }
                    Err(e) => error!(error = %e, "optimisation cycle failed"),
                }
            }
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    if let Err(e) = state.settings.read().save("settings.json") {
        error!(error = %e, "failed to save settings on shutdown");
    }

    info!("SMC Sentinel shut down complete.");
    Ok(())
}

// =============================================================================
// Tick bodies
// =============================================================================

/// One full pass over the symbol universe. A failed fetch skips that symbol
/// only; emissions feed the trade manager and watchlist.
async fn run_scan_tick(state: &Arc<AppState>) {
    let settings = state.settings.read().clone();
    let symbols = state.symbols.read().clone();
    // One consistent snapshot for the whole tick.
    let params = state.params.snapshot(&settings);

    let started = std::time::Instant::now();
    let mut signals = 0usize;
    let mut watches = 0usize;

    for symbol in &symbols {
        let bundle = match state.client.get_multi_timeframe_data(symbol).await {
            Ok(b) => b,
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "market data fetch failed, skipping symbol");
                continue;
            }
        };

        match DetectionEngine::generate_signal(symbol, &bundle, &params) {
            Emission::Signal(setup) => {
                match state.trade_manager.open_signal(&setup, &settings) {
                    Ok(Some(_)) => {
                        signals += 1;
                        state.increment_version();
                    }
                    Ok(None) => {}
                    Err(e) => error!(symbol = %symbol, error = %e, "failed to open signal"),
                }
            }
            Emission::Watch(setup) => match state.watchlist.add_watch(&setup, &settings) {
                Ok(Some(_)) => {
                    watches += 1;
                    state.increment_version();
                }
                Ok(None) => {}
                Err(e) => error!(symbol = %symbol, error = %e, "failed to add watch"),
            },
            Emission::None => {}
        }
    }

    info!(
        symbols = symbols.len(),
        signals,
        watches,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan tick complete"
    );
}

/// Advance all ACTIVE signals against fresh tickers.
async fn run_trade_tick(state: &Arc<AppState>) {
    let settings = state.settings.read().clone();

    let active = match state.db.get_active_signals() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to read active signals");
            return;
        }
    };
    if active.is_empty() {
        return;
    }

    let mut tickers: HashMap<String, f64> = HashMap::new();
    for symbol in active.iter().map(|s| s.symbol.as_str()) {
        if tickers.contains_key(symbol) {
            continue;
        }
        match state.client.get_ticker(symbol).await {
            Ok(price) => {
                tickers.insert(symbol.to_string(), price);
            }
            Err(e) => {
                debug!(symbol, error = %e, "ticker fetch failed, signal skipped this tick");
            }
        }
    }

    match state
        .trade_manager
        .check_open_trades(&tickers, &settings, chrono::Utc::now())
    {
        Ok(closed) if closed > 0 => {
            state.increment_version();
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "open-trade sweep failed"),
    }
}

/// Re-evaluate every WATCHING entry whose 5m candle has rolled.
async fn run_watch_tick(state: &Arc<AppState>) {
    let settings = state.settings.read().clone();
    let params = state.params.snapshot(&settings);

    let watching = match state.watchlist.watching() {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to read watchlist");
            return;
        }
    };

    for entry in &watching {
        let m5 = match state
            .client
            .get_candles(&entry.symbol, "5m", WATCH_5M_CANDLES)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                debug!(symbol = %entry.symbol, error = %e, "5m fetch failed, entry skipped");
                continue;
            }
        };

        // No new 5m candle closed: skip before spending a 15m fetch.
        if let (Some(last), Some(seen)) = (m5.last(), entry.last_5m_candle_ts) {
            if last.open_time == seen {
                continue;
            }
        }

        let m15 = match state
            .client
            .get_candles(&entry.symbol, "15m", WATCH_15M_CANDLES)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                debug!(symbol = %entry.symbol, error = %e, "15m fetch failed, entry skipped");
                continue;
            }
        };

        match state.watchlist.recheck_entry(
            entry,
            &m5,
            &m15,
            &params,
            &settings,
            &state.trade_manager,
        ) {
            Ok(outcome) => {
                debug!(id = entry.id, symbol = %entry.symbol, outcome = ?outcome, "watch re-check");
                state.increment_version();
            }
            Err(e) => error!(id = entry.id, error = %e, "watch re-check failed"),
        }
    }
}
