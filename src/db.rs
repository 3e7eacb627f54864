// =============================================================================
// Persistence — SQLite store for signals, watchlist, params, and optimiser log
// =============================================================================
//
// Single bundled-SQLite connection behind a parking_lot::Mutex, WAL journal
// mode for concurrent readers, schema applied idempotently on open. Every
// state transition in the system commits here before the owning task
// continues; restart rebuilds all in-memory state from these tables.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::types::{Direction, SignalStatus, WatchStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price REAL NOT NULL,
    stop_loss REAL NOT NULL,
    take_profit REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    entry_mode TEXT NOT NULL DEFAULT 'MARKET',
    confidence REAL NOT NULL DEFAULT 100.0,
    confluence_score REAL NOT NULL DEFAULT 100.0,
    components TEXT NOT NULL DEFAULT '[]',
    htf_bias TEXT,
    rr_ratio REAL,
    timeframe TEXT,
    entry_time TEXT NOT NULL,
    close_time TEXT,
    close_price REAL,
    pnl_pct REAL,
    notes TEXT
);
CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status, symbol);
CREATE INDEX IF NOT EXISTS idx_signals_symbol_close ON signals(symbol, close_time DESC);

CREATE TABLE IF NOT EXISTS watchlist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    potential_entry REAL NOT NULL,
    potential_sl REAL NOT NULL,
    potential_tp REAL NOT NULL,
    watch_reason TEXT,
    candles_watched INTEGER NOT NULL DEFAULT 0,
    max_watch_candles INTEGER NOT NULL DEFAULT 12,
    last_5m_candle_ts INTEGER,
    status TEXT NOT NULL DEFAULT 'WATCHING',
    expire_reason TEXT,
    context TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_watchlist_status ON watchlist(status, symbol);

CREATE TABLE IF NOT EXISTS bot_params (
    name TEXT PRIMARY KEY,
    current_value REAL NOT NULL,
    default_value REAL NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS optimization_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    param_name TEXT NOT NULL,
    old_value REAL NOT NULL,
    new_value REAL NOT NULL,
    reason TEXT,
    wr_before REAL,
    wr_after REAL,
    trades_analyzed INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

// =============================================================================
// Row types
// =============================================================================

/// One persisted signal row.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: SignalStatus,
    pub entry_mode: String,
    pub components: Vec<String>,
    pub htf_bias: Option<String>,
    pub rr_ratio: Option<f64>,
    pub timeframe: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub notes: Option<String>,
}

/// Fields needed to create an ACTIVE signal.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub components: Vec<String>,
    pub htf_bias: String,
    pub rr_ratio: f64,
    pub timeframe: String,
    pub notes: Option<String>,
}

/// One persisted watchlist row.
#[derive(Debug, Clone)]
pub struct WatchRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub potential_entry: f64,
    pub potential_sl: f64,
    pub potential_tp: f64,
    pub watch_reason: Option<String>,
    pub candles_watched: u32,
    pub max_watch_candles: u32,
    pub last_5m_candle_ts: Option<i64>,
    pub status: WatchStatus,
    pub expire_reason: Option<String>,
    pub context: Option<String>,
}

/// Fields needed to create a WATCHING entry.
#[derive(Debug, Clone)]
pub struct NewWatch {
    pub symbol: String,
    pub direction: Direction,
    pub potential_entry: f64,
    pub potential_sl: f64,
    pub potential_tp: f64,
    pub watch_reason: String,
    pub max_watch_candles: u32,
    pub context_json: String,
}

/// Aggregate outcome statistics over terminal signals.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub active: usize,
    pub wins: usize,
    pub losses: usize,
    pub cancelled: usize,
    pub win_rate: f64,
    pub avg_win_pnl: f64,
    pub avg_loss_pnl: f64,
    pub profit_factor: f64,
}

/// Win rate of one trigger component tag.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentPerformance {
    pub component: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
}

/// One losing trade, for the optimiser's quick-loss diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LossRecord {
    pub symbol: String,
    pub components: Vec<String>,
    pub duration_minutes: i64,
    pub pnl_pct: f64,
}

/// One append-only optimisation log row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptimizationLogEntry {
    pub param_name: String,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
    pub wr_before: Option<f64>,
    pub wr_after: Option<f64>,
    pub trades_analyzed: Option<u32>,
}

// =============================================================================
// Database
// =============================================================================

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn =
            Connection::open(path).with_context(|| format!("failed to open database {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema")?;
        info!(path, "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Insert a new ACTIVE signal, returning its row id.
    pub fn add_signal(&self, sig: &NewSignal) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (symbol, direction, entry_price, stop_loss, take_profit,
                                  status, entry_mode, components, htf_bias, rr_ratio,
                                  timeframe, entry_time, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, 'ACTIVE', 'MARKET', ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sig.symbol,
                sig.direction.as_str(),
                sig.entry_price,
                sig.stop_loss,
                sig.take_profit,
                serde_json::to_string(&sig.components)?,
                sig.htf_bias,
                sig.rr_ratio,
                sig.timeframe,
                Utc::now().to_rfc3339(),
                sig.notes,
            ],
        )
        .context("failed to insert signal")?;
        Ok(conn.last_insert_rowid())
    }

    /// Transition an ACTIVE signal to a terminal status. Terminal rows are
    /// never rewritten; returns false when the row was already terminal.
    pub fn update_signal_status(
        &self,
        id: i64,
        status: SignalStatus,
        close_price: f64,
        pnl_pct: f64,
        notes: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE signals
                 SET status = ?2, close_price = ?3, pnl_pct = ?4, close_time = ?5,
                     notes = COALESCE(?6, notes)
                 WHERE id = ?1 AND status = 'ACTIVE'",
                params![
                    id,
                    status.as_str(),
                    close_price,
                    pnl_pct,
                    Utc::now().to_rfc3339(),
                    notes,
                ],
            )
            .context("failed to update signal status")?;
        if changed == 0 {
            warn!(id, status = %status, "signal status update skipped (not ACTIVE)");
        }
        Ok(changed > 0)
    }

    /// Persist a moved stop (breakeven / trailing) so restart can rebuild it.
    pub fn update_signal_sl(&self, id: i64, new_sl: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE signals SET stop_loss = ?2 WHERE id = ?1 AND status = 'ACTIVE'",
            params![id, new_sl],
        )
        .context("failed to update signal sl")?;
        Ok(())
    }

    pub fn get_active_signals(&self) -> Result<Vec<SignalRecord>> {
        self.query_signals("SELECT * FROM signals WHERE status = 'ACTIVE' ORDER BY id", [])
    }

    pub fn get_active_trade_count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM signals WHERE status = 'ACTIVE'", [], |r| r.get(0))
            .context("failed to count active signals")?;
        Ok(count as u32)
    }

    pub fn has_active_for_symbol(&self, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM signals WHERE status = 'ACTIVE' AND symbol = ?1",
                params![symbol],
                |r| r.get(0),
            )
            .context("failed to check active signal")?;
        Ok(count > 0)
    }

    pub fn active_count_for_direction(&self, direction: Direction) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM signals WHERE status = 'ACTIVE' AND direction = ?1",
                params![direction.as_str()],
                |r| r.get(0),
            )
            .context("failed to count directional signals")?;
        Ok(count as u32)
    }

    /// Close time of the symbol's most recent terminal signal. Cooldown is
    /// measured against this, not against creation time.
    pub fn last_terminal_close_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let ts: Option<String> = conn
            .query_row(
                "SELECT MAX(close_time) FROM signals
                 WHERE symbol = ?1 AND status IN ('WON','LOST','CANCELLED')",
                params![symbol],
                |r| r.get(0),
            )
            .optional()
            .context("failed to read last terminal close")?
            .flatten();
        Ok(ts.as_deref().and_then(parse_ts))
    }

    pub fn get_signal_history(&self, n: usize) -> Result<Vec<SignalRecord>> {
        self.query_signals(
            "SELECT * FROM signals ORDER BY id DESC LIMIT ?1",
            params![n as i64],
        )
    }

    pub fn get_completed_signals(&self, n: usize) -> Result<Vec<SignalRecord>> {
        self.query_signals(
            "SELECT * FROM signals WHERE status != 'ACTIVE' ORDER BY close_time DESC LIMIT ?1",
            params![n as i64],
        )
    }

    pub fn get_cancelled_signals(&self, n: usize) -> Result<Vec<SignalRecord>> {
        self.query_signals(
            "SELECT * FROM signals WHERE status = 'CANCELLED' ORDER BY id DESC LIMIT ?1",
            params![n as i64],
        )
    }

    fn query_signals<P: rusqlite::Params>(&self, sql: &str, args: P) -> Result<Vec<SignalRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).context("failed to prepare signal query")?;
        let rows = stmt
            .query_map(args, signal_from_row)
            .context("failed to run signal query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map signal row")?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Watchlist
    // -------------------------------------------------------------------------

    pub fn add_to_watchlist(&self, w: &NewWatch) -> Result<i64> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO watchlist (symbol, direction, potential_entry, potential_sl,
                                    potential_tp, watch_reason, max_watch_candles,
                                    context, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                w.symbol,
                w.direction.as_str(),
                w.potential_entry,
                w.potential_sl,
                w.potential_tp,
                w.watch_reason,
                w.max_watch_candles,
                w.context_json,
                now,
            ],
        )
        .context("failed to insert watchlist entry")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_watching_items(&self) -> Result<Vec<WatchRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM watchlist WHERE status = 'WATCHING' ORDER BY id")
            .context("failed to prepare watchlist query")?;
        let rows = stmt
            .query_map([], watch_from_row)
            .context("failed to run watchlist query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map watchlist row")?);
        }
        Ok(out)
    }

    /// The most recently expired entries — the watchlist analytics view.
    pub fn get_expired_watch_items(&self, n: usize) -> Result<Vec<WatchRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM watchlist WHERE status = 'EXPIRED'
                 ORDER BY updated_at DESC LIMIT ?1",
            )
            .context("failed to prepare expired watchlist query")?;
        let rows = stmt
            .query_map(params![n as i64], watch_from_row)
            .context("failed to run expired watchlist query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map watchlist row")?);
        }
        Ok(out)
    }

    pub fn watching_exists(&self, symbol: &str, direction: Direction) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM watchlist
                 WHERE status = 'WATCHING' AND symbol = ?1 AND direction = ?2",
                params![symbol, direction.as_str()],
                |r| r.get(0),
            )
            .context("failed to check watchlist entry")?;
        Ok(count > 0)
    }

    pub fn update_watchlist_item(
        &self,
        id: i64,
        candles_watched: u32,
        last_5m_candle_ts: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE watchlist SET candles_watched = ?2, last_5m_candle_ts = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, candles_watched, last_5m_candle_ts, Utc::now().to_rfc3339()],
        )
        .context("failed to update watchlist entry")?;
        Ok(())
    }

    pub fn promote_watchlist_item(&self, id: i64) -> Result<()> {
        self.set_watch_status(id, WatchStatus::Promoted, None)
    }

    pub fn expire_watchlist_item(&self, id: i64, reason: &str) -> Result<()> {
        self.set_watch_status(id, WatchStatus::Expired, Some(reason))
    }

    fn set_watch_status(&self, id: i64, status: WatchStatus, reason: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE watchlist SET status = ?2, expire_reason = COALESCE(?3, expire_reason),
                                  updated_at = ?4
             WHERE id = ?1 AND status = 'WATCHING'",
            params![id, status.as_str(), reason, Utc::now().to_rfc3339()],
        )
        .context("failed to set watchlist status")?;
        Ok(())
    }

    /// Expired-entry counts grouped by reason — the watchlist analytics view.
    pub fn expire_reason_summary(&self) -> Result<Vec<(String, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(expire_reason, 'unknown'), COUNT(*) FROM watchlist
                 WHERE status = 'EXPIRED' GROUP BY expire_reason ORDER BY COUNT(*) DESC",
            )
            .context("failed to prepare expire summary")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u32)))
            .context("failed to run expire summary")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map expire summary row")?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Bot params
    // -------------------------------------------------------------------------

    pub fn get_bot_param(&self, name: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT current_value FROM bot_params WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()
        .context("failed to read bot param")
    }

    pub fn get_all_bot_params(&self) -> Result<Vec<(String, f64, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name, current_value, default_value FROM bot_params ORDER BY name")
            .context("failed to prepare params query")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .context("failed to run params query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map param row")?);
        }
        Ok(out)
    }

    pub fn save_bot_param(&self, name: &str, value: f64, default: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bot_params (name, current_value, default_value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET current_value = ?2, updated_at = ?4",
            params![name, value, default, Utc::now().to_rfc3339()],
        )
        .context("failed to save bot param")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Metrics / optimiser queries
    // -------------------------------------------------------------------------

    pub fn get_performance_summary(&self) -> Result<PerformanceSummary> {
        let completed = self.get_completed_signals(10_000)?;
        let active = self.get_active_trade_count()? as usize;

        let wins: Vec<&SignalRecord> =
            completed.iter().filter(|s| s.status == SignalStatus::Won).collect();
        let losses: Vec<&SignalRecord> =
            completed.iter().filter(|s| s.status == SignalStatus::Lost).collect();
        let cancelled = completed
            .iter()
            .filter(|s| s.status == SignalStatus::Cancelled)
            .count();

        let decided = wins.len() + losses.len();
        let win_rate = if decided > 0 {
            wins.len() as f64 / decided as f64 * 100.0
        } else {
            0.0
        };
        let avg = |set: &[&SignalRecord]| {
            if set.is_empty() {
                0.0
            } else {
                set.iter().filter_map(|s| s.pnl_pct).sum::<f64>() / set.len() as f64
            }
        };
        let gross_win: f64 = wins.iter().filter_map(|s| s.pnl_pct).sum();
        let gross_loss: f64 = losses.iter().filter_map(|s| s.pnl_pct).map(f64::abs).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Ok(PerformanceSummary {
            total_trades: completed.len(),
            active,
            wins: wins.len(),
            losses: losses.len(),
            cancelled,
            win_rate,
            avg_win_pnl: avg(&wins),
            avg_loss_pnl: avg(&losses),
            profit_factor,
        })
    }

    /// Per trigger-component win rates over decided (WON/LOST) trades.
    pub fn get_component_performance(&self) -> Result<Vec<ComponentPerformance>> {
        let completed = self.get_completed_signals(10_000)?;
        let mut stats: std::collections::BTreeMap<String, (usize, usize)> =
            std::collections::BTreeMap::new();
        for sig in completed
            .iter()
            .filter(|s| matches!(s.status, SignalStatus::Won | SignalStatus::Lost))
        {
            for component in &sig.components {
                let entry = stats.entry(component.clone()).or_insert((0, 0));
                entry.0 += 1;
                if sig.status == SignalStatus::Won {
                    entry.1 += 1;
                }
            }
        }
        Ok(stats
            .into_iter()
            .map(|(component, (trades, wins))| ComponentPerformance {
                component,
                trades,
                wins,
                win_rate: if trades > 0 { wins as f64 / trades as f64 * 100.0 } else { 0.0 },
            })
            .collect())
    }

    /// Win rate split by the persisted HTF bias.
    pub fn get_htf_bias_accuracy(&self) -> Result<Vec<ComponentPerformance>> {
        let completed = self.get_completed_signals(10_000)?;
        let mut stats: std::collections::BTreeMap<String, (usize, usize)> =
            std::collections::BTreeMap::new();
        for sig in completed
            .iter()
            .filter(|s| matches!(s.status, SignalStatus::Won | SignalStatus::Lost))
        {
            let bias = sig.htf_bias.clone().unwrap_or_else(|| "UNKNOWN".to_string());
            let entry = stats.entry(bias).or_insert((0, 0));
            entry.0 += 1;
            if sig.status == SignalStatus::Won {
                entry.1 += 1;
            }
        }
        Ok(stats
            .into_iter()
            .map(|(component, (trades, wins))| ComponentPerformance {
                component,
                trades,
                wins,
                win_rate: if trades > 0 { wins as f64 / trades as f64 * 100.0 } else { 0.0 },
            })
            .collect())
    }

    /// The most recent losing trades with their holding durations.
    pub fn get_loss_analysis(&self, n: usize) -> Result<Vec<LossRecord>> {
        let losses = self.query_signals(
            "SELECT * FROM signals WHERE status = 'LOST' ORDER BY close_time DESC LIMIT ?1",
            params![n as i64],
        )?;
        Ok(losses
            .into_iter()
            .map(|s| LossRecord {
                duration_minutes: s
                    .close_time
                    .map(|ct| (ct - s.entry_time).num_minutes())
                    .unwrap_or(0),
                pnl_pct: s.pnl_pct.unwrap_or(0.0),
                symbol: s.symbol,
                components: s.components,
            })
            .collect())
    }

    pub fn add_optimization_log(&self, entry: &OptimizationLogEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO optimization_log (param_name, old_value, new_value, reason,
                                           wr_before, wr_after, trades_analyzed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.param_name,
                entry.old_value,
                entry.new_value,
                entry.reason,
                entry.wr_before,
                entry.wr_after,
                entry.trades_analyzed,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("failed to append optimization log")?;
        Ok(())
    }

    pub fn get_optimization_logs(&self, n: usize) -> Result<Vec<OptimizationLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT param_name, old_value, new_value, reason, wr_before, wr_after,
                        trades_analyzed
                 FROM optimization_log ORDER BY id DESC LIMIT ?1",
            )
            .context("failed to prepare optimization log query")?;
        let rows = stmt
            .query_map(params![n as i64], |r| {
                Ok(OptimizationLogEntry {
                    param_name: r.get(0)?,
                    old_value: r.get(1)?,
                    new_value: r.get(2)?,
                    reason: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    wr_before: r.get(4)?,
                    wr_after: r.get(5)?,
                    trades_analyzed: r.get::<_, Option<i64>>(6)?.map(|v| v as u32),
                })
            })
            .context("failed to run optimization log query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to map optimization log row")?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Meta (small key/value stash, e.g. the optimiser rollback target)
    // -------------------------------------------------------------------------

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| r.get(0))
            .optional()
            .context("failed to read meta")
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )
        .context("failed to write meta")?;
        Ok(())
    }

    pub fn meta_delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM meta WHERE key = ?1", params![key])
            .context("failed to delete meta")?;
        Ok(())
    }
}

// =============================================================================
// Row mappers
// =============================================================================

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<SignalRecord> {
    let direction_raw: String = row.get("direction")?;
    let status_raw: String = row.get("status")?;
    let components_raw: String = row.get("components")?;
    let entry_time_raw: String = row.get("entry_time")?;
    let close_time_raw: Option<String> = row.get("close_time")?;

    Ok(SignalRecord {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        direction: Direction::parse(&direction_raw).unwrap_or(Direction::Long),
        entry_price: row.get("entry_price")?,
        stop_loss: row.get("stop_loss")?,
        take_profit: row.get("take_profit")?,
        status: SignalStatus::parse(&status_raw).unwrap_or(SignalStatus::Cancelled),
        entry_mode: row.get("entry_mode")?,
        components: serde_json::from_str(&components_raw).unwrap_or_default(),
        htf_bias: row.get("htf_bias")?,
        rr_ratio: row.get("rr_ratio")?,
        timeframe: row.get("timeframe")?,
        entry_time: parse_ts(&entry_time_raw).unwrap_or_else(Utc::now),
        close_time: close_time_raw.as_deref().and_then(parse_ts),
        close_price: row.get("close_price")?,
        pnl_pct: row.get("pnl_pct")?,
        notes: row.get("notes")?,
    })
}

fn watch_from_row(row: &Row<'_>) -> rusqlite::Result<WatchRecord> {
    let direction_raw: String = row.get("direction")?;
    let status_raw: String = row.get("status")?;
    Ok(WatchRecord {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        direction: Direction::parse(&direction_raw).unwrap_or(Direction::Long),
        potential_entry: row.get("potential_entry")?,
        potential_sl: row.get("potential_sl")?,
        potential_tp: row.get("potential_tp")?,
        watch_reason: row.get("watch_reason")?,
        candles_watched: row.get::<_, i64>("candles_watched")? as u32,
        max_watch_candles: row.get::<_, i64>("max_watch_candles")? as u32,
        last_5m_candle_ts: row.get("last_5m_candle_ts")?,
        status: WatchStatus::parse(&status_raw).unwrap_or(WatchStatus::Expired),
        expire_reason: row.get("expire_reason")?,
        context: row.get("context")?,
    })
}
