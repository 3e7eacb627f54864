// =============================================================================
// Settings — policy configuration with atomic save
// =============================================================================
//
// Every non-optimised knob lives here: portfolio risk caps, SL distance
// policy, cadences, and operational paths. Optimiser-tunable detection
// thresholds live in the Parameter Store instead (params.rs).
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older settings file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_max_concurrent_trades() -> u32 {
    3
}

fn default_max_same_direction_trades() -> u32 {
    2
}

fn default_signal_cooldown_minutes() -> i64 {
    30
}

fn default_min_sl_distance_pct() -> f64 {
    0.003
}

fn default_max_sl_distance_pct() -> f64 {
    0.025
}

fn default_max_trade_duration_hours() -> i64 {
    8
}

fn default_max_watch_candles() -> u32 {
    12
}

fn default_scan_interval_secs() -> u64 {
    180
}

fn default_trade_check_interval_secs() -> u64 {
    5
}

fn default_watch_check_interval_secs() -> u64 {
    60
}

fn default_optimize_interval_secs() -> u64 {
    1800
}

fn default_universe_size() -> usize {
    100
}

fn default_db_path() -> String {
    "sentinel.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level policy configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // --- Symbols ------------------------------------------------------------
    /// Explicit symbol list. Empty means "discover the perp universe from the
    /// exchange at startup" (capped at `universe_size`).
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Maximum number of symbols pulled from exchange-info discovery.
    #[serde(default = "default_universe_size")]
    pub universe_size: usize,

    // --- Portfolio risk gates ----------------------------------------------
    /// Maximum number of concurrent ACTIVE signals.
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: u32,

    /// Maximum ACTIVE signals sharing one direction.
    #[serde(default = "default_max_same_direction_trades")]
    pub max_same_direction_trades: u32,

    /// Minimum minutes since a symbol's last terminal close before it may
    /// open again.
    #[serde(default = "default_signal_cooldown_minutes")]
    pub signal_cooldown_minutes: i64,

    // --- SL distance policy --------------------------------------------------
    /// Floor for |entry - sl| / entry on a new signal.
    #[serde(default = "default_min_sl_distance_pct")]
    pub min_sl_distance_pct: f64,

    /// Ceiling for |entry - sl| / entry on a new signal.
    #[serde(default = "default_max_sl_distance_pct")]
    pub max_sl_distance_pct: f64,

    /// Business timeout: trades older than this are closed at market.
    #[serde(default = "default_max_trade_duration_hours")]
    pub max_trade_duration_hours: i64,

    /// Watchlist timeout in 5m candles (12 = one hour).
    #[serde(default = "default_max_watch_candles")]
    pub max_watch_candles: u32,

    // --- Cadences ------------------------------------------------------------
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_trade_check_interval_secs")]
    pub trade_check_interval_secs: u64,

    #[serde(default = "default_watch_check_interval_secs")]
    pub watch_check_interval_secs: u64,

    #[serde(default = "default_optimize_interval_secs")]
    pub optimize_interval_secs: u64,

    // --- Operational ---------------------------------------------------------
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            universe_size: default_universe_size(),
            max_concurrent_trades: default_max_concurrent_trades(),
            max_same_direction_trades: default_max_same_direction_trades(),
            signal_cooldown_minutes: default_signal_cooldown_minutes(),
            min_sl_distance_pct: default_min_sl_distance_pct(),
            max_sl_distance_pct: default_max_sl_distance_pct(),
            max_trade_duration_hours: default_max_trade_duration_hours(),
            max_watch_candles: default_max_watch_candles(),
            scan_interval_secs: default_scan_interval_secs(),
            trade_check_interval_secs: default_trade_check_interval_secs(),
            watch_check_interval_secs: default_watch_check_interval_secs(),
            optimize_interval_secs: default_optimize_interval_secs(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = settings.symbols.len(),
            scan_interval_secs = settings.scan_interval_secs,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the current settings to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }
}
