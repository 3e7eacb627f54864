// =============================================================================
// Parameter Store — durable tunables with defaults, bounds, and clamped writes
// =============================================================================
//
// The optimiser is the only writer; every scan/watch/trade tick reads one
// consistent `EngineParams` snapshot at the start of its iteration and never
// re-reads mid-iteration. Values live in the `bot_params` table; anything the
// table does not hold falls back to the registry default.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::db::Database;

/// Static description of one tunable parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    /// Integer-typed parameters are coerced with `round()` on read and write.
    pub integer: bool,
}

/// The optimiser-tunable parameter registry. Names, defaults, and bounds are
/// the engine's contract with the optimiser; policy knobs live in `Settings`.
pub const TUNABLE_PARAMS: &[ParamSpec] = &[
    ParamSpec { name: "swing_lookback", default: 5.0, min: 3.0, max: 8.0, integer: true },
    ParamSpec { name: "bos_min_displacement", default: 0.003, min: 0.001, max: 0.006, integer: false },
    ParamSpec { name: "ob_body_ratio_min", default: 0.40, min: 0.25, max: 0.65, integer: false },
    ParamSpec { name: "ob_max_age_candles", default: 30.0, min: 15.0, max: 50.0, integer: true },
    ParamSpec { name: "fvg_min_size_pct", default: 0.001, min: 0.0003, max: 0.004, integer: false },
    ParamSpec { name: "fvg_max_age_candles", default: 20.0, min: 10.0, max: 40.0, integer: true },
    ParamSpec { name: "liquidity_equal_tolerance", default: 0.001, min: 0.0003, max: 0.003, integer: false },
    ParamSpec { name: "displacement_min_body_ratio", default: 0.55, min: 0.40, max: 0.75, integer: false },
    ParamSpec { name: "displacement_min_size_pct", default: 0.006, min: 0.002, max: 0.010, integer: false },
    ParamSpec { name: "displacement_atr_multiplier", default: 1.5, min: 1.0, max: 2.5, integer: false },
    ParamSpec { name: "poi_max_distance_pct", default: 0.010, min: 0.005, max: 0.020, integer: false },
    ParamSpec { name: "min_rr_ratio", default: 2.0, min: 1.2, max: 3.0, integer: false },
    ParamSpec { name: "default_sl_pct", default: 0.020, min: 0.008, max: 0.025, integer: false },
];

/// Look up a spec by name.
pub fn spec_for(name: &str) -> Option<&'static ParamSpec> {
    TUNABLE_PARAMS.iter().find(|s| s.name == name)
}

/// One consistent snapshot of every tunable plus the policy knobs the
/// detection pipeline needs. Cheap to clone, owned by a single tick.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub swing_lookback: usize,
    pub bos_min_displacement: f64,
    pub ob_body_ratio_min: f64,
    pub ob_max_age_candles: usize,
    pub fvg_min_size_pct: f64,
    pub fvg_max_age_candles: usize,
    pub liquidity_equal_tolerance: f64,
    pub displacement_min_body_ratio: f64,
    pub displacement_min_size_pct: f64,
    pub displacement_atr_multiplier: f64,
    pub poi_max_distance_pct: f64,
    pub min_rr_ratio: f64,
    pub default_sl_pct: f64,
    // Policy (non-optimised), copied from Settings at snapshot time.
    pub min_sl_distance_pct: f64,
    pub max_sl_distance_pct: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        let get = |name: &str| spec_for(name).expect("registry entry").default;
        Self {
            swing_lookback: get("swing_lookback") as usize,
            bos_min_displacement: get("bos_min_displacement"),
            ob_body_ratio_min: get("ob_body_ratio_min"),
            ob_max_age_candles: get("ob_max_age_candles") as usize,
            fvg_min_size_pct: get("fvg_min_size_pct"),
            fvg_max_age_candles: get("fvg_max_age_candles") as usize,
            liquidity_equal_tolerance: get("liquidity_equal_tolerance"),
            displacement_min_body_ratio: get("displacement_min_body_ratio"),
            displacement_min_size_pct: get("displacement_min_size_pct"),
            displacement_atr_multiplier: get("displacement_atr_multiplier"),
            poi_max_distance_pct: get("poi_max_distance_pct"),
            min_rr_ratio: get("min_rr_ratio"),
            default_sl_pct: get("default_sl_pct"),
            min_sl_distance_pct: 0.003,
            max_sl_distance_pct: 0.025,
        }
    }
}

/// Durable parameter store backed by the `bot_params` table.
pub struct ParamStore {
    db: Arc<Database>,
}

impl ParamStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Read one parameter, falling back to the registry default. Unknown
    /// names return `None`.
    pub fn get(&self, name: &str) -> Option<f64> {
        let spec = spec_for(name)?;
        let raw = self
            .db
            .get_bot_param(name)
            .unwrap_or_else(|e| {
                warn!(param = name, error = %e, "param read failed, using default");
                None
            })
            .unwrap_or(spec.default);
        Some(if spec.integer { raw.round() } else { raw })
    }

    /// Write one parameter. Values outside the registry bounds are refused
    /// (logged, store untouched). Integer-typed values are rounded first.
    pub fn set(&self, name: &str, value: f64) -> bool {
        let Some(spec) = spec_for(name) else {
            warn!(param = name, "refusing write: unknown parameter");
            return false;
        };
        let value = if spec.integer { value.round() } else { value };
        if value < spec.min || value > spec.max {
            warn!(
                param = name,
                value,
                min = spec.min,
                max = spec.max,
                "refusing write: value outside bounds"
            );
            return false;
        }
        if let Err(e) = self.db.save_bot_param(name, value, spec.default) {
            warn!(param = name, error = %e, "param write failed");
            return false;
        }
        true
    }

    /// Reset any stored value outside its bounds to the registry default.
    /// Runs once at startup; this is the escape hatch from a corrupted or
    /// death-spiralled parameter set.
    pub fn enforce_bounds_on_startup(&self) -> usize {
        let mut reset = 0;
        for spec in TUNABLE_PARAMS {
            let stored = match self.db.get_bot_param(spec.name) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(param = spec.name, error = %e, "param read failed during bounds check");
                    continue;
                }
            };
            if stored < spec.min || stored > spec.max {
                warn!(
                    param = spec.name,
                    stored,
                    default = spec.default,
                    "stored value outside bounds, resetting to default"
                );
                if self.db.save_bot_param(spec.name, spec.default, spec.default).is_ok() {
                    reset += 1;
                }
            }
        }
        if reset > 0 {
            info!(reset, "out-of-bounds parameters reset to defaults");
        }
        reset
    }

    /// Materialise one consistent snapshot for a tick.
    pub fn snapshot(&self, settings: &Settings) -> EngineParams {
        let f = |name: &str| self.get(name).expect("registry name");
        EngineParams {
            swing_lookback: f("swing_lookback") as usize,
            bos_min_displacement: f("bos_min_displacement"),
            ob_body_ratio_min: f("ob_body_ratio_min"),
            ob_max_age_candles: f("ob_max_age_candles") as usize,
            fvg_min_size_pct: f("fvg_min_size_pct"),
            fvg_max_age_candles: f("fvg_max_age_candles") as usize,
            liquidity_equal_tolerance: f("liquidity_equal_tolerance"),
            displacement_min_body_ratio: f("displacement_min_body_ratio"),
            displacement_min_size_pct: f("displacement_min_size_pct"),
            displacement_atr_multiplier: f("displacement_atr_multiplier"),
            poi_max_distance_pct: f("poi_max_distance_pct"),
            min_rr_ratio: f("min_rr_ratio"),
            default_sl_pct: f("default_sl_pct"),
            min_sl_distance_pct: settings.min_sl_distance_pct,
            max_sl_distance_pct: settings.max_sl_distance_pct,
        }
    }
}
