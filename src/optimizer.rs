// =============================================================================
// Self-Optimiser — target-driven bounded tuning of detection thresholds
// =============================================================================
//
// Every cycle reads the realized WON/LOST population, attributes blame to the
// trigger components, and proposes small bounded parameter adjustments. A
// rollback guard reverts the previous cycle's changes when the win rate
// regresses, and an emergency mode tightens the entry filters hard when the
// engine is only losing.
//
// The optimiser is the Parameter Store's only writer; everything it commits
// is clamped to the registry bounds and appended to the optimisation log.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{Database, OptimizationLogEntry, SignalRecord};
use crate::params::{spec_for, ParamSpec, ParamStore};
use crate::types::SignalStatus;

/// Win-rate target the whole tuning loop steers toward (percent).
pub const TARGET_WIN_RATE: f64 = 55.0;

/// Base step as a fraction of the current value.
const LEARNING_RATE: f64 = 0.10;

/// Hard cap on a single change as a fraction of the current value.
const MAX_PARAM_CHANGE_PCT: f64 = 0.15;

/// Changes committed per cycle, total and per parameter group.
const MAX_CHANGES_PER_CYCLE: usize = 4;
const MAX_CHANGES_PER_GROUP: usize = 2;

/// Terminal trades required before the optimiser acts at all.
const MIN_TRADES_FOR_OPTIMIZATION: usize = 20;

/// Proposals moving a parameter by less than this fraction are noise.
const NOISE_FLOOR: f64 = 0.01;

/// Rollback: win-rate drop (points) and new-trade count that trigger it.
const ROLLBACK_WR_DROP: f64 = 3.0;
const ROLLBACK_MIN_NEW_TRADES: usize = 2;

/// Emergency mode: losses required alongside a zero win rate.
const EMERGENCY_MIN_LOSSES: usize = 3;

/// Losses closing faster than this count as "quick losses".
const QUICK_LOSS_MINUTES: i64 = 30;

/// Component samples required before its gap generates pressure.
const MIN_COMPONENT_TRADES: usize = 3;

/// Meta key holding the rollback target between cycles.
const ROLLBACK_STASH_KEY: &str = "optimizer_rollback";

// =============================================================================
// Pool statistics
// =============================================================================

/// Realized-outcome statistics the cycle reasons over.
#[derive(Debug, Clone)]
pub struct TradePool {
    pub terminal: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win_pnl: f64,
    pub avg_loss_pnl: f64,
    pub realized_rr: f64,
    pub quick_loss_ratio: f64,
    /// (session, decided, wins) for Asia / London / NewYork / Off.
    pub sessions: Vec<(String, usize, usize)>,
}

fn session_of(hour: u32) -> &'static str {
    match hour {
        0..=6 => "Asia",
        7..=12 => "London",
        13..=20 => "NewYork",
        _ => "Off",
    }
}

fn build_pool(completed: &[SignalRecord]) -> TradePool {
    let decided: Vec<&SignalRecord> = completed
        .iter()
        .filter(|s| matches!(s.status, SignalStatus::Won | SignalStatus::Lost))
        .collect();
    let wins: Vec<&SignalRecord> =
        decided.iter().copied().filter(|s| s.status == SignalStatus::Won).collect();
    let losses: Vec<&SignalRecord> =
        decided.iter().copied().filter(|s| s.status == SignalStatus::Lost).collect();

    let win_rate = if decided.is_empty() {
        0.0
    } else {
        wins.len() as f64 / decided.len() as f64 * 100.0
    };
    let avg = |set: &[&SignalRecord]| {
        if set.is_empty() {
            0.0
        } else {
            set.iter().filter_map(|s| s.pnl_pct).sum::<f64>() / set.len() as f64
        }
    };
    let avg_win_pnl = avg(&wins);
    let avg_loss_pnl = avg(&losses);
    let realized_rr = if avg_loss_pnl.abs() > 1e-9 {
        avg_win_pnl / avg_loss_pnl.abs()
    } else {
        0.0
    };

    let quick_losses = losses
        .iter()
        .filter(|s| {
            s.close_time
                .map(|ct| (ct - s.entry_time).num_minutes() < QUICK_LOSS_MINUTES)
                .unwrap_or(false)
        })
        .count();
    let quick_loss_ratio = if losses.is_empty() {
        0.0
    } else {
        quick_losses as f64 / losses.len() as f64
    };

    let mut sessions: HashMap<&'static str, (usize, usize)> = HashMap::new();
    for s in &decided {
        let slot = sessions.entry(session_of(s.entry_time.hour())).or_insert((0, 0));
        slot.0 += 1;
        if s.status == SignalStatus::Won {
            slot.1 += 1;
        }
    }

    TradePool {
        terminal: completed.len(),
        wins: wins.len(),
        losses: losses.len(),
        win_rate,
        avg_win_pnl,
        avg_loss_pnl,
        realized_rr,
        quick_loss_ratio,
        sessions: sessions
            .into_iter()
            .map(|(k, (d, w))| (k.to_string(), d, w))
            .collect(),
    }
}

// =============================================================================
// Component -> parameter mapping
// =============================================================================

fn component_params(tag: &str) -> &'static [&'static str] {
    match tag {
        "SWEEP_REJECTION" => {
            &["liquidity_equal_tolerance", "swing_lookback", "displacement_min_body_ratio"]
        }
        "MSS" => &["bos_min_displacement", "ob_body_ratio_min", "swing_lookback"],
        "DISPLACEMENT" => &[
            "displacement_min_body_ratio",
            "displacement_atr_multiplier",
            "displacement_min_size_pct",
        ],
        "HTF_BIAS" => &["bos_min_displacement", "swing_lookback"],
        "POI_ZONE" => &[
            "poi_max_distance_pct",
            "ob_max_age_candles",
            "fvg_max_age_candles",
            "fvg_min_size_pct",
        ],
        _ => &[],
    }
}

/// Sign of a *tightening* move for each parameter: +1 raises the threshold,
/// -1 lowers the allowance.
fn tighten_sign(name: &str) -> f64 {
    match name {
        "ob_max_age_candles" | "fvg_max_age_candles" | "liquidity_equal_tolerance"
        | "poi_max_distance_pct" => -1.0,
        _ => 1.0,
    }
}

// =============================================================================
// Rollback stash
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StashChange {
    name: String,
    old_value: f64,
    new_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RollbackStash {
    wr_before: f64,
    terminal_count: usize,
    changes: Vec<StashChange>,
}

// =============================================================================
// Proposals
// =============================================================================

#[derive(Debug, Clone)]
struct Proposal {
    name: &'static str,
    group: String,
    score: f64,
    old_value: f64,
    new_value: f64,
    rationale: String,
}

/// Step a parameter by the bounded learning rule. `None` when the resulting
/// change is noise (including being pinned at a bound).
fn bounded_step(spec: &ParamSpec, current: f64, sign: f64, intensity: f64) -> Option<f64> {
    if current.abs() < 1e-12 {
        return None;
    }
    let mut delta = current * LEARNING_RATE * intensity * sign;
    let cap = MAX_PARAM_CHANGE_PCT * current.abs();
    delta = delta.clamp(-cap, cap);

    let mut new_value = (current + delta).clamp(spec.min, spec.max);
    if spec.integer {
        new_value = new_value.round();
    }

    if ((new_value - current) / current).abs() < NOISE_FLOOR {
        return None;
    }
    Some(new_value)
}

fn intensity_for(win_rate: f64) -> f64 {
    let gap = TARGET_WIN_RATE - win_rate;
    if gap <= 0.0 {
        0.5
    } else if gap <= 5.0 {
        1.0
    } else if gap <= 10.0 {
        1.5
    } else {
        2.0
    }
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerOutcome {
    Skipped(String),
    RolledBack(usize),
    Emergency(usize),
    Applied(usize),
    NoChange,
}

// =============================================================================
// SelfOptimizer
// =============================================================================

pub struct SelfOptimizer {
    db: Arc<Database>,
    params: Arc<ParamStore>,
}

impl SelfOptimizer {
    pub fn new(db: Arc<Database>, params: Arc<ParamStore>) -> Self {
        Self { db, params }
    }

    /// One optimisation cycle. Never propagates a single proposal's failure
    /// into the others.
    pub fn run_cycle(&self) -> Result<OptimizerOutcome> {
        // 1. Minimum population.
        let completed = self.db.get_completed_signals(10_000)?;
        if completed.len() < MIN_TRADES_FOR_OPTIMIZATION {
            info!(
                terminal = completed.len(),
                required = MIN_TRADES_FOR_OPTIMIZATION,
                "optimisation skipped, not enough trades"
            );
            return Ok(OptimizerOutcome::Skipped(format!(
                "{} of {} trades",
                completed.len(),
                MIN_TRADES_FOR_OPTIMIZATION
            )));
        }

        // 2. Pool statistics.
        let pool = build_pool(&completed);
        info!(
            terminal = pool.terminal,
            wins = pool.wins,
            losses = pool.losses,
            win_rate = format!("{:.1}", pool.win_rate),
            avg_win = format!("{:.2}", pool.avg_win_pnl),
            avg_loss = format!("{:.2}", pool.avg_loss_pnl),
            realized_rr = format!("{:.2}", pool.realized_rr),
            quick_loss_ratio = format!("{:.2}", pool.quick_loss_ratio),
            sessions = ?pool.sessions,
            "trade pool built"
        );

        // 3. Rollback guard.
        if let Some(outcome) = self.check_rollback(&pool)? {
            return Ok(outcome);
        }

        // 4. Emergency mode.
        if pool.win_rate == 0.0 && pool.losses >= EMERGENCY_MIN_LOSSES {
            return Ok(OptimizerOutcome::Emergency(self.run_emergency(&pool)?));
        }

        // 5-7. Candidate generation.
        let proposals = self.generate_proposals(&pool)?;
        if proposals.is_empty() {
            return Ok(OptimizerOutcome::NoChange);
        }

        // 8. Selection: priority order, capped per cycle and per group.
        let mut selected: Vec<&Proposal> = Vec::new();
        let mut per_group: HashMap<&str, usize> = HashMap::new();
        for p in &proposals {
            if selected.len() >= MAX_CHANGES_PER_CYCLE {
                break;
            }
            let used = per_group.entry(p.group.as_str()).or_insert(0);
            if *used >= MAX_CHANGES_PER_GROUP {
                continue;
            }
            if selected.iter().any(|s| s.name == p.name) {
                continue;
            }
            *used += 1;
            selected.push(p);
        }
        if selected.is_empty() {
            return Ok(OptimizerOutcome::NoChange);
        }

        // 9. Commit + log + stash.
        let mut committed = Vec::new();
        for p in &selected {
            if !self.params.set(p.name, p.new_value) {
                warn!(param = p.name, value = p.new_value, "proposal refused by store");
                continue;
            }
            self.db.add_optimization_log(&OptimizationLogEntry {
                param_name: p.name.to_string(),
                old_value: p.old_value,
                new_value: p.new_value,
                reason: p.rationale.clone(),
                wr_before: Some(pool.win_rate),
                wr_after: None,
                trades_analyzed: Some(pool.terminal as u32),
            })?;
            info!(
                param = p.name,
                old = p.old_value,
                new = p.new_value,
                score = format!("{:.1}", p.score),
                reason = %p.rationale,
                "parameter updated"
            );
            committed.push(StashChange {
                name: p.name.to_string(),
                old_value: p.old_value,
                new_value: p.new_value,
            });
        }

        if committed.is_empty() {
            return Ok(OptimizerOutcome::NoChange);
        }
        let applied = committed.len();
        let stash = RollbackStash {
            wr_before: pool.win_rate,
            terminal_count: pool.terminal,
            changes: committed,
        };
        self.db.meta_set(ROLLBACK_STASH_KEY, &serde_json::to_string(&stash)?)?;
        Ok(OptimizerOutcome::Applied(applied))
    }

    /// Revert the previous cycle's changes when the win rate regressed.
    fn check_rollback(&self, pool: &TradePool) -> Result<Option<OptimizerOutcome>> {
        let Some(raw) = self.db.meta_get(ROLLBACK_STASH_KEY)? else {
            return Ok(None);
        };
        let stash: RollbackStash = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "rollback stash unparsable, clearing");
                self.db.meta_delete(ROLLBACK_STASH_KEY)?;
                return Ok(None);
            }
        };

        let new_trades = pool.terminal.saturating_sub(stash.terminal_count);
        if new_trades < ROLLBACK_MIN_NEW_TRADES {
            return Ok(None);
        }
        if stash.wr_before - pool.win_rate < ROLLBACK_WR_DROP {
            // Survived its observation window.
            self.db.meta_delete(ROLLBACK_STASH_KEY)?;
            return Ok(None);
        }

        warn!(
            wr_before = stash.wr_before,
            wr_now = pool.win_rate,
            new_trades,
            changes = stash.changes.len(),
            "win rate regressed, rolling back previous cycle"
        );
        let mut reverted = 0;
        for change in &stash.changes {
            if self.params.set(&change.name, change.old_value) {
                reverted += 1;
            }
            self.db.add_optimization_log(&OptimizationLogEntry {
                param_name: change.name.clone(),
                old_value: change.new_value,
                new_value: change.old_value,
                reason: format!(
                    "ROLLBACK: wr {:.1} -> {:.1} over {} trades",
                    stash.wr_before, pool.win_rate, new_trades
                ),
                wr_before: Some(stash.wr_before),
                wr_after: Some(pool.win_rate),
                trades_analyzed: Some(pool.terminal as u32),
            })?;
        }
        self.db.meta_delete(ROLLBACK_STASH_KEY)?;
        Ok(Some(OptimizerOutcome::RolledBack(reverted)))
    }

    /// Aggressive tightening when the engine is only losing.
    fn run_emergency(&self, pool: &TradePool) -> Result<usize> {
        warn!(losses = pool.losses, "emergency mode: zero win rate, tightening filters");
        let adjustments: [(&str, f64); 3] = [
            ("displacement_min_body_ratio", 1.08),
            ("fvg_min_size_pct", 1.10),
            ("default_sl_pct", 1.06),
        ];
        let mut applied = 0;
        for (name, factor) in adjustments {
            let Some(spec) = spec_for(name) else { continue };
            let Some(current) = self.params.get(name) else { continue };
            let new_value = (current * factor).clamp(spec.min, spec.max);
            if ((new_value - current) / current).abs() < NOISE_FLOOR {
                continue;
            }
            if self.params.set(name, new_value) {
                applied += 1;
                self.db.add_optimization_log(&OptimizationLogEntry {
                    param_name: name.to_string(),
                    old_value: current,
                    new_value,
                    reason: format!("EMERGENCY: 0% win rate over {} losses", pool.losses),
                    wr_before: Some(pool.win_rate),
                    wr_after: None,
                    trades_analyzed: Some(pool.terminal as u32),
                })?;
            }
        }
        Ok(applied)
    }

    /// Steps 5-7: component-priority scoring and bounded candidates, sorted
    /// by priority descending.
    fn generate_proposals(&self, pool: &TradePool) -> Result<Vec<Proposal>> {
        let component_stats = self.db.get_component_performance()?;
        let intensity = intensity_for(pool.win_rate);

        // Accumulate per-parameter pressure from underperforming components.
        struct Pressure {
            score: f64,
            group: String,
            worst_gap: f64,
        }
        let mut pressure: HashMap<&'static str, Pressure> = HashMap::new();

        for stat in &component_stats {
            if stat.trades < MIN_COMPONENT_TRADES || stat.win_rate >= TARGET_WIN_RATE {
                continue;
            }
            let gap = TARGET_WIN_RATE - stat.win_rate;
            for &name in component_params(&stat.component) {
                let entry = pressure.entry(name).or_insert_with(|| Pressure {
                    score: 0.0,
                    group: stat.component.clone(),
                    worst_gap: 0.0,
                });
                entry.score += gap;
                if gap > entry.worst_gap {
                    entry.worst_gap = gap;
                    entry.group = stat.component.clone();
                }
            }
        }

        // Risk parameters always carry a baseline score.
        let risk_baseline = 0.5 * (TARGET_WIN_RATE - pool.win_rate);
        if risk_baseline > 0.0 {
            for name in ["default_sl_pct", "min_rr_ratio"] {
                let entry = pressure.entry(name).or_insert_with(|| Pressure {
                    score: 0.0,
                    group: "RISK".to_string(),
                    worst_gap: 0.0,
                });
                entry.score += risk_baseline;
            }
        }

        let mut proposals = Vec::new();
        for (name, p) in pressure {
            let Some(spec) = spec_for(name) else { continue };
            let Some(current) = self.params.get(name) else { continue };

            // Default tightening direction, except the stop width which is
            // steered by the quick-loss diagnostic: stops that die inside 30
            // minutes are too tight and get widened.
            let sign = if name == "default_sl_pct" {
                if pool.quick_loss_ratio >= 0.4 { 1.0 } else { -1.0 }
            } else {
                tighten_sign(name)
            };

            let Some(new_value) = bounded_step(spec, current, sign, intensity) else {
                continue;
            };
            let rationale = if p.group == "RISK" {
                format!(
                    "risk baseline: wr {:.1} vs target {:.1}, rr {:.2}, quick losses {:.0}%",
                    pool.win_rate,
                    TARGET_WIN_RATE,
                    pool.realized_rr,
                    pool.quick_loss_ratio * 100.0
                )
            } else {
                format!(
                    "tighten for {}: component wr gap {:.1} pts (pool wr {:.1})",
                    p.group, p.worst_gap, pool.win_rate
                )
            };
            proposals.push(Proposal {
                name,
                group: p.group.clone(),
                score: p.score,
                old_value: current,
                new_value,
                rationale,
            });
        }

        proposals.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(proposals)
    }
}
