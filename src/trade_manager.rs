// =============================================================================
// Trade Lifecycle Manager — portfolio gates and the per-signal state machine
// =============================================================================
//
// Consumes engine emissions, enforces the portfolio risk invariants, opens
// MARKET signals, and drives every ACTIVE signal through the two-stage
// breakeven / trailing discipline until a terminal WON / LOST / CANCELLED.
//
// The in-memory trade-state map (breakeven flag, trailing level) is a cache:
// single-writer (the open-trade tick), rebuilt from persisted stop levels on
// restart, and never the source of truth — every effective-SL change is
// written back to the store before the tick continues.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{Database, NewSignal, SignalRecord};
use crate::engine::SignalSetup;
use crate::types::{Direction, SignalStatus};

/// Progress toward TP at which the stop moves to breakeven.
const BREAKEVEN_PROGRESS: f64 = 0.60;

/// Progress toward TP at which the trailing stop engages.
const TRAILING_PROGRESS: f64 = 0.75;

/// Breakeven offset past entry (0.2%).
const BREAKEVEN_OFFSET: f64 = 0.002;

/// Fraction of the favourable move the trailing stop locks in.
const TRAILING_LOCK_FRACTION: f64 = 0.50;

/// Worst-case slippage allowance below the SL-implied pnl, in pnl points.
const SLIPPAGE_ALLOWANCE_PCT: f64 = 0.5;

/// In-memory per-signal stop state.
#[derive(Debug, Clone, Default)]
pub struct TradeState {
    pub breakeven_moved: bool,
    pub trailing_sl: Option<f64>,
    /// Whether the "trailing enabled" marker has been logged already.
    trailing_logged: bool,
}

/// What one tick decided for one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeAdvance {
    /// Nothing changed.
    Hold,
    /// Effective stop moved; persist the new level.
    SlMoved(f64),
    /// Terminal transition.
    Close {
        status: SignalStatus,
        close_price: f64,
        pnl_pct: f64,
        note: String,
    },
}

pub struct TradeManager {
    db: Arc<Database>,
    state: RwLock<HashMap<i64, TradeState>>,
}

impl TradeManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            state: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Entry path
    // -------------------------------------------------------------------------

    /// Run the entry gates; `None` means all passed, otherwise the first
    /// failing gate's reason.
    pub fn check_entry_gates(
        &self,
        setup: &SignalSetup,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        if self.db.get_active_trade_count()? >= settings.max_concurrent_trades {
            return Ok(Some(format!(
                "concurrency cap reached ({})",
                settings.max_concurrent_trades
            )));
        }
        if self.db.has_active_for_symbol(&setup.symbol)? {
            return Ok(Some("symbol already has an active signal".to_string()));
        }
        if self.db.active_count_for_direction(setup.direction)?
            >= settings.max_same_direction_trades
        {
            return Ok(Some(format!(
                "same-direction cap reached ({})",
                settings.max_same_direction_trades
            )));
        }
        if let Some(closed_at) = self.db.last_terminal_close_time(&setup.symbol)? {
            let elapsed = now - closed_at;
            if elapsed < Duration::minutes(settings.signal_cooldown_minutes) {
                return Ok(Some(format!(
                    "cooldown active ({} of {} min elapsed)",
                    elapsed.num_minutes(),
                    settings.signal_cooldown_minutes
                )));
            }
        }
        if setup.entry <= 0.0 || setup.sl <= 0.0 || setup.tp <= 0.0 {
            return Ok(Some("zero entry/sl/tp level".to_string()));
        }
        let sl_dist = (setup.entry - setup.sl).abs() / setup.entry;
        if sl_dist < settings.min_sl_distance_pct || sl_dist > settings.max_sl_distance_pct {
            return Ok(Some(format!("sl distance {:.4} outside policy band", sl_dist)));
        }
        let ordered = match setup.direction {
            Direction::Long => setup.tp > setup.sl && setup.sl < setup.entry,
            Direction::Short => setup.tp < setup.sl && setup.sl > setup.entry,
        };
        if !ordered {
            return Ok(Some("tp/sl on the wrong side of entry".to_string()));
        }
        Ok(None)
    }

    /// Gate and persist a fired setup. Returns the new signal id, or `None`
    /// with the rejection logged.
    pub fn open_signal(
        &self,
        setup: &SignalSetup,
        settings: &Settings,
    ) -> Result<Option<i64>> {
        if let Some(reason) = self.check_entry_gates(setup, settings, Utc::now())? {
            info!(
                symbol = %setup.symbol,
                direction = %setup.direction,
                reason = %reason,
                "signal rejected by entry gate"
            );
            return Ok(None);
        }

        let id = self.db.add_signal(&NewSignal {
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            entry_price: setup.entry,
            stop_loss: setup.sl,
            take_profit: setup.tp,
            components: setup.components.clone(),
            htf_bias: setup.narrative.bias.as_str().to_string(),
            rr_ratio: setup.rr,
            timeframe: setup.timeframe.clone(),
            notes: Some(format!(
                "{} {} quality={}",
                setup.trigger_type, setup.timeframe, setup.quality
            )),
        })?;
        // The trade-state map stays untouched here: the open-trade tick is
        // its single writer and lazily creates default state on first sight.

        info!(
            id,
            symbol = %setup.symbol,
            direction = %setup.direction,
            entry = setup.entry,
            sl = setup.sl,
            tp = setup.tp,
            rr = setup.rr,
            trigger = %setup.trigger_type,
            quality = %setup.quality,
            "signal opened (MARKET)"
        );
        Ok(Some(id))
    }

    // -------------------------------------------------------------------------
    // Restart recovery
    // -------------------------------------------------------------------------

    /// Rebuild the in-memory stop state from persisted levels. A stop already
    /// at-or-past entry (with TP still beyond it) means breakeven was reached
    /// before the restart. Idempotent: performs no writes.
    pub fn recover_state(&self) -> Result<usize> {
        let active = self.db.get_active_signals()?;
        let mut state = self.state.write();
        state.clear();
        let mut recovered = 0;

        for sig in &active {
            let breakeven_moved = match sig.direction {
                Direction::Long => sig.stop_loss >= sig.entry_price && sig.take_profit > sig.entry_price,
                Direction::Short => sig.stop_loss <= sig.entry_price && sig.take_profit < sig.entry_price,
            };
            let trade_state = if breakeven_moved {
                recovered += 1;
                TradeState {
                    breakeven_moved: true,
                    trailing_sl: Some(sig.stop_loss),
                    trailing_logged: true,
                }
            } else {
                TradeState::default()
            };
            state.insert(sig.id, trade_state);
        }

        info!(
            active = active.len(),
            breakeven_recovered = recovered,
            "trade state rebuilt from persistence"
        );
        Ok(active.len())
    }

    // -------------------------------------------------------------------------
    // Tick path
    // -------------------------------------------------------------------------

    /// Advance every ACTIVE signal against the prices in `tickers`
    /// (symbol -> last price). Symbols missing a ticker are skipped this
    /// tick. Returns the number of terminal transitions.
    pub fn check_open_trades(
        &self,
        tickers: &HashMap<String, f64>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let active = self.db.get_active_signals()?;
        let mut closed = 0;

        for sig in &active {
            let Some(&price) = tickers.get(&sig.symbol) else {
                debug!(id = sig.id, symbol = %sig.symbol, "no ticker this tick, skipping");
                continue;
            };
            if price <= 0.0 {
                continue;
            }

            let mut trade_state = {
                let map = self.state.read();
                map.get(&sig.id).cloned().unwrap_or_default()
            };

            let advance = advance_trade(sig, &mut trade_state, price, now, settings);

            match advance {
                TradeAdvance::Hold => {
                    self.state.write().insert(sig.id, trade_state);
                }
                TradeAdvance::SlMoved(new_sl) => {
                    self.db.update_signal_sl(sig.id, new_sl)?;
                    self.state.write().insert(sig.id, trade_state);
                }
                TradeAdvance::Close { status, close_price, pnl_pct, note } => {
                    if self
                        .db
                        .update_signal_status(sig.id, status, close_price, pnl_pct, Some(&note))?
                    {
                        closed += 1;
                        info!(
                            id = sig.id,
                            symbol = %sig.symbol,
                            status = %status,
                            close_price,
                            pnl_pct,
                            note = %note,
                            "signal closed"
                        );
                    }
                    self.state.write().remove(&sig.id);
                }
            }
        }

        Ok(closed)
    }

    /// Snapshot of one signal's in-memory state (for the status API).
    pub fn trade_state(&self, id: i64) -> Option<TradeState> {
        self.state.read().get(&id).cloned()
    }
}

/// Pure single-signal tick: decides the transition without touching storage.
pub fn advance_trade(
    sig: &SignalRecord,
    state: &mut TradeState,
    price: f64,
    now: DateTime<Utc>,
    settings: &Settings,
) -> TradeAdvance {
    let entry = sig.entry_price;
    let is_long = sig.direction == Direction::Long;
    let dir_mult = if is_long { 1.0 } else { -1.0 };

    // 1. Business timeout.
    if now - sig.entry_time > Duration::hours(settings.max_trade_duration_hours) {
        let pnl = dir_mult * (price - entry) / entry * 100.0;
        let status = if pnl > 0.0 { SignalStatus::Won } else { SignalStatus::Lost };
        return TradeAdvance::Close {
            status,
            close_price: price,
            pnl_pct: pnl,
            note: format!("max duration {}h exceeded", settings.max_trade_duration_hours),
        };
    }

    // 2. Structural sanity: TP must stay on the profit side of SL.
    let tp_sl_ordered = if is_long {
        sig.take_profit > sig.stop_loss
    } else {
        sig.take_profit < sig.stop_loss
    };
    if !tp_sl_ordered {
        return TradeAdvance::Close {
            status: SignalStatus::Cancelled,
            close_price: price,
            pnl_pct: 0.0,
            note: "tp/sl inverted".to_string(),
        };
    }

    // 3. Pre-breakeven orientation check.
    if !state.breakeven_moved {
        let oriented = if is_long {
            sig.stop_loss < entry && sig.take_profit > entry
        } else {
            sig.stop_loss > entry && sig.take_profit < entry
        };
        if !oriented {
            return TradeAdvance::Close {
                status: SignalStatus::Cancelled,
                close_price: price,
                pnl_pct: 0.0,
                note: "sl/tp not oriented around entry".to_string(),
            };
        }
    }

    // 4. SL management.
    let tp_distance = sig.take_profit - entry;
    let progress = if tp_distance.abs() > 0.0 {
        (price - entry) / tp_distance
    } else {
        0.0
    };

    let mut sl_moved = false;

    if progress >= BREAKEVEN_PROGRESS && !state.breakeven_moved {
        state.breakeven_moved = true;
        sl_moved = true;
        debug!(id = sig.id, progress, "breakeven stop engaged");
    }
    if progress >= TRAILING_PROGRESS {
        let candidate = entry + TRAILING_LOCK_FRACTION * (price - entry);
        let improved = match state.trailing_sl {
            Some(current) => {
                if is_long {
                    candidate > current
                } else {
                    candidate < current
                }
            }
            None => true,
        };
        if improved {
            state.trailing_sl = Some(candidate);
            sl_moved = true;
            if !state.trailing_logged {
                state.trailing_logged = true;
                info!(id = sig.id, trailing_sl = candidate, "trailing stop enabled");
            }
        }
    }

    let effective_sl = effective_stop(sig, state);

    // 5. Terminal checks against effective SL and TP.
    let tp_hit = if is_long { price >= sig.take_profit } else { price <= sig.take_profit };
    if tp_hit {
        let pnl = dir_mult * (price - entry) / entry * 100.0;
        return TradeAdvance::Close {
            status: SignalStatus::Won,
            close_price: price,
            pnl_pct: pnl,
            note: "tp hit".to_string(),
        };
    }

    let sl_hit = if is_long { price <= effective_sl } else { price >= effective_sl };
    if sl_hit {
        let realized = dir_mult * (price - entry) / entry * 100.0;
        // 6. Slippage clamp: never report worse than the stop implied, minus
        // the allowance.
        let implied = dir_mult * (effective_sl - entry) / entry * 100.0;
        let pnl = realized.max(implied - SLIPPAGE_ALLOWANCE_PCT);
        let status = if pnl > 0.0 { SignalStatus::Won } else { SignalStatus::Lost };
        let note = if state.breakeven_moved { "protective stop hit" } else { "sl hit" };
        return TradeAdvance::Close {
            status,
            close_price: price,
            pnl_pct: pnl,
            note: note.to_string(),
        };
    }

    if sl_moved {
        let persisted = effective_stop(sig, state);
        if (persisted - sig.stop_loss).abs() > f64::EPSILON {
            return TradeAdvance::SlMoved(persisted);
        }
    }
    TradeAdvance::Hold
}

/// max(base, breakeven, trailing) for longs; min for shorts. The ratchet is
/// monotonic by construction: each component only ever tightens.
fn effective_stop(sig: &SignalRecord, state: &TradeState) -> f64 {
    let entry = sig.entry_price;
    let is_long = sig.direction == Direction::Long;
    let mut sl = sig.stop_loss;

    if state.breakeven_moved {
        let be = if is_long {
            entry * (1.0 + BREAKEVEN_OFFSET)
        } else {
            entry * (1.0 - BREAKEVEN_OFFSET)
        };
        sl = if is_long { sl.max(be) } else { sl.min(be) };
    }
    if let Some(trail) = state.trailing_sl {
        sl = if is_long { sl.max(trail) } else { sl.min(trail) };
    }
    sl
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn record(direction: Direction, entry: f64, sl: f64, tp: f64) -> SignalRecord {
        SignalRecord {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            direction,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            status: SignalStatus::Active,
            entry_mode: "MARKET".to_string(),
            components: vec!["MSS".to_string()],
            htf_bias: Some("LONG".to_string()),
            rr_ratio: Some(2.0),
            timeframe: Some("15m".to_string()),
            entry_time: Utc::now(),
            close_time: None,
            close_price: None,
            pnl_pct: None,
            notes: None,
        }
    }

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn breakeven_then_trailing_then_protected_win() {
        // Scenario: LONG entry=100 sl=99 tp=104.
        let sig = record(Direction::Long, 100.0, 99.0, 104.0);
        let mut state = TradeState::default();
        let now = Utc::now();

        // Price 102.4 -> progress 0.60: breakeven engages at 100.2.
        let adv = advance_trade(&sig, &mut state, 102.4, now, &settings());
        assert!(state.breakeven_moved);
        match adv {
            TradeAdvance::SlMoved(sl) => assert!((sl - 100.2).abs() < 1e-9),
            other => panic!("expected SlMoved, got {other:?}"),
        }

        // Price 103 -> progress 0.75: trailing locks 50% of the move = 101.5.
        let adv = advance_trade(&sig, &mut state, 103.0, now, &settings());
        match adv {
            TradeAdvance::SlMoved(sl) => assert!((sl - 101.5).abs() < 1e-9),
            other => panic!("expected SlMoved, got {other:?}"),
        }
        assert_eq!(state.trailing_sl, Some(101.5));

        // Price drops to 101.4: protective stop hit, WON with pnl ~ +1.4%.
        let adv = advance_trade(&sig, &mut state, 101.4, now, &settings());
        match adv {
            TradeAdvance::Close { status, pnl_pct, .. } => {
                assert_eq!(status, SignalStatus::Won);
                assert!((pnl_pct - 1.4).abs() < 1e-9);
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn trailing_never_loosens() {
        let sig = record(Direction::Long, 100.0, 99.0, 104.0);
        let mut state = TradeState::default();
        let now = Utc::now();

        advance_trade(&sig, &mut state, 103.6, now, &settings());
        let high_trail = state.trailing_sl.unwrap();
        assert!((high_trail - 101.8).abs() < 1e-9);

        // Price retreats but stays above the trail: the trail must not move.
        let adv = advance_trade(&sig, &mut state, 103.0, now, &settings());
        assert_eq!(state.trailing_sl, Some(high_trail));
        assert_eq!(adv, TradeAdvance::Hold);
    }

    #[test]
    fn plain_stop_loss_loses() {
        let sig = record(Direction::Long, 100.0, 99.0, 104.0);
        let mut state = TradeState::default();
        let adv = advance_trade(&sig, &mut state, 98.9, Utc::now(), &settings());
        match adv {
            TradeAdvance::Close { status, pnl_pct, .. } => {
                assert_eq!(status, SignalStatus::Lost);
                assert!(pnl_pct < 0.0);
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn slippage_clamp_floors_the_loss() {
        let sig = record(Direction::Long, 100.0, 99.0, 104.0);
        let mut state = TradeState::default();
        // Gap far through the stop: realized -5%, sl-implied -1%.
        let adv = advance_trade(&sig, &mut state, 95.0, Utc::now(), &settings());
        match adv {
            TradeAdvance::Close { pnl_pct, .. } => {
                assert!((pnl_pct - (-1.5)).abs() < 1e-9, "clamped to implied - 0.5, got {pnl_pct}");
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn take_profit_wins() {
        let sig = record(Direction::Long, 100.0, 99.0, 104.0);
        let mut state = TradeState::default();
        let adv = advance_trade(&sig, &mut state, 104.2, Utc::now(), &settings());
        match adv {
            TradeAdvance::Close { status, pnl_pct, .. } => {
                assert_eq!(status, SignalStatus::Won);
                assert!(pnl_pct > 4.0);
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn short_mirrors_the_discipline() {
        let sig = record(Direction::Short, 100.0, 101.0, 96.0);
        let mut state = TradeState::default();
        let now = Utc::now();

        // Price 97.6 -> progress 0.60 for the short.
        let adv = advance_trade(&sig, &mut state, 97.6, now, &settings());
        assert!(state.breakeven_moved);
        match adv {
            TradeAdvance::SlMoved(sl) => assert!((sl - 99.8).abs() < 1e-9),
            other => panic!("expected SlMoved, got {other:?}"),
        }

        // Price 97.0 -> progress 0.75: trail at 100 - 0.5*3 = 98.5.
        let adv = advance_trade(&sig, &mut state, 97.0, now, &settings());
        match adv {
            TradeAdvance::SlMoved(sl) => assert!((sl - 98.5).abs() < 1e-9),
            other => panic!("expected SlMoved, got {other:?}"),
        }

        // Bounce to 98.6: protective stop, WON.
        let adv = advance_trade(&sig, &mut state, 98.6, now, &settings());
        match adv {
            TradeAdvance::Close { status, .. } => assert_eq!(status, SignalStatus::Won),
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn inverted_tp_sl_cancels() {
        let sig = record(Direction::Long, 100.0, 104.0, 99.0); // tp < sl
        let mut state = TradeState::default();
        let adv = advance_trade(&sig, &mut state, 100.0, Utc::now(), &settings());
        match adv {
            TradeAdvance::Close { status, .. } => assert_eq!(status, SignalStatus::Cancelled),
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn stale_trade_times_out() {
        let mut sig = record(Direction::Long, 100.0, 99.0, 104.0);
        sig.entry_time = Utc::now() - Duration::hours(9);
        let mut state = TradeState::default();
        let adv = advance_trade(&sig, &mut state, 100.5, Utc::now(), &settings());
        match adv {
            TradeAdvance::Close { status, note, .. } => {
                assert_eq!(status, SignalStatus::Won);
                assert!(note.contains("max duration"));
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // DB-backed gate + recovery tests
    // -------------------------------------------------------------------------

    fn manager() -> (TradeManager, Arc<Database>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("tm.db").to_str().unwrap()).unwrap());
        std::mem::forget(dir);
        (TradeManager::new(db.clone()), db)
    }

    fn setup(symbol: &str, direction: Direction) -> SignalSetup {
        use crate::engine::{Narrative, Poi};
        use crate::structure::market_structure::StructureState;
        use crate::types::{Bias, StructureQuality, TriggerQuality, TriggerType};
        let (entry, sl, tp) = match direction {
            Direction::Long => (100.0, 99.0, 104.0),
            Direction::Short => (100.0, 101.0, 96.0),
        };
        SignalSetup {
            symbol: symbol.to_string(),
            direction,
            entry,
            sl,
            tp,
            rr: 4.0,
            trigger_type: TriggerType::Mss,
            quality: TriggerQuality::A,
            components: vec!["MSS".to_string(), "HTF_BIAS".to_string()],
            narrative: Narrative {
                bias: direction,
                quality: StructureQuality::Strong,
                choch: false,
                source_tf: "4h".to_string(),
                structure: StructureState {
                    bias: Bias::Long,
                    quality: StructureQuality::Strong,
                    choch: false,
                    last_bos_price: None,
                    last_swing_high: None,
                    last_swing_low: None,
                },
            },
            poi: Poi {
                direction,
                entry,
                sl,
                tp,
                rr: 4.0,
                zone_high: entry + 0.5,
                zone_low: entry - 0.5,
                confluence_count: 1,
                confluence_sources: vec!["OB".to_string()],
                in_correct_zone: true,
                in_ote: false,
                distance_from_price_pct: 0.002,
                obstacles: Vec::new(),
                has_obstacle: false,
                pd_zone: "DISCOUNT".to_string(),
            },
            atr: 0.5,
            timeframe: "15m".to_string(),
        }
    }

    #[test]
    fn gates_enforce_portfolio_invariants() {
        let (tm, db) = manager();
        let s = settings();

        assert!(tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().is_some());
        // Duplicate symbol.
        assert!(tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().is_none());
        assert!(tm.open_signal(&setup("BUSDT", Direction::Long), &s).unwrap().is_some());
        // Same-direction cap (default 2).
        assert!(tm.open_signal(&setup("CUSDT", Direction::Long), &s).unwrap().is_none());
        // Opposite direction still allowed.
        assert!(tm.open_signal(&setup("CUSDT", Direction::Short), &s).unwrap().is_some());
        // Concurrency cap (default 3).
        assert!(tm.open_signal(&setup("DUSDT", Direction::Short), &s).unwrap().is_none());
        assert_eq!(db.get_active_trade_count().unwrap(), 3);
    }

    #[test]
    fn cooldown_measured_from_terminal_close() {
        let (tm, db) = manager();
        let s = settings();
        let id = tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().unwrap();
        db.update_signal_status(id, SignalStatus::Lost, 99.0, -1.0, None).unwrap();
        // Immediately after the close, cooldown blocks.
        let reason = tm
            .check_entry_gates(&setup("AUSDT", Direction::Long), &s, Utc::now())
            .unwrap();
        assert!(reason.unwrap().contains("cooldown"));
        // Far enough in the future the gate clears.
        let later = Utc::now() + Duration::minutes(s.signal_cooldown_minutes + 1);
        let reason = tm
            .check_entry_gates(&setup("AUSDT", Direction::Long), &s, later)
            .unwrap();
        assert!(reason.is_none());
    }

    #[test]
    fn recovery_detects_breakeven_stops() {
        let (tm, db) = manager();
        let s = settings();
        let id = tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().unwrap();
        // Simulate a pre-restart breakeven move persisted to the store.
        db.update_signal_sl(id, 100.2).unwrap();

        let fresh = TradeManager::new(db.clone());
        fresh.recover_state().unwrap();
        let st = fresh.trade_state(id).expect("state");
        assert!(st.breakeven_moved);
        assert_eq!(st.trailing_sl, Some(100.2));
    }

    #[test]
    fn recovery_is_idempotent() {
        let (tm, db) = manager();
        let s = settings();
        tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().unwrap();

        let fresh = TradeManager::new(db.clone());
        fresh.recover_state().unwrap();
        let before = db.get_active_signals().unwrap();
        fresh.recover_state().unwrap();
        let after = db.get_active_signals().unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.stop_loss, a.stop_loss);
        }
    }

    #[test]
    fn tick_closes_and_cleans_up() {
        let (tm, db) = manager();
        let s = settings();
        let id = tm.open_signal(&setup("AUSDT", Direction::Long), &s).unwrap().unwrap();

        let mut tickers = HashMap::new();
        tickers.insert("AUSDT".to_string(), 104.5);
        let closed = tm.check_open_trades(&tickers, &s, Utc::now()).unwrap();
        assert_eq!(closed, 1);
        assert_eq!(db.get_active_trade_count().unwrap(), 0);
        assert!(tm.trade_state(id).is_none());
        let hist = db.get_signal_history(1).unwrap();
        assert_eq!(hist[0].status, SignalStatus::Won);
    }
}
