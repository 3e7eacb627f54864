// =============================================================================
// Detection Engine — Narrative -> POI -> Trigger
// =============================================================================
//
// Stateless across invocations: for a fixed timeframe bundle and parameter
// snapshot, `generate_signal` is pure and deterministic, and always emits
// exactly one of { None, Watch, Signal }.

pub mod narrative;
pub mod poi;
pub mod trigger;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::{Candle, TimeframeBundle};
use crate::params::EngineParams;
use crate::structure::atr::{average_true_range, exceeds_volatility_cap};
use crate::types::{Direction, TriggerQuality, TriggerType};

pub use narrative::{build_narrative, Narrative};
pub use poi::{discover_pois, Poi};
pub use trigger::{check_trigger, Trigger};

/// ATR period used on every timeframe.
pub const ATR_PERIOD: usize = 14;

/// Widened zone proximity for the watchlist 15m re-check.
const WATCH_PROXIMITY: f64 = 0.025;

/// Zone proximity for the 5m sniper re-check.
const SNIPER_PROXIMITY: f64 = 0.03;

/// Two adverse 15m closes beyond the zone by this fraction invalidate a POI.
const POI_INVALIDATION_PCT: f64 = 0.012;

/// 5m candles inspected for the sniper zone-touch precondition.
const SNIPER_TOUCH_WINDOW: usize = 12;

/// Overextension: candles inspected on the 1h frame.
const OVEREXT_WINDOW: usize = 6;

/// Overextension: minimum one-way candles out of the window.
const OVEREXT_MIN_DIRECTIONAL: usize = 5;

/// Overextension: aggregate move threshold in 1h ATRs.
const OVEREXT_ATR_MULT: f64 = 3.0;

/// Overextension: a counter-candle body this many ATRs resets the read.
const OVEREXT_PULLBACK_ATR: f64 = 0.4;

/// 4h obstacle guard scans the first fraction of the entry->TP path.
const HTF_GUARD_PATH_FRACTION: f64 = 0.6;

/// A formed-but-untriggered setup headed for the watchlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSetup {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub narrative: Narrative,
    pub poi: Poi,
    pub reason: String,
}

/// A fired setup headed for the trade lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSetup {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub trigger_type: TriggerType,
    pub quality: TriggerQuality,
    pub components: Vec<String>,
    pub narrative: Narrative,
    pub poi: Poi,
    pub atr: f64,
    pub timeframe: String,
}

/// The engine's one-of-three verdict per symbol per scan.
#[derive(Debug, Clone)]
pub enum Emission {
    None,
    Watch(Box<WatchSetup>),
    Signal(Box<SignalSetup>),
}

/// Outcome of the lightweight watchlist re-check.
#[derive(Debug, Clone)]
pub enum WatchCheck {
    None,
    Invalidated { reason: String },
    Triggered(Box<SignalSetup>),
}

/// Stored narrative + POI snapshot a watchlist entry re-checks against.
/// Schema-versioned so future migrations can detect stale blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredContext {
    pub version: u32,
    pub narrative: Narrative,
    pub poi: Poi,
}

pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

impl StoredContext {
    pub fn new(narrative: Narrative, poi: Poi) -> Self {
        Self {
            version: CONTEXT_SCHEMA_VERSION,
            narrative,
            poi,
        }
    }
}

pub struct DetectionEngine;

impl DetectionEngine {
    /// Full three-layer pass over one symbol's timeframe bundle.
    pub fn generate_signal(
        symbol: &str,
        bundle: &TimeframeBundle,
        params: &EngineParams,
    ) -> Emission {
        if !bundle.has_required_data() {
            debug!(
                symbol,
                candles_5m = bundle.m5.len(),
                candles_15m = bundle.m15.len(),
                "insufficient 15m data"
            );
            return Emission::None;
        }

        // Layer 1 — narrative.
        let Some(narrative) = build_narrative(&bundle.h4, &bundle.h1, params) else {
            debug!(symbol, "no directional narrative");
            return Emission::None;
        };
        let direction = narrative.bias;

        let Some(price) = bundle.current_price() else {
            return Emission::None;
        };
        let atr = average_true_range(&bundle.m15, ATR_PERIOD);
        if atr <= 0.0 {
            debug!(symbol, "ATR not ready");
            return Emission::None;
        }

        // Volatility gate applies to the whole decision, triggered or not.
        if let Some(last) = bundle.m15.last() {
            if exceeds_volatility_cap(last, atr) {
                debug!(symbol, range = last.range(), atr, "volatile last candle, skipping");
                return Emission::None;
            }
        }

        // Layer 2 — POI discovery.
        let pois = discover_pois(&bundle.m15, direction, price, params);
        let Some(top) = pois.into_iter().next() else {
            debug!(symbol, %direction, "no POI candidates");
            return Emission::None;
        };

        // Layer 3 — trigger check against the top POI.
        let trigger = check_trigger(
            &bundle.m15,
            "15m",
            &top,
            direction,
            atr,
            params.poi_max_distance_pct,
            params,
        );

        match trigger {
            Some(t) => {
                // 4h obstacle guard: a weak (1h-fallback) narrative with an
                // opposing 4h zone early on the path cancels outright.
                if narrative.source_tf == "1h"
                    && htf_obstacle_blocks(&bundle.h4, direction, t.entry, t.tp, params)
                {
                    debug!(symbol, "4h obstacle guard cancelled the decision");
                    return Emission::None;
                }

                // Overextension downgrades Signal -> Watch.
                if is_overextended(&bundle.h1, direction) {
                    return Emission::Watch(Box::new(WatchSetup {
                        symbol: symbol.to_string(),
                        direction,
                        entry: top.entry,
                        sl: top.sl,
                        tp: top.tp,
                        rr: top.rr,
                        narrative,
                        poi: top,
                        reason: "1H overextended, awaiting pullback".to_string(),
                    }));
                }

                Emission::Signal(Box::new(SignalSetup {
                    symbol: symbol.to_string(),
                    direction,
                    entry: t.entry,
                    sl: t.sl,
                    tp: t.tp,
                    rr: t.rr,
                    trigger_type: t.trigger_type,
                    quality: t.quality,
                    components: t.components,
                    narrative,
                    poi: top,
                    atr,
                    timeframe: t.timeframe,
                }))
            }
            None => {
                if top.distance_from_price_pct <= params.poi_max_distance_pct {
                    Emission::Watch(Box::new(WatchSetup {
                        symbol: symbol.to_string(),
                        direction,
                        entry: top.entry,
                        sl: top.sl,
                        tp: top.tp,
                        rr: top.rr,
                        narrative,
                        poi: top,
                        reason: "POI nearby, awaiting trigger".to_string(),
                    }))
                } else {
                    Emission::None
                }
            }
        }
    }

    /// Lightweight re-check used by the watchlist loop: no narrative or POI
    /// recomputation, only invalidation + trigger against the stored context.
    pub fn check_trigger_for_watch(
        symbol: &str,
        ctx: &StoredContext,
        m15: &[Candle],
        m5: Option<&[Candle]>,
        params: &EngineParams,
    ) -> WatchCheck {
        let direction = ctx.narrative.bias;
        let poi = &ctx.poi;

        // 1. POI invalidation on two adverse closes beyond the zone.
        if m15.len() >= 2 {
            let closes = &m15[m15.len() - 2..];
            let broken = match direction {
                Direction::Long => closes
                    .iter()
                    .all(|c| c.close < poi.zone_low * (1.0 - POI_INVALIDATION_PCT)),
                Direction::Short => closes
                    .iter()
                    .all(|c| c.close > poi.zone_high * (1.0 + POI_INVALIDATION_PCT)),
            };
            if broken {
                let reason = match direction {
                    Direction::Long => "POI invalidated: broken below zone",
                    Direction::Short => "POI invalidated: broken above zone",
                };
                return WatchCheck::Invalidated { reason: reason.to_string() };
            }
        }

        // 2. 15m trigger with widened proximity.
        let atr15 = average_true_range(m15, ATR_PERIOD);
        if atr15 > 0.0 {
            if let Some(t) =
                check_trigger(m15, "15m", poi, direction, atr15, WATCH_PROXIMITY, params)
            {
                return WatchCheck::Triggered(Box::new(Self::setup_from_trigger(
                    symbol, t, ctx, atr15,
                )));
            }
        }

        // 3. 5m sniper variant, only when price has been working the zone.
        if let Some(m5) = m5 {
            let touch_start = m5.len().saturating_sub(SNIPER_TOUCH_WINDOW);
            let touched = m5[touch_start..]
                .iter()
                .any(|c| c.low <= poi.zone_high && c.high >= poi.zone_low);
            let atr5 = average_true_range(m5, ATR_PERIOD);
            if touched && atr5 > 0.0 {
                if let Some(t) =
                    check_trigger(m5, "5m", poi, direction, atr5, SNIPER_PROXIMITY, params)
                {
                    let mut setup = Self::setup_from_trigger(symbol, t, ctx, atr5);
                    setup.quality = TriggerQuality::Sniper;
                    setup.timeframe = "5m".to_string();
                    return WatchCheck::Triggered(Box::new(setup));
                }
            }
        }

        WatchCheck::None
    }

    fn setup_from_trigger(
        symbol: &str,
        t: Trigger,
        ctx: &StoredContext,
        atr: f64,
    ) -> SignalSetup {
        SignalSetup {
            symbol: symbol.to_string(),
            direction: t.direction,
            entry: t.entry,
            sl: t.sl,
            tp: t.tp,
            rr: t.rr,
            trigger_type: t.trigger_type,
            quality: t.quality,
            components: t.components,
            narrative: ctx.narrative.clone(),
            poi: ctx.poi.clone(),
            atr,
            timeframe: t.timeframe,
        }
    }
}

/// The 1h frame has run too far one way without a meaningful pullback.
pub fn is_overextended(h1: &[Candle], direction: Direction) -> bool {
    if h1.len() < OVEREXT_WINDOW {
        return false;
    }
    let atr1h = average_true_range(h1, ATR_PERIOD);
    if atr1h <= 0.0 {
        return false;
    }

    let window = &h1[h1.len() - OVEREXT_WINDOW..];
    let directional = window
        .iter()
        .filter(|c| match direction {
            Direction::Long => c.is_bullish(),
            Direction::Short => c.is_bearish(),
        })
        .count();
    if directional < OVEREXT_MIN_DIRECTIONAL {
        return false;
    }

    let aggregate = (window[window.len() - 1].close - window[0].open).abs();
    if aggregate < OVEREXT_ATR_MULT * atr1h {
        return false;
    }

    let had_pullback = window.iter().any(|c| {
        let counter = match direction {
            Direction::Long => c.is_bearish(),
            Direction::Short => c.is_bullish(),
        };
        counter && c.body() >= OVEREXT_PULLBACK_ATR * atr1h
    });

    !had_pullback
}

/// Opposing unmitigated 4h zone inside the first 60% of the entry->TP path.
fn htf_obstacle_blocks(
    h4: &[Candle],
    direction: Direction,
    entry: f64,
    tp: f64,
    params: &EngineParams,
) -> bool {
    let limit = entry + HTF_GUARD_PATH_FRACTION * (tp - entry);
    !poi::opposing_zone_obstacles(h4, direction, entry, limit, params).is_empty()
}
