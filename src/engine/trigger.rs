// =============================================================================
// Layer 3 — Trigger check: instantaneous validation of the top POI
// =============================================================================
//
// Attempted in order, first *surviving* candidate wins:
//   1. SWEEP_REJECTION — a stop-hunt within the last 6 candles.
//   2. MSS             — a micro structure shift within the last 4 candles.
//   3. DISPLACEMENT    — an impulsive run ending within the last 4 candles.
//
// Every candidate re-clamps its SL into the policy band and recomputes RR
// against the POI's target; a candidate failing the RR floor falls through to
// the next trigger type. A last candle blowing the 3x ATR cap vetoes the
// whole check.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::engine::poi::{clamp_sl, Poi};
use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::structure::atr::exceeds_volatility_cap;
use crate::structure::displacement::detect_displacement;
use crate::structure::mss::detect_mss;
use crate::structure::sweep::{detect_sweeps, latest_sweep_within};
use crate::structure::swings::detect_swings;
use crate::types::{Direction, TriggerQuality, TriggerType};

/// Sweeps must have happened within this many candles of the frame end.
const SWEEP_WINDOW: usize = 6;

/// MSS confirmations must close within this many candles of the frame end.
const MSS_WINDOW: usize = 4;

/// Displacements must end within this many candles of the frame end.
const DISPLACEMENT_WINDOW: usize = 4;

/// SL offset past a sweep wick or displacement extreme (0.2%).
const TRIGGER_SL_OFFSET: f64 = 0.002;

/// Fallback MSS anchor depth when no candle has touched the zone yet.
const MSS_ANCHOR_FALLBACK: usize = 10;

/// A fired trigger, ready to become a MARKET signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_type: TriggerType,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub quality: TriggerQuality,
    pub components: Vec<String>,
    pub timeframe: String,
}

/// Run the trigger check for `poi` on `frame`.
///
/// `proximity` is the maximum fractional distance between price and the POI
/// zone; the scan path uses the tunable POI distance, the watchlist re-check
/// widens it.
pub fn check_trigger(
    frame: &[Candle],
    timeframe: &str,
    poi: &Poi,
    direction: Direction,
    atr: f64,
    proximity: f64,
    params: &EngineParams,
) -> Option<Trigger> {
    let last = frame.last()?;
    if exceeds_volatility_cap(last, atr) {
        return None;
    }

    let price = last.close;
    if price <= 0.0 || zone_distance(price, poi) > proximity {
        return None;
    }

    let swings = detect_swings(frame, params.swing_lookback);

    // 1. SWEEP_REJECTION
    let sweeps = detect_sweeps(frame, &swings, direction);
    if let Some(sweep) = latest_sweep_within(&sweeps, frame.len(), SWEEP_WINDOW) {
        let raw_sl = match direction {
            Direction::Long => sweep.wick_extreme * (1.0 - TRIGGER_SL_OFFSET),
            Direction::Short => sweep.wick_extreme * (1.0 + TRIGGER_SL_OFFSET),
        };
        if let Some(t) = build_candidate(
            TriggerType::SweepRejection,
            price,
            raw_sl,
            poi,
            direction,
            timeframe,
            params,
        ) {
            return Some(t);
        }
    }

    // 2. MSS — anchored where the latest reaction into the zone began.
    let anchor = match frame
        .iter()
        .rposition(|c| c.low <= poi.zone_high && c.high >= poi.zone_low)
    {
        Some(last_touch) => {
            let mut start = last_touch;
            while start > 0
                && frame[start - 1].low <= poi.zone_high
                && frame[start - 1].high >= poi.zone_low
            {
                start -= 1;
            }
            start
        }
        None => frame.len().saturating_sub(MSS_ANCHOR_FALLBACK),
    };
    if let Some(mss) = detect_mss(frame, anchor, direction, params.bos_min_displacement) {
        if mss.index + MSS_WINDOW >= frame.len() {
            if let Some(t) = build_candidate(
                TriggerType::Mss,
                price,
                poi.sl,
                poi,
                direction,
                timeframe,
                params,
            ) {
                return Some(t);
            }
        }
    }

    // 3. DISPLACEMENT
    if let Some(d) = detect_displacement(frame, atr, params) {
        if d.direction == direction && d.end_index + DISPLACEMENT_WINDOW >= frame.len() {
            let raw_sl = match direction {
                Direction::Long => d.extreme * (1.0 - TRIGGER_SL_OFFSET),
                Direction::Short => d.extreme * (1.0 + TRIGGER_SL_OFFSET),
            };
            if let Some(t) = build_candidate(
                TriggerType::Displacement,
                price,
                raw_sl,
                poi,
                direction,
                timeframe,
                params,
            ) {
                return Some(t);
            }
        }
    }

    None
}

/// Fractional distance from price to the POI zone (0 inside the zone).
fn zone_distance(price: f64, poi: &Poi) -> f64 {
    if price >= poi.zone_low && price <= poi.zone_high {
        0.0
    } else if price > poi.zone_high {
        (price - poi.zone_high) / price
    } else {
        (poi.zone_low - price) / price
    }
}

/// Clamp, grade, and validate one trigger candidate. `None` means it failed
/// the RR floor and the next trigger type should be attempted.
fn build_candidate(
    trigger_type: TriggerType,
    entry: f64,
    raw_sl: f64,
    poi: &Poi,
    direction: Direction,
    timeframe: &str,
    params: &EngineParams,
) -> Option<Trigger> {
    let sl = clamp_sl(entry, raw_sl, direction, params);
    let risk = (entry - sl).abs();
    if risk <= 0.0 {
        return None;
    }
    let rr = (poi.tp - entry).abs() / risk;
    if rr < params.min_rr_ratio {
        return None;
    }

    let mut components: Vec<String> = vec![
        trigger_type.as_str().to_string(),
        "HTF_BIAS".to_string(),
        "POI_ZONE".to_string(),
    ];
    for src in &poi.confluence_sources {
        if !components.contains(src) {
            components.push(src.clone());
        }
    }
    if poi.in_ote {
        components.push("OTE".to_string());
    }

    let score = poi.confluence_count
        + usize::from(poi.in_ote)
        + usize::from(poi.in_correct_zone)
        + usize::from(trigger_type == TriggerType::SweepRejection);
    let quality = match score {
        s if s >= 4 => TriggerQuality::APlus,
        3 => TriggerQuality::A,
        2 => TriggerQuality::B,
        _ => TriggerQuality::C,
    };

    Some(Trigger {
        trigger_type,
        direction,
        entry,
        sl,
        tp: poi.tp,
        rr,
        quality,
        components,
        timeframe: timeframe.to_string(),
    })
}
