// =============================================================================
// Displacement — volatility-aware impulsive moves
// =============================================================================
//
// A qualifying displacement is a run of 1-3 consecutive same-direction strong
// candles (each body_ratio >= displacement_min_body_ratio) whose aggregate
// move clears both ATR x displacement_atr_multiplier and
// displacement_min_size_pct of price, with the starting candle's volume at
// least 0.8x the 20-bar average. Any single candle exceeding the 3x ATR cap
// is a volatile outlier and can never participate.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::structure::atr::exceeds_volatility_cap;
use crate::types::Direction;

/// Longest run of candles a displacement may span.
const MAX_RUN_LEN: usize = 3;

/// Volume confirmation floor relative to the rolling average.
const VOLUME_FLOOR_RATIO: f64 = 0.8;

/// Bars in the rolling volume average.
const VOLUME_AVG_WINDOW: usize = 20;

/// How far back from the frame end displacement runs are searched.
const SCAN_WINDOW: usize = 20;

/// One qualifying impulsive move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Displacement {
    pub start_index: usize,
    pub end_index: usize,
    pub direction: Direction,
    /// Aggregate |close(end) - open(start)| in price units.
    pub total_move: f64,
    /// Extreme of the run: lowest low for bullish, highest high for bearish.
    pub extreme: f64,
}

/// Find the most recent qualifying displacement, if any.
pub fn detect_displacement(
    candles: &[Candle],
    atr: f64,
    params: &EngineParams,
) -> Option<Displacement> {
    if atr <= 0.0 || candles.len() < 2 {
        return None;
    }

    let scan_start = candles.len().saturating_sub(SCAN_WINDOW);
    let mut best: Option<Displacement> = None;

    for end in scan_start..candles.len() {
        for run_len in 1..=MAX_RUN_LEN.min(end + 1) {
            let start = end + 1 - run_len;
            if let Some(d) = qualify_run(candles, start, end, atr, params) {
                // Later end wins; for the same end the longest run wins.
                let replace = match &best {
                    Some(b) => d.end_index > b.end_index
                        || (d.end_index == b.end_index && d.total_move > b.total_move),
                    None => true,
                };
                if replace {
                    best = Some(d);
                }
            }
        }
    }

    best
}

fn qualify_run(
    candles: &[Candle],
    start: usize,
    end: usize,
    atr: f64,
    params: &EngineParams,
) -> Option<Displacement> {
    let run = &candles[start..=end];
    let first = run.first()?;

    let direction = if first.is_bullish() {
        Direction::Long
    } else if first.is_bearish() {
        Direction::Short
    } else {
        return None;
    };

    for c in run {
        let same_direction = match direction {
            Direction::Long => c.is_bullish(),
            Direction::Short => c.is_bearish(),
        };
        if !same_direction || c.body_ratio() < params.displacement_min_body_ratio {
            return None;
        }
        // Volatile outlier: a single 3x ATR candle never forms displacement.
        if exceeds_volatility_cap(c, atr) {
            return None;
        }
    }

    let total_move = (run[run.len() - 1].close - first.open).abs();
    if total_move < atr * params.displacement_atr_multiplier {
        return None;
    }
    if first.open > 0.0 && total_move / first.open < params.displacement_min_size_pct {
        return None;
    }

    // Volume confirmation against the 20-bar average preceding the run.
    let vol_window_end = start;
    let vol_window_start = vol_window_end.saturating_sub(VOLUME_AVG_WINDOW);
    if vol_window_end > vol_window_start {
        let avg: f64 = candles[vol_window_start..vol_window_end]
            .iter()
            .map(|c| c.volume)
            .sum::<f64>()
            / (vol_window_end - vol_window_start) as f64;
        if avg > 0.0 && first.volume < VOLUME_FLOOR_RATIO * avg {
            return None;
        }
    }

    let extreme = match direction {
        Direction::Long => run.iter().map(|c| c.low).fold(f64::MAX, f64::min),
        Direction::Short => run.iter().map(|c| c.high).fold(f64::MIN, f64::max),
    };

    Some(Displacement {
        start_index: start,
        end_index: end,
        direction,
        total_move,
        extreme,
    })
}
