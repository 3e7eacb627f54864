// =============================================================================
// Swing Point Detection — major extrema with 3-bar fractal fallback
// =============================================================================
//
// A MAJOR swing high at index i strictly dominates the highs of the `lookback`
// candles on each side (symmetric for lows). When a frame is too quiet to
// yield at least two major highs and two major lows, 3-bar INTERNAL fractals
// fill in, skipping any candidate within 2 bars of an accepted same-kind
// major. The trailing `lookback` candles can never qualify (no right side
// yet), which is what makes swing output non-repainting.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fractal {
    Major,
    Internal,
}

/// One detected swing extremum. Swings are ephemeral: recomputed per frame,
/// never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
    pub fractal: Fractal,
}

/// Detect swing points over a frame. Returns the merged high/low set in
/// chronological (index) order.
pub fn detect_swings(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    if lookback == 0 || candles.len() < 2 * lookback + 1 {
        return Vec::new();
    }

    let mut swings: Vec<SwingPoint> = Vec::new();

    for i in lookback..candles.len() - lookback {
        if is_extremum(candles, i, lookback, SwingKind::High) {
            swings.push(SwingPoint {
                index: i,
                price: candles[i].high,
                kind: SwingKind::High,
                fractal: Fractal::Major,
            });
        }
        if is_extremum(candles, i, lookback, SwingKind::Low) {
            swings.push(SwingPoint {
                index: i,
                price: candles[i].low,
                kind: SwingKind::Low,
                fractal: Fractal::Major,
            });
        }
    }

    let major_highs = swings.iter().filter(|s| s.kind == SwingKind::High).count();
    let major_lows = swings.iter().filter(|s| s.kind == SwingKind::Low).count();

    // Fractal fallback when majors are scarce.
    if major_highs < 2 || major_lows < 2 {
        for i in 1..candles.len() - 1 {
            for kind in [SwingKind::High, SwingKind::Low] {
                if !is_extremum(candles, i, 1, kind) {
                    continue;
                }
                let near_major = swings.iter().any(|s| {
                    s.fractal == Fractal::Major
                        && s.kind == kind
                        && s.index.abs_diff(i) <= 2
                });
                if near_major {
                    continue;
                }
                let price = match kind {
                    SwingKind::High => candles[i].high,
                    SwingKind::Low => candles[i].low,
                };
                swings.push(SwingPoint {
                    index: i,
                    price,
                    kind,
                    fractal: Fractal::Internal,
                });
            }
        }
    }

    swings.sort_by_key(|s| s.index);
    swings
}

/// Strict local-extremum test over `lookback` candles on each side.
fn is_extremum(candles: &[Candle], i: usize, lookback: usize, kind: SwingKind) -> bool {
    if i < lookback || i + lookback >= candles.len() {
        return false;
    }
    match kind {
        SwingKind::High => {
            let h = candles[i].high;
            (1..=lookback).all(|d| h > candles[i - d].high && h > candles[i + d].high)
        }
        SwingKind::Low => {
            let l = candles[i].low;
            (1..=lookback).all(|d| l < candles[i - d].low && l < candles[i + d].low)
        }
    }
}

/// The most recent swing high and swing low — the dealing range boundaries.
pub fn dealing_range(swings: &[SwingPoint]) -> Option<(f64, f64)> {
    let high = swings.iter().rev().find(|s| s.kind == SwingKind::High)?.price;
    let low = swings.iter().rev().find(|s| s.kind == SwingKind::Low)?.price;
    if high > low {
        Some((high, low))
    } else {
        None
    }
}
