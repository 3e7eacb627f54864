// =============================================================================
// Fair-Value Gaps — three-candle imbalances with monotonic mitigation
// =============================================================================
//
// A bullish FVG exists at i when candle[i-1].high < candle[i+1].low; the gap
// between those two wicks is the zone (symmetric for bearish). Mitigation
// progresses FRESH -> PARTIAL -> FULL as later candles trade into the zone
// and never regresses. FULL gaps are dropped from the candidate set.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FvgMitigation {
    Fresh,
    Partial,
    Full,
}

/// An open (non-FULL) fair-value gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fvg {
    /// Index of the middle (displacement) candle.
    pub index: usize,
    pub high: f64,
    pub low: f64,
    /// Consequent encroachment — the zone midpoint.
    pub ce: f64,
    pub kind: Direction,
    pub age: usize,
    pub mitigation: FvgMitigation,
    /// Gap height as a fraction of the middle candle close.
    pub size_pct: f64,
}

/// Detect open FVGs within the age window, chronological order.
pub fn detect_fvgs(candles: &[Candle], params: &EngineParams) -> Vec<Fvg> {
    let len = candles.len();
    if len < 3 {
        return Vec::new();
    }

    let window_start = len.saturating_sub(params.fvg_max_age_candles + 1).max(1);
    let mut gaps = Vec::new();

    for i in window_start..len - 1 {
        let prev = &candles[i - 1];
        let next = &candles[i + 1];
        let reference = candles[i].close;
        if reference <= 0.0 {
            continue;
        }

        let (kind, zone_low, zone_high) = if prev.high < next.low {
            (Direction::Long, prev.high, next.low)
        } else if prev.low > next.high {
            (Direction::Short, next.high, prev.low)
        } else {
            continue;
        };

        let size_pct = (zone_high - zone_low) / reference;
        if size_pct < params.fvg_min_size_pct {
            continue;
        }

        let mitigation = mitigation_state(&candles[i + 2..], kind, zone_low, zone_high);
        if mitigation == FvgMitigation::Full {
            continue;
        }

        gaps.push(Fvg {
            index: i,
            high: zone_high,
            low: zone_low,
            ce: (zone_high + zone_low) / 2.0,
            kind,
            age: len - 1 - i,
            mitigation,
            size_pct,
        });
    }

    gaps
}

/// Deepest penetration wins; the state can only move forward.
fn mitigation_state(
    later: &[Candle],
    kind: Direction,
    zone_low: f64,
    zone_high: f64,
) -> FvgMitigation {
    let mut state = FvgMitigation::Fresh;
    for c in later {
        let (touched, filled) = match kind {
            // Bullish gap sits below price; it fills from the top down.
            Direction::Long => (c.low < zone_high, c.low <= zone_low),
            // Bearish gap sits above price; it fills from the bottom up.
            Direction::Short => (c.high > zone_low, c.high >= zone_high),
        };
        if filled {
            return FvgMitigation::Full;
        }
        if touched {
            state = FvgMitigation::Partial;
        }
    }
    state
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    /// Bullish gap: candle 1's high (100.5) < candle 3's low (101.5).
    fn bullish_gap_frame() -> Vec<Candle> {
        vec![
            candle(100.0, 100.3, 99.7, 100.1),
            candle(100.0, 100.5, 99.8, 100.4),
            candle(100.5, 102.0, 100.4, 101.9), // displacement
            candle(101.9, 102.5, 101.5, 102.3),
            candle(102.2, 102.8, 102.0, 102.6),
        ]
    }

    #[test]
    fn detects_bullish_gap() {
        let gaps = detect_fvgs(&bullish_gap_frame(), &EngineParams::default());
        assert_eq!(gaps.len(), 1);
        let g = &gaps[0];
        assert_eq!(g.kind, Direction::Long);
        assert_eq!(g.index, 2);
        assert!((g.low - 100.5).abs() < 1e-9);
        assert!((g.high - 101.5).abs() < 1e-9);
        assert_eq!(g.mitigation, FvgMitigation::Fresh);
        assert!(g.size_pct > 0.009);
    }

    #[test]
    fn detects_bearish_gap() {
        let mut frame = bullish_gap_frame();
        for c in &mut frame {
            let (o, h, l, cl) = (c.open, c.high, c.low, c.close);
            c.open = 203.0 - o;
            c.high = 203.0 - l;
            c.low = 203.0 - h;
            c.close = 203.0 - cl;
        }
        let gaps = detect_fvgs(&frame, &EngineParams::default());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, Direction::Short);
    }

    #[test]
    fn partial_mitigation_is_tracked() {
        let mut frame = bullish_gap_frame();
        // Price dips into the zone but not through it.
        frame.push(candle(102.5, 102.6, 101.0, 101.4));
        let gaps = detect_fvgs(&frame, &EngineParams::default());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].mitigation, FvgMitigation::Partial);
    }

    #[test]
    fn full_mitigation_drops_the_gap() {
        let mut frame = bullish_gap_frame();
        frame.push(candle(102.5, 102.6, 100.4, 100.8)); // sweeps the whole zone
        let gaps = detect_fvgs(&frame, &EngineParams::default());
        assert!(gaps.is_empty());
    }

    #[test]
    fn mitigation_does_not_regress_after_bounce() {
        let mut frame = bullish_gap_frame();
        frame.push(candle(102.5, 102.6, 101.0, 101.4)); // partial touch
        frame.push(candle(101.4, 103.5, 101.3, 103.4)); // bounce away
        let gaps = detect_fvgs(&frame, &EngineParams::default());
        assert_eq!(gaps[0].mitigation, FvgMitigation::Partial);
    }

    #[test]
    fn tiny_gaps_are_filtered() {
        let mut params = EngineParams::default();
        params.fvg_min_size_pct = 0.05; // demand a 5% gap
        let gaps = detect_fvgs(&bullish_gap_frame(), &params);
        assert!(gaps.is_empty());
    }

    #[test]
    fn gaps_older_than_window_are_dropped() {
        let mut frame = bullish_gap_frame();
        let mut params = EngineParams::default();
        params.fvg_max_age_candles = 2;
        frame.push(candle(102.6, 102.9, 102.4, 102.8));
        // Gap index 2, frame len 6 -> age 3 > 2.
        let gaps = detect_fvgs(&frame, &params);
        assert!(gaps.is_empty());
    }
}
