// =============================================================================
// Order Blocks — last counter-trend candle before a displacement break
// =============================================================================
//
// A bullish OB is the bearish candle immediately preceding a strong bullish
// candle whose close clears the candidate's high (symmetric for bearish).
// Mitigated blocks — any later candle revisiting the block's far extreme —
// are excluded from active returns.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::types::Direction;

/// Minimum body ratio the displacement candle (the one after the candidate)
/// must carry.
const BREAK_BODY_RATIO_MIN: f64 = 0.5;

/// An unmitigated order block zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlock {
    /// Index of the candidate (counter-trend) candle within the frame.
    pub index: usize,
    pub high: f64,
    pub low: f64,
    /// Consequent encroachment — the zone midpoint.
    pub ce: f64,
    pub kind: Direction,
    /// Candles elapsed since the candidate closed.
    pub age: usize,
    /// Candidate body ratio; a proxy for the block's strength.
    pub strength: f64,
}

/// Detect active (unmitigated) order blocks within the age window,
/// chronological order.
pub fn detect_order_blocks(candles: &[Candle], params: &EngineParams) -> Vec<OrderBlock> {
    let len = candles.len();
    if len < 3 {
        return Vec::new();
    }

    let window_start = len.saturating_sub(params.ob_max_age_candles + 1);
    let mut blocks = Vec::new();

    for i in window_start..len - 1 {
        let candidate = &candles[i];
        if candidate.body_ratio() < params.ob_body_ratio_min {
            continue;
        }
        let next = &candles[i + 1];
        if next.body_ratio() < BREAK_BODY_RATIO_MIN {
            continue;
        }

        let kind = if candidate.is_bearish() && next.is_bullish() && next.close > candidate.high {
            Direction::Long
        } else if candidate.is_bullish() && next.is_bearish() && next.close < candidate.low {
            Direction::Short
        } else {
            continue;
        };

        if is_mitigated(candles, i, kind, candidate.high, candidate.low) {
            continue;
        }

        blocks.push(OrderBlock {
            index: i,
            high: candidate.high,
            low: candidate.low,
            ce: (candidate.high + candidate.low) / 2.0,
            kind,
            age: len - 1 - i,
            strength: candidate.body_ratio(),
        });
    }

    blocks
}

/// A block is mitigated once any candle after the displacement candle CLOSES
/// through its far extreme in the opposing direction. A wick through the
/// level is a sweep, not mitigation.
fn is_mitigated(candles: &[Candle], index: usize, kind: Direction, high: f64, low: f64) -> bool {
    candles[index + 2..].iter().any(|c| match kind {
        Direction::Long => c.close < low,
        Direction::Short => c.close > high,
    })
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

    fn quiet(level: f64) -> Candle {
        candle(level, level + 0.2, level - 0.2, level + 0.05)
    }

    /// Bearish candidate at index 3 followed by a bullish break at 4.
    fn bullish_ob_frame() -> Vec<Candle> {
        vec![
            quiet(100.0),
            quiet(100.0),
            quiet(100.0),
            candle(100.5, 100.6, 99.4, 99.5),  // bearish candidate, body 1.0 / range 1.2
            candle(99.6, 101.6, 99.5, 101.5),  // bullish, closes above candidate high
            quiet(101.3),
            quiet(101.4),
        ]
    }

    #[test]
    fn detects_bullish_order_block() {
        let frame = bullish_ob_frame();
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert_eq!(blocks.len(), 1);
        let ob = &blocks[0];
        assert_eq!(ob.kind, Direction::Long);
        assert_eq!(ob.index, 3);
        assert!((ob.high - 100.6).abs() < 1e-9);
        assert!((ob.low - 99.4).abs() < 1e-9);
        assert!((ob.ce - 100.0).abs() < 1e-9);
        assert_eq!(ob.age, 3);
    }

    #[test]
    fn detects_bearish_order_block() {
        let mut frame = bullish_ob_frame();
        // Mirror every candle around 100.5.
        for c in &mut frame {
            let (o, h, l, cl) = (c.open, c.high, c.low, c.close);
            c.open = 201.0 - o;
            c.high = 201.0 - l;
            c.low = 201.0 - h;
            c.close = 201.0 - cl;
        }
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, Direction::Short);
    }

    #[test]
    fn mitigated_block_is_excluded() {
        let mut frame = bullish_ob_frame();
        // A later candle closes below the block low -> mitigation.
        frame.push(candle(101.0, 101.1, 99.0, 99.2));
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert!(blocks.is_empty());
    }

    #[test]
    fn wick_through_the_low_does_not_mitigate() {
        let mut frame = bullish_ob_frame();
        // Sweep-style candle: wick below the block low, close back above.
        frame.push(candle(101.0, 101.1, 99.0, 100.9));
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn weak_candidate_body_is_rejected() {
        let mut frame = bullish_ob_frame();
        // Shrink the candidate body below the 0.40 default floor.
        frame[3] = candle(100.0, 100.6, 99.4, 99.9); // body 0.1 / range 1.2
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert!(blocks.is_empty());
    }

    #[test]
    fn weak_break_candle_is_rejected() {
        let mut frame = bullish_ob_frame();
        // Break candle closes above the high but with a thin body.
        frame[4] = candle(100.4, 101.2, 99.0, 100.7); // body 0.3 / range 2.2
        let blocks = detect_order_blocks(&frame, &EngineParams::default());
        assert!(blocks.is_empty());
    }

    #[test]
    fn stale_blocks_fall_outside_age_window() {
        let mut frame = bullish_ob_frame();
        let mut params = EngineParams::default();
        params.ob_max_age_candles = 2;
        // Age of the candidate is 3 with the base frame; pad one more.
        frame.push(quiet(101.5));
        let blocks = detect_order_blocks(&frame, &params);
        assert!(blocks.is_empty());
    }
}
