// =============================================================================
// Liquidity Sweep — wick through a level, close back on the right side
// =============================================================================
//
// For a LONG bias the engine hunts swept lows: a candle whose wick trades
// below a known swing-low level but whose close recovers above it, with the
// rejection wick at least half the body. Symmetric for SHORT against swing
// highs.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::structure::swings::{SwingKind, SwingPoint};
use crate::types::Direction;

/// Minimum wick-to-body ratio for a valid rejection.
pub const SWEEP_WICK_BODY_MIN: f64 = 0.5;

/// One stop-hunt event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEvent {
    /// Index of the sweeping candle.
    pub index: usize,
    /// The liquidity level that was swept.
    pub level: f64,
    /// Direction of the setup the sweep validates.
    pub direction: Direction,
    /// Wick extreme: the sweep low for LONG, the sweep high for SHORT.
    pub wick_extreme: f64,
    pub wick_body_ratio: f64,
}

/// Detect sweeps of known swing levels, chronological order.
pub fn detect_sweeps(
    candles: &[Candle],
    swings: &[SwingPoint],
    direction: Direction,
) -> Vec<SweepEvent> {
    let mut events = Vec::new();

    let wanted_kind = match direction {
        Direction::Long => SwingKind::Low,
        Direction::Short => SwingKind::High,
    };

    for swing in swings.iter().filter(|s| s.kind == wanted_kind) {
        for (offset, c) in candles[swing.index + 1..].iter().enumerate() {
            let index = swing.index + 1 + offset;
            let body = c.body();

            let (crossed, recovered, wick) = match direction {
                Direction::Long => (
                    c.low < swing.price,
                    c.close > swing.price,
                    c.open.min(c.close) - c.low,
                ),
                Direction::Short => (
                    c.high > swing.price,
                    c.close < swing.price,
                    c.high - c.open.max(c.close),
                ),
            };

            if !crossed || !recovered {
                continue;
            }
            let wick_body_ratio = if body > 0.0 { wick / body } else { f64::INFINITY };
            if wick_body_ratio <= SWEEP_WICK_BODY_MIN {
                continue;
            }

            events.push(SweepEvent {
                index,
                level: swing.price,
                direction,
                wick_extreme: match direction {
                    Direction::Long => c.low,
                    Direction::Short => c.high,
                },
                wick_body_ratio,
            });
        }
    }

    events.sort_by_key(|e| e.index);
    events.dedup_by_key(|e| e.index);
    events
}

/// The latest sweep within the last `window` candles, if any.
pub fn latest_sweep_within<'a>(
    events: &'a [SweepEvent],
    frame_len: usize,
    window: usize,
) -> Option<&'a SweepEvent> {
    events
        .iter()
        .rev()
        .find(|e| e.index + window >= frame_len)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::swings::Fractal;

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

    fn swing_low(index: usize, price: f64) -> SwingPoint {
        SwingPoint {
            index,
            price,
            kind: SwingKind::Low,
            fractal: Fractal::Major,
        }
    }

    #[test]
    fn detects_long_sweep_of_low() {
        let mut frame: Vec<Candle> = (0..8).map(|_| quiet(100.5)).collect();
        // Wick to 99.0 below the 100.0 level, close back at 100.7.
        frame.push(candle(100.6, 100.8, 99.0, 100.7));
        let swings = vec![swing_low(2, 100.0)];

        let events = detect_sweeps(&frame, &swings, Direction::Long);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.index, 8);
        assert!((e.level - 100.0).abs() < 1e-9);
        assert!((e.wick_extreme - 99.0).abs() < 1e-9);
        // Body 0.1, lower wick 100.6 - 99.0 = 1.6 -> ratio 16.
        assert!(e.wick_body_ratio > SWEEP_WICK_BODY_MIN);
    }

    #[test]
    fn close_below_level_is_not_a_sweep() {
        let mut frame: Vec<Candle> = (0..8).map(|_| quiet(100.5)).collect();
        frame.push(candle(100.6, 100.8, 99.0, 99.8)); // closes below 100.0
        let swings = vec![swing_low(2, 100.0)];
        assert!(detect_sweeps(&frame, &swings, Direction::Long).is_empty());
    }

    #[test]
    fn thin_wick_is_rejected() {
        let mut frame: Vec<Candle> = (0..8).map(|_| quiet(100.5)).collect();
        // Crosses and recovers, but the wick (0.1) is small next to the body (1.0).
        frame.push(candle(99.95, 101.2, 99.85, 100.95));
        let swings = vec![swing_low(2, 99.9)];
        assert!(detect_sweeps(&frame, &swings, Direction::Long).is_empty());
    }

    #[test]
    fn detects_short_sweep_of_high() {
        let mut frame: Vec<Candle> = (0..8).map(|_| quiet(100.5)).collect();
        frame.push(candle(100.5, 102.0, 100.3, 100.4)); // wick above 101.0, close below
        let swings = vec![SwingPoint {
            index: 2,
            price: 101.0,
            kind: SwingKind::High,
            fractal: Fractal::Major,
        }];
        let events = detect_sweeps(&frame, &swings, Direction::Short);
        assert_eq!(events.len(), 1);
        assert!((events[0].wick_extreme - 102.0).abs() < 1e-9);
    }

    #[test]
    fn latest_within_window() {
        let events = vec![
            SweepEvent {
                index: 2,
                level: 100.0,
                direction: Direction::Long,
                wick_extreme: 99.0,
                wick_body_ratio: 2.0,
            },
            SweepEvent {
                index: 9,
                level: 100.0,
                direction: Direction::Long,
                wick_extreme: 99.2,
                wick_body_ratio: 2.0,
            },
        ];
        let hit = latest_sweep_within(&events, 12, 6).expect("recent sweep");
        assert_eq!(hit.index, 9);
        assert!(latest_sweep_within(&events, 30, 6).is_none());
    }
}
