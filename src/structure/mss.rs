// =============================================================================
// Micro Structure Shift — fine-grained BOS after an anchor point
// =============================================================================
//
// Finds the latest micro swing (3-bar fractal) against the bias direction
// after the anchor index, then fires when a later candle closes across that
// micro level with at least `min_displacement` of clearance. Used as a
// trigger confirmation, not as a narrative input.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Direction;

/// A confirmed micro structure shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MssEvent {
    /// Index of the candle whose close confirmed the shift.
    pub index: usize,
    /// The micro swing level that was broken.
    pub level: f64,
    /// Index of the micro swing candle.
    pub micro_index: usize,
    pub direction: Direction,
}

/// Detect the most recent MSS after `anchor_index`, if any.
///
/// For a LONG bias the relevant micro level is the latest 3-bar swing high
/// after the anchor; the shift confirms when a later close clears it.
pub fn detect_mss(
    candles: &[Candle],
    anchor_index: usize,
    direction: Direction,
    min_displacement: f64,
) -> Option<MssEvent> {
    let len = candles.len();
    if len < 3 || anchor_index + 2 >= len {
        return None;
    }

    let mut best: Option<MssEvent> = None;

    let first_micro = anchor_index.max(1);
    for i in first_micro..len - 1 {
        let is_micro = match direction {
            Direction::Long => {
                candles[i].high > candles[i - 1].high && candles[i].high > candles[i + 1].high
            }
            Direction::Short => {
                candles[i].low < candles[i - 1].low && candles[i].low < candles[i + 1].low
            }
        };
        if !is_micro {
            continue;
        }
        let level = match direction {
            Direction::Long => candles[i].high,
            Direction::Short => candles[i].low,
        };

        for (offset, c) in candles[i + 1..].iter().enumerate() {
            let broke = match direction {
                Direction::Long => c.close > level * (1.0 + min_displacement),
                Direction::Short => c.close < level * (1.0 - min_displacement),
            };
            if broke {
                let event = MssEvent {
                    index: i + 1 + offset,
                    level,
                    micro_index: i,
                    direction,
                };
                let replace = best
                    .as_ref()
                    .map(|b| event.index >= b.index)
                    .unwrap_or(true);
                if replace {
                    best = Some(event);
                }
                break;
            }
        }
    }

    best
}
