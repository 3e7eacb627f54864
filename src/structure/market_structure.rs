// =============================================================================
// Market Structure — bias, quality, and change-of-character from swing flow
// =============================================================================
//
// Examines the last <= 8 swings chronologically and counts the four
// transition kinds: HH / HL (bullish flow) and LH / LL (bearish flow). A
// transition only counts when the move clears `min_displacement` of the prior
// level; smaller wobbles are treated as equal highs/lows and ignored.
//
// CHoCH (the latest counter-trend break) degrades quality to WEAK but never
// flips bias on its own — the narrative layer decides what to do with a
// weakened read.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::structure::swings::{SwingKind, SwingPoint};
use crate::types::{Bias, StructureQuality};

/// How many of the most recent swings participate in the structure read.
const STRUCTURE_SWING_WINDOW: usize = 8;

/// Winning transition count needed for a STRONG read.
const STRONG_COUNT: usize = 3;

/// Derived structural state of one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureState {
    pub bias: Bias,
    pub quality: StructureQuality,
    pub choch: bool,
    pub last_bos_price: Option<f64>,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}

impl StructureState {
    pub fn neutral() -> Self {
        Self {
            bias: Bias::Neutral,
            quality: StructureQuality::Neutral,
            choch: false,
            last_bos_price: None,
            last_swing_high: None,
            last_swing_low: None,
        }
    }
}

/// Analyse swing flow into a structure state.
pub fn analyze_structure(swings: &[SwingPoint], min_displacement: f64) -> StructureState {
    let window_start = swings.len().saturating_sub(STRUCTURE_SWING_WINDOW);
    let window = &swings[window_start..];

    let highs: Vec<f64> = window
        .iter()
        .filter(|s| s.kind == SwingKind::High)
        .map(|s| s.price)
        .collect();
    let lows: Vec<f64> = window
        .iter()
        .filter(|s| s.kind == SwingKind::Low)
        .map(|s| s.price)
        .collect();

    if highs.len() < 2 && lows.len() < 2 {
        return StructureState::neutral();
    }

    let mut hh = 0usize;
    let mut lh = 0usize;
    let mut hl = 0usize;
    let mut ll = 0usize;
    let mut last_hh: Option<f64> = None;
    let mut last_ll: Option<f64> = None;

    for pair in highs.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur > prev * (1.0 + min_displacement) {
            hh += 1;
            last_hh = Some(cur);
        } else if cur < prev * (1.0 - min_displacement) {
            lh += 1;
        }
        // Inside the displacement band: equal high, not a transition.
    }
    for pair in lows.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur > prev * (1.0 + min_displacement) {
            hl += 1;
        } else if cur < prev * (1.0 - min_displacement) {
            ll += 1;
            last_ll = Some(cur);
        }
    }

    let bullish = hh + hl;
    let bearish = ll + lh;

    let (bias, winning) = if bullish >= 2 && bullish > bearish {
        (Bias::Long, bullish)
    } else if bearish >= 2 && bearish > bullish {
        (Bias::Short, bearish)
    } else {
        (Bias::Neutral, 0)
    };

    if bias == Bias::Neutral {
        return StructureState {
            bias,
            quality: StructureQuality::Neutral,
            choch: false,
            last_bos_price: None,
            last_swing_high: highs.last().copied(),
            last_swing_low: lows.last().copied(),
        };
    }

    // CHoCH: the most recent swing broke against the established flow.
    let choch = match bias {
        Bias::Long => lows
            .len()
            .checked_sub(2)
            .map(|i| lows[i + 1] < lows[i] * (1.0 - min_displacement))
            .unwrap_or(false),
        Bias::Short => highs
            .len()
            .checked_sub(2)
            .map(|i| highs[i + 1] > highs[i] * (1.0 + min_displacement))
            .unwrap_or(false),
        Bias::Neutral => false,
    };

    let quality = if choch {
        StructureQuality::Weak
    } else if winning >= STRONG_COUNT {
        StructureQuality::Strong
    } else {
        StructureQuality::Weak
    };

    let last_bos_price = match bias {
        Bias::Long => last_hh,
        Bias::Short => last_ll,
        Bias::Neutral => None,
    };

    StructureState {
        bias,
        quality,
        choch,
        last_bos_price,
        last_swing_high: highs.last().copied(),
        last_swing_low: lows.last().copied(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::swings::Fractal;

    fn swing(index: usize, price: f64, kind: SwingKind) -> SwingPoint {
        SwingPoint {
            index,
            price,
            kind,
            fractal: Fractal::Major,
        }
    }

    /// Alternating lows and highs stepping upward: 3 HH + 3 HL.
    fn uptrend_swings() -> Vec<SwingPoint> {
        vec![
            swing(0, 100.0, SwingKind::Low),
            swing(5, 110.0, SwingKind::High),
            swing(10, 104.0, SwingKind::Low),
            swing(15, 115.0, SwingKind::High),
            swing(20, 108.0, SwingKind::Low),
            swing(25, 121.0, SwingKind::High),
            swing(30, 113.0, SwingKind::Low),
            swing(35, 127.0, SwingKind::High),
        ]
    }

    #[test]
    fn uptrend_reads_strong_long() {
        let state = analyze_structure(&uptrend_swings(), 0.003);
        assert_eq!(state.bias, Bias::Long);
        assert_eq!(state.quality, StructureQuality::Strong);
        assert!(!state.choch);
        assert_eq!(state.last_bos_price, Some(127.0));
        assert_eq!(state.last_swing_low, Some(113.0));
    }

    #[test]
    fn downtrend_reads_short() {
        let mut swings = uptrend_swings();
        for s in &mut swings {
            s.price = 240.0 - s.price; // mirror
        }
        let state = analyze_structure(&swings, 0.003);
        assert_eq!(state.bias, Bias::Short);
        assert_eq!(state.quality, StructureQuality::Strong);
    }

    #[test]
    fn choch_degrades_quality_without_flipping_bias() {
        let mut swings = uptrend_swings();
        // Latest low dips below the prior low: CHoCH against the uptrend.
        swings[6].price = 104.0;
        let state = analyze_structure(&swings, 0.003);
        assert_eq!(state.bias, Bias::Long);
        assert!(state.choch);
        assert_eq!(state.quality, StructureQuality::Weak);
    }

    #[test]
    fn flat_swings_are_neutral() {
        let swings = vec![
            swing(0, 100.0, SwingKind::Low),
            swing(5, 101.0, SwingKind::High),
            swing(10, 100.05, SwingKind::Low),
            swing(15, 101.05, SwingKind::High),
            swing(20, 100.0, SwingKind::Low),
            swing(25, 101.0, SwingKind::High),
        ];
        // Every move is inside the 0.3% displacement band.
        let state = analyze_structure(&swings, 0.003);
        assert_eq!(state.bias, Bias::Neutral);
        assert_eq!(state.quality, StructureQuality::Neutral);
    }

    #[test]
    fn too_few_swings_are_neutral() {
        let swings = vec![swing(0, 100.0, SwingKind::Low)];
        assert_eq!(analyze_structure(&swings, 0.003).bias, Bias::Neutral);
    }

    #[test]
    fn only_last_eight_swings_count() {
        // Strong old downtrend followed by eight fresh uptrend swings: only
        // the fresh window matters.
        let mut swings: Vec<SwingPoint> = (0..6)
            .map(|i| {
                swing(
                    i,
                    300.0 - 10.0 * i as f64,
                    if i % 2 == 0 { SwingKind::High } else { SwingKind::Low },
                )
            })
            .collect();
        let mut fresh = uptrend_swings();
        for (j, s) in fresh.iter_mut().enumerate() {
            s.index = 100 + j;
        }
        swings.extend(fresh);
        let state = analyze_structure(&swings, 0.003);
        assert_eq!(state.bias, Bias::Long);
    }
}
