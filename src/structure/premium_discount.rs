// =============================================================================
// Premium / Discount — dealing-range position and the OTE window
// =============================================================================
//
// Position inside the dealing range [range_low, range_high] is expressed as a
// percentage; longs prefer discount (below the equilibrium), shorts prefer
// premium. OTE is the 0.618-0.786 Fibonacci retracement band, computed per
// direction from the range extremes.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Direction;

const OTE_FIB_LOW: f64 = 0.618;
const OTE_FIB_HIGH: f64 = 0.786;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdZone {
    DeepDiscount,
    Discount,
    Neutral,
    Premium,
    DeepPremium,
}

impl std::fmt::Display for PdZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeepDiscount => write!(f, "DEEP_DISCOUNT"),
            Self::Discount => write!(f, "DISCOUNT"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Premium => write!(f, "PREMIUM"),
            Self::DeepPremium => write!(f, "DEEP_PREMIUM"),
        }
    }
}

/// Where a price sits inside the dealing range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdAnalysis {
    pub range_high: f64,
    pub range_low: f64,
    pub position_pct: f64,
    pub zone: PdZone,
}

/// Analyse `price` against the dealing range. Returns `None` on a degenerate
/// (zero-width or inverted) range.
pub fn analyze(range_high: f64, range_low: f64, price: f64) -> Option<PdAnalysis> {
    if range_high <= range_low {
        return None;
    }
    let position_pct = (price - range_low) / (range_high - range_low) * 100.0;

    let zone = if position_pct <= 30.0 {
        PdZone::DeepDiscount
    } else if position_pct < 50.0 {
        PdZone::Discount
    } else if position_pct == 50.0 {
        PdZone::Neutral
    } else if position_pct < 70.0 {
        PdZone::Premium
    } else {
        PdZone::DeepPremium
    };

    Some(PdAnalysis {
        range_high,
        range_low,
        position_pct,
        zone,
    })
}

impl PdAnalysis {
    /// The zone agrees with the trade direction: longs in discount, shorts in
    /// premium.
    pub fn favors(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.position_pct < 50.0,
            Direction::Short => self.position_pct > 50.0,
        }
    }

    /// True when `price` sits inside the 0.618-0.786 retracement band for
    /// the given direction.
    pub fn in_ote(&self, price: f64, direction: Direction) -> bool {
        let range = self.range_high - self.range_low;
        let (lo, hi) = match direction {
            // Long entries retrace down from the range high.
            Direction::Long => (
                self.range_high - OTE_FIB_HIGH * range,
                self.range_high - OTE_FIB_LOW * range,
            ),
            // Short entries retrace up from the range low.
            Direction::Short => (
                self.range_low + OTE_FIB_LOW * range,
                self.range_low + OTE_FIB_HIGH * range,
            ),
        };
        price >= lo && price <= hi
    }
}
