// =============================================================================
// Layer 1 — Narrative: higher-timeframe directional judgment
// =============================================================================
//
// The 4h structure decides. A NEUTRAL 4h read falls back to 1h with quality
// forced WEAK; a NEUTRAL 1h read means no narrative and the symbol is left
// alone this pass. CHoCH never blocks on its own — it only weakens quality.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::structure::market_structure::{analyze_structure, StructureState};
use crate::structure::swings::detect_swings;
use crate::types::{Direction, StructureQuality};

/// The higher-timeframe story a setup must align with. Serialised into the
/// watchlist stored context, so the shape is part of the context schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub bias: Direction,
    pub quality: StructureQuality,
    pub choch: bool,
    /// Which timeframe produced the read: "4h", or "1h" on fallback.
    pub source_tf: String,
    pub structure: StructureState,
}

/// Build the narrative from the 4h frame, falling back to 1h.
pub fn build_narrative(h4: &[Candle], h1: &[Candle], params: &EngineParams) -> Option<Narrative> {
    let s4 = structure_of(h4, params);
    if let Some(direction) = s4.bias.direction() {
        return Some(Narrative {
            bias: direction,
            quality: s4.quality,
            choch: s4.choch,
            source_tf: "4h".to_string(),
            structure: s4,
        });
    }

    let s1 = structure_of(h1, params);
    if let Some(direction) = s1.bias.direction() {
        return Some(Narrative {
            bias: direction,
            // Fallback reads are never trusted as STRONG.
            quality: StructureQuality::Weak,
            choch: s1.choch,
            source_tf: "1h".to_string(),
            structure: s1,
        });
    }

    None
}

fn structure_of(candles: &[Candle], params: &EngineParams) -> StructureState {
    let swings = detect_swings(candles, params.swing_lookback);
    analyze_structure(&swings, params.bos_min_displacement)
}
