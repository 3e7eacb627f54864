// =============================================================================
// Structural Primitives Module
// =============================================================================
//
// Pure, side-effect-free detectors over a closed-candle frame. Every function
// here is deterministic in (frame, params) and never repaints: detectors only
// look at closed candles and never emit a point that a later candle inside the
// same frame would retract.

pub mod atr;
pub mod swings;
pub mod market_structure;
pub mod order_blocks;
pub mod fvg;
pub mod liquidity;
pub mod premium_discount;
pub mod displacement;
pub mod sweep;
pub mod mss;

pub use atr::{average_true_range, exceeds_volatility_cap};
pub use displacement::Displacement;
pub use fvg::{Fvg, FvgMitigation};
pub use liquidity::{LiquidityPool, PoolKind, PoolSide};
pub use market_structure::StructureState;
pub use mss::MssEvent;
pub use order_blocks::OrderBlock;
pub use premium_discount::{PdAnalysis, PdZone};
pub use sweep::SweepEvent;
pub use swings::{Fractal, SwingKind, SwingPoint};
