// =============================================================================
// Liquidity Pools — equal highs/lows and raw swing levels as stop clusters
// =============================================================================
//
// Swing highs above current price are buy-side liquidity (BSL); swing lows
// below are sell-side (SSL). Swings clustering within the fractional equal
// tolerance merge into one EQH/EQL pool at the cluster extreme. A pool is
// `swept` once any later candle exceeds its level by the tolerance; swept
// pools stay visible but are deprioritised as targets.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::structure::swings::{SwingKind, SwingPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolSide {
    /// Buy-side liquidity — stops above highs.
    Bsl,
    /// Sell-side liquidity — stops below lows.
    Ssl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    Eqh,
    Eql,
    SwingHigh,
    SwingLow,
}

/// One liquidity pool level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub price: f64,
    pub side: PoolSide,
    pub kind: PoolKind,
    /// Number of swing touches backing the level.
    pub strength: usize,
    pub swept: bool,
    /// Frame index of the latest swing participating in the level.
    pub last_index: usize,
}

/// Detect liquidity pools relative to `current_price`.
pub fn detect_liquidity_pools(
    candles: &[Candle],
    swings: &[SwingPoint],
    current_price: f64,
    tolerance: f64,
) -> Vec<LiquidityPool> {
    let mut pools = Vec::new();

    let highs: Vec<&SwingPoint> = swings
        .iter()
        .filter(|s| s.kind == SwingKind::High && s.price > current_price)
        .collect();
    let lows: Vec<&SwingPoint> = swings
        .iter()
        .filter(|s| s.kind == SwingKind::Low && s.price < current_price)
        .collect();

    pools.extend(cluster(&highs, tolerance, PoolSide::Bsl, candles));
    pools.extend(cluster(&lows, tolerance, PoolSide::Ssl, candles));

    pools.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    pools
}

/// Merge same-side swings within tolerance into single pools.
fn cluster(
    swings: &[&SwingPoint],
    tolerance: f64,
    side: PoolSide,
    candles: &[Candle],
) -> Vec<LiquidityPool> {
    let mut used = vec![false; swings.len()];
    let mut pools = Vec::new();

    for i in 0..swings.len() {
        if used[i] {
            continue;
        }
        let anchor = swings[i].price;
        let mut members = vec![swings[i]];
        used[i] = true;
        for j in i + 1..swings.len() {
            if used[j] {
                continue;
            }
            if anchor > 0.0 && ((swings[j].price - anchor).abs() / anchor) <= tolerance {
                members.push(swings[j]);
                used[j] = true;
            }
        }

        // The liquidity line sits at the cluster extreme: the highest high
        // for BSL, the lowest low for SSL.
        let price = match side {
            PoolSide::Bsl => members.iter().map(|s| s.price).fold(f64::MIN, f64::max),
            PoolSide::Ssl => members.iter().map(|s| s.price).fold(f64::MAX, f64::min),
        };
        let last_index = members.iter().map(|s| s.index).max().unwrap_or(0);

        let kind = match (side, members.len() >= 2) {
            (PoolSide::Bsl, true) => PoolKind::Eqh,
            (PoolSide::Bsl, false) => PoolKind::SwingHigh,
            (PoolSide::Ssl, true) => PoolKind::Eql,
            (PoolSide::Ssl, false) => PoolKind::SwingLow,
        };

        let swept = candles[last_index + 1..].iter().any(|c| match side {
            PoolSide::Bsl => c.high > price * (1.0 + tolerance),
            PoolSide::Ssl => c.low < price * (1.0 - tolerance),
        });

        pools.push(LiquidityPool {
            price,
            side,
            kind,
            strength: members.len(),
            swept,
            last_index,
        });
    }

    pools
}

/// Nearest unswept BSL above `price`, if any.
pub fn nearest_bsl_above(pools: &[LiquidityPool], price: f64) -> Option<&LiquidityPool> {
    pools
        .iter()
        .filter(|p| p.side == PoolSide::Bsl && !p.swept && p.price > price)
        .min_by(|a, b| {
            (a.price - price)
                .partial_cmp(&(b.price - price))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Nearest unswept SSL below `price`, if any.
pub fn nearest_ssl_below(pools: &[LiquidityPool], price: f64) -> Option<&LiquidityPool> {
    pools
        .iter()
        .filter(|p| p.side == PoolSide::Ssl && !p.swept && p.price < price)
        .min_by(|a, b| {
            (price - a.price)
                .partial_cmp(&(price - b.price))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::swings::Fractal;

    fn candle(high: f64, low: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 100.0,
        }
    }

    fn swing(index: usize, price: f64, kind: SwingKind) -> SwingPoint {
        SwingPoint {
            index,
            price,
            kind,
            fractal: Fractal::Major,
        }
    }

    fn flat_frame(n: usize) -> Vec<Candle> {
        (0..n).map(|_| candle(100.5, 99.5)).collect()
    }

    #[test]
    fn equal_highs_cluster_into_eqh() {
        let frame = flat_frame(20);
        let swings = vec![
            swing(2, 105.00, SwingKind::High),
            swing(8, 105.05, SwingKind::High), // within 0.1% of 105.00
            swing(14, 108.00, SwingKind::High),
        ];
        let pools = detect_liquidity_pools(&frame, &swings, 100.0, 0.001);
        let eqh = pools.iter().find(|p| p.kind == PoolKind::Eqh).expect("EQH");
        assert!((eqh.price - 105.05).abs() < 1e-9);
        assert_eq!(eqh.strength, 2);
        let single = pools.iter().find(|p| p.kind == PoolKind::SwingHigh).expect("single");
        assert!((single.price - 108.0).abs() < 1e-9);
    }

    #[test]
    fn swept_levels_are_marked() {
        let mut frame = flat_frame(20);
        frame[10] = candle(105.30, 99.5); // exceeds 105.0 by > tolerance
        let swings = vec![swing(2, 105.00, SwingKind::High)];
        let pools = detect_liquidity_pools(&frame, &swings, 100.0, 0.001);
        assert!(pools[0].swept);
    }

    #[test]
    fn touch_within_tolerance_does_not_sweep() {
        let mut frame = flat_frame(20);
        frame[10] = candle(105.05, 99.5); // within 0.1% of 105.00
        let swings = vec![swing(2, 105.00, SwingKind::High)];
        let pools = detect_liquidity_pools(&frame, &swings, 100.0, 0.001);
        assert!(!pools[0].swept);
    }

    #[test]
    fn nearest_unswept_selection() {
        let mut frame = flat_frame(20);
        frame[10] = candle(103.50, 99.5); // sweeps the 103.0 level
        let swings = vec![
            swing(2, 103.00, SwingKind::High),
            swing(5, 106.00, SwingKind::High),
            swing(7, 97.00, SwingKind::Low),
        ];
        let pools = detect_liquidity_pools(&frame, &swings, 100.0, 0.001);
        let bsl = nearest_bsl_above(&pools, 100.0).expect("bsl");
        assert!((bsl.price - 106.0).abs() < 1e-9, "swept 103 must be skipped");
        let ssl = nearest_ssl_below(&pools, 100.0).expect("ssl");
        assert!((ssl.price - 97.0).abs() < 1e-9);
    }

    #[test]
    fn sides_split_around_current_price() {
        let frame = flat_frame(20);
        let swings = vec![
            swing(2, 105.0, SwingKind::High),
            swing(4, 99.0, SwingKind::High), // below price: not BSL
            swing(6, 95.0, SwingKind::Low),
        ];
        let pools = detect_liquidity_pools(&frame, &swings, 100.0, 0.001);
        assert_eq!(pools.len(), 2);
        assert!(pools.iter().all(|p| match p.side {
            PoolSide::Bsl => p.price > 100.0,
            PoolSide::Ssl => p.price < 100.0,
        }));
    }
}
