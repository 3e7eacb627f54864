// =============================================================================
// Layer 2 — POI discovery: confluent entry regions on the 15m frame
// =============================================================================
//
// Candidate zones are the unmitigated order blocks and open fair-value gaps
// sitting on the bias side of price. Each zone is scored by overlap with the
// other candidates plus any liquidity pool inside it, priced (entry at the
// CE, SL beyond the zone with a 20% buffer, TP at the nearest opposing
// liquidity), obstacle-scanned, and finally ranked by RR / confluence /
// distance.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::structure::fvg::detect_fvgs;
use crate::structure::liquidity::{
    detect_liquidity_pools, nearest_bsl_above, nearest_ssl_below, PoolKind,
};
use crate::structure::order_blocks::detect_order_blocks;
use crate::structure::premium_discount;
use crate::structure::swings::{dealing_range, detect_swings};
use crate::types::Direction;

/// SL buffer as a fraction of the zone height.
const SL_ZONE_BUFFER: f64 = 0.20;

/// Fallback TP distance when no opposing liquidity exists.
const FALLBACK_TP_PCT: f64 = 0.02;

/// Obstacles inside the first this-much of the entry->TP path pull the TP in.
const OBSTACLE_NEAR_FRACTION: f64 = 0.30;

/// When pulling TP to an obstacle, stop this fraction short of it.
const OBSTACLE_CUSHION: f64 = 0.02;

/// How many round-number levels ahead of entry join the obstacle scan.
const ROUND_LEVEL_COUNT: usize = 3;

/// Something standing between entry and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub price: f64,
    /// "OB", "FVG", or "ROUND".
    pub kind: String,
}

/// A candidate entry region, fully priced and scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub zone_high: f64,
    pub zone_low: f64,
    pub confluence_count: usize,
    pub confluence_sources: Vec<String>,
    pub in_correct_zone: bool,
    pub in_ote: bool,
    /// |price - entry| / price, a fraction like the params it is compared to.
    pub distance_from_price_pct: f64,
    pub obstacles: Vec<Obstacle>,
    pub has_obstacle: bool,
    pub pd_zone: String,
}

struct CandidateZone {
    low: f64,
    high: f64,
    tag: &'static str,
}

/// Discover and rank POIs for `direction` on the 15m frame.
pub fn discover_pois(
    m15: &[Candle],
    direction: Direction,
    current_price: f64,
    params: &EngineParams,
) -> Vec<Poi> {
    if current_price <= 0.0 {
        return Vec::new();
    }

    let mut zones: Vec<CandidateZone> = Vec::new();
    for ob in detect_order_blocks(m15, params) {
        if ob.kind == direction {
            zones.push(CandidateZone { low: ob.low, high: ob.high, tag: "OB" });
        }
    }
    for fvg in detect_fvgs(m15, params) {
        if fvg.kind == direction {
            zones.push(CandidateZone { low: fvg.low, high: fvg.high, tag: "FVG" });
        }
    }

    // Only zones on the bias side of price can be entered with a retrace.
    zones.retain(|z| {
        let ce = (z.low + z.high) / 2.0;
        match direction {
            Direction::Long => ce <= current_price,
            Direction::Short => ce >= current_price,
        }
    });
    if zones.is_empty() {
        return Vec::new();
    }

    let swings = detect_swings(m15, params.swing_lookback);
    let pools =
        detect_liquidity_pools(m15, &swings, current_price, params.liquidity_equal_tolerance);
    let pd = dealing_range(&swings)
        .and_then(|(high, low)| premium_discount::analyze(high, low, current_price));

    let mut pois: Vec<Poi> = Vec::new();

    for (zi, zone) in zones.iter().enumerate() {
        let height = zone.high - zone.low;
        if height <= 0.0 {
            continue;
        }
        let entry = (zone.low + zone.high) / 2.0;

        // Confluence: other candidate zones overlapping this one.
        let mut sources: Vec<String> = vec![zone.tag.to_string()];
        let mut confluence_count = 0usize;
        for (oi, other) in zones.iter().enumerate() {
            if oi == zi {
                continue;
            }
            if other.low <= zone.high && zone.low <= other.high {
                confluence_count += 1;
                if !sources.iter().any(|s| s == other.tag) {
                    sources.push(other.tag.to_string());
                }
            }
        }
        // Liquidity pools resting inside the zone.
        for pool in pools.iter().filter(|p| p.price >= zone.low && p.price <= zone.high) {
            confluence_count += 1;
            let tag = match pool.kind {
                PoolKind::Eqh => "LIQ_EQH",
                PoolKind::Eql => "LIQ_EQL",
                PoolKind::SwingHigh => "LIQ_SWING_HIGH",
                PoolKind::SwingLow => "LIQ_SWING_LOW",
            };
            if !sources.iter().any(|s| s == tag) {
                sources.push(tag.to_string());
            }
        }

        // SL beyond the zone extreme with a height-proportional buffer,
        // clamped into the policy distance band.
        let raw_sl = match direction {
            Direction::Long => zone.low - SL_ZONE_BUFFER * height,
            Direction::Short => zone.high + SL_ZONE_BUFFER * height,
        };
        let sl = clamp_sl(entry, raw_sl, direction, params);

        // TP at the nearest opposing liquidity, else a flat 2% away.
        let mut tp = match direction {
            Direction::Long => nearest_bsl_above(&pools, entry)
                .map(|p| p.price)
                .unwrap_or(entry * (1.0 + FALLBACK_TP_PCT)),
            Direction::Short => nearest_ssl_below(&pools, entry)
                .map(|p| p.price)
                .unwrap_or(entry * (1.0 - FALLBACK_TP_PCT)),
        };

        // Obstacle scan between entry and TP.
        let mut obstacles = opposing_zone_obstacles(m15, direction, entry, tp, params);
        for level in next_round_levels(entry, direction, ROUND_LEVEL_COUNT) {
            let between = match direction {
                Direction::Long => level > entry && level < tp,
                Direction::Short => level < entry && level > tp,
            };
            if between {
                obstacles.push(Obstacle { price: level, kind: "ROUND".to_string() });
            }
        }
        obstacles.sort_by(|a, b| {
            (a.price - entry)
                .abs()
                .partial_cmp(&(b.price - entry).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(closest) = obstacles.first() {
            let path = (tp - entry).abs();
            if path > 0.0 && (closest.price - entry).abs() <= OBSTACLE_NEAR_FRACTION * path {
                // Too close to run through: take profit just inside it.
                tp = entry + (closest.price - entry) * (1.0 - OBSTACLE_CUSHION);
            }
        }

        let risk = (entry - sl).abs();
        if risk <= 0.0 {
            continue;
        }
        let rr = (tp - entry).abs() / risk;

        let (in_correct_zone, in_ote, pd_zone) = match &pd {
            Some(pd) => (
                pd.favors(direction),
                pd.in_ote(entry, direction),
                pd.zone.to_string(),
            ),
            None => (false, false, "UNKNOWN".to_string()),
        };

        pois.push(Poi {
            direction,
            entry,
            sl,
            tp,
            rr,
            zone_high: zone.high,
            zone_low: zone.low,
            confluence_count,
            confluence_sources: sources,
            in_correct_zone,
            in_ote,
            distance_from_price_pct: (current_price - entry).abs() / current_price,
            has_obstacle: !obstacles.is_empty(),
            obstacles,
            pd_zone,
        });
    }

    let min_rr = params.min_rr_ratio;
    pois.sort_by(|a, b| {
        let a_ok = a.rr >= min_rr;
        let b_ok = b.rr >= min_rr;
        b_ok.cmp(&a_ok)
            .then(b.confluence_count.cmp(&a.confluence_count))
            .then(
                a.distance_from_price_pct
                    .partial_cmp(&b.distance_from_price_pct)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    pois
}

/// Keep a structural SL when its distance sits inside the policy band;
/// otherwise re-derive from entry at the default stop width (itself clamped
/// into the band).
pub fn clamp_sl(entry: f64, sl: f64, direction: Direction, params: &EngineParams) -> f64 {
    let dist = (entry - sl).abs() / entry;
    if dist >= params.min_sl_distance_pct && dist <= params.max_sl_distance_pct {
        return sl;
    }
    let fallback = params
        .default_sl_pct
        .clamp(params.min_sl_distance_pct, params.max_sl_distance_pct);
    match direction {
        Direction::Long => entry * (1.0 - fallback),
        Direction::Short => entry * (1.0 + fallback),
    }
}

/// Opposing unmitigated OB/FVG zones whose range intrudes on the entry->limit
/// path. Also used by the 4h obstacle guard.
pub fn opposing_zone_obstacles(
    candles: &[Candle],
    direction: Direction,
    entry: f64,
    limit: f64,
    params: &EngineParams,
) -> Vec<Obstacle> {
    let opposing = direction.opposite();
    let mut obstacles = Vec::new();

    let (lo, hi) = if entry < limit { (entry, limit) } else { (limit, entry) };

    for ob in detect_order_blocks(candles, params) {
        if ob.kind == opposing && ob.low < hi && ob.high > lo {
            // The near edge is what price hits first.
            let price = match direction {
                Direction::Long => ob.low,
                Direction::Short => ob.high,
            };
            obstacles.push(Obstacle { price, kind: "OB".to_string() });
        }
    }
    for fvg in detect_fvgs(candles, params) {
        if fvg.kind == opposing && fvg.low < hi && fvg.high > lo {
            let price = match direction {
                Direction::Long => fvg.low,
                Direction::Short => fvg.high,
            };
            obstacles.push(Obstacle { price, kind: "FVG".to_string() });
        }
    }

    obstacles
}

/// Round-number step keyed by price magnitude.
fn round_step(price: f64) -> f64 {
    if price >= 100_000.0 {
        1000.0
    } else if price >= 10_000.0 {
        500.0
    } else if price >= 1_000.0 {
        100.0
    } else if price >= 100.0 {
        50.0
    } else if price >= 10.0 {
        5.0
    } else if price >= 1.0 {
        0.5
    } else {
        0.05
    }
}

/// The next `n` round-number levels ahead of `entry` in trade direction.
fn next_round_levels(entry: f64, direction: Direction, n: usize) -> Vec<f64> {
    let step = round_step(entry);
    let mut levels = Vec::with_capacity(n);
    match direction {
        Direction::Long => {
            let mut level = (entry / step).floor() * step + step;
            for _ in 0..n {
                levels.push(level);
                level += step;
            }
        }
        Direction::Short => {
            let mut level = (entry / step).ceil() * step - step;
            for _ in 0..n {
                if level <= 0.0 {
                    break;
                }
                levels.push(level);
                level -= step;
            }
        }
    }
    levels
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
        candle(level, level + 0.02, level - 0.02, level + 0.005)
    }

    /// A 15m frame holding one fresh bullish OB around 100 with price at
    /// ~100.8 and a swing high (liquidity target) near 103.
    fn bullish_poi_frame() -> Vec<Candle> {
        let mut frame: Vec<Candle> = (0..30).map(|_| quiet(100.5)).collect();
        // Swing high at index 30 dominating its neighbourhood: BSL target.
        frame.push(candle(100.5, 103.0, 100.4, 100.9));
        for _ in 0..8 {
            frame.push(quiet(100.6));
        }
        // Bullish OB: bearish candidate then displacement up.
        frame.push(candle(100.5, 100.6, 99.8, 99.9)); // candidate -> zone [99.8, 100.6]
        frame.push(candle(99.9, 101.0, 99.85, 100.95)); // break above 100.6
        for _ in 0..3 {
            frame.push(quiet(100.8));
        }
        frame
    }

    #[test]
    fn discovers_and_prices_a_bullish_poi() {
        let frame = bullish_poi_frame();
        let price = frame.last().unwrap().close;
        let pois = discover_pois(&frame, Direction::Long, price, &EngineParams::default());
        assert!(!pois.is_empty(), "expected at least one POI");
        let poi = &pois[0];

        assert_eq!(poi.direction, Direction::Long);
        assert!((poi.entry - 100.2).abs() < 1e-9, "CE of [99.8, 100.6]");
        assert!(poi.sl < poi.entry);
        assert!(poi.tp > poi.entry);
        assert!(poi.confluence_sources.contains(&"OB".to_string()));
        assert!(poi.rr > 0.0);
    }

    #[test]
    fn sl_distance_respects_policy_band() {
        let frame = bullish_poi_frame();
        let price = frame.last().unwrap().close;
        let params = EngineParams::default();
        let pois = discover_pois(&frame, Direction::Long, price, &params);
        let poi = &pois[0];
        let dist = (poi.entry - poi.sl) / poi.entry;
        assert!(dist >= params.min_sl_distance_pct - 1e-12);
        assert!(dist <= params.max_sl_distance_pct + 1e-12);
    }

    #[test]
    fn clamp_sl_rederives_at_default_width_when_outside_band() {
        let params = EngineParams::default();
        // Too tight and far too wide both fall back to the default width.
        let sl = clamp_sl(100.0, 99.95, Direction::Long, &params);
        assert!((sl - 100.0 * (1.0 - params.default_sl_pct)).abs() < 1e-9);
        let sl = clamp_sl(100.0, 90.0, Direction::Long, &params);
        assert!((sl - 100.0 * (1.0 - params.default_sl_pct)).abs() < 1e-9);
        // Inside the band: untouched.
        let sl = clamp_sl(100.0, 99.0, Direction::Long, &params);
        assert!((sl - 99.0).abs() < 1e-9);
    }

    #[test]
    fn short_clamp_mirrors() {
        let params = EngineParams::default();
        let sl = clamp_sl(100.0, 100.05, Direction::Short, &params);
        assert!((sl - 100.0 * (1.0 + params.default_sl_pct)).abs() < 1e-9);
    }

    #[test]
    fn wrong_side_zones_are_dropped() {
        let frame = bullish_poi_frame();
        // Price far below the OB zone: the CE is above price, not a long POI.
        let pois = discover_pois(&frame, Direction::Long, 98.0, &EngineParams::default());
        assert!(pois.is_empty());
    }

    #[test]
    fn round_levels_long_and_short() {
        assert_eq!(next_round_levels(100.2, Direction::Long, 3), vec![150.0, 200.0, 250.0]);
        assert_eq!(next_round_levels(7.3, Direction::Long, 2), vec![7.5, 8.0]);
        assert_eq!(next_round_levels(7.3, Direction::Short, 2), vec![7.0, 6.5]);
        assert_eq!(round_step(25_000.0), 500.0);
        assert_eq!(round_step(0.5), 0.05);
    }

    #[test]
    fn near_obstacle_pulls_tp_in() {
        // Entry 100, natural TP 110, obstacle at 102 (20% of the path).
        let entry: f64 = 100.0;
        let tp: f64 = 110.0;
        let obstacle: f64 = 102.0;
        assert!((obstacle - entry).abs() <= OBSTACLE_NEAR_FRACTION * (tp - entry).abs());
        let pulled = entry + (obstacle - entry) * (1.0 - OBSTACLE_CUSHION);
        assert!((pulled - 101.96).abs() < 1e-9);
        assert!(pulled < obstacle);
    }

    #[test]
    fn rr_sort_prefers_viable_then_confluent_then_near() {
        let mk = |rr: f64, confluence: usize, dist: f64| Poi {
            direction: Direction::Long,
            entry: 100.0,
            sl: 99.0,
            tp: 100.0 + rr,
            rr,
            zone_high: 100.5,
            zone_low: 99.5,
            confluence_count: confluence,
            confluence_sources: vec!["OB".to_string()],
            in_correct_zone: true,
            in_ote: false,
            distance_from_price_pct: dist,
            obstacles: Vec::new(),
            has_obstacle: false,
            pd_zone: "DISCOUNT".to_string(),
        };
        let mut pois = vec![mk(1.0, 5, 0.001), mk(2.5, 1, 0.004), mk(2.2, 3, 0.002)];
        let min_rr = EngineParams::default().min_rr_ratio;
        pois.sort_by(|a, b| {
            let a_ok = a.rr >= min_rr;
            let b_ok = b.rr >= min_rr;
            b_ok.cmp(&a_ok)
                .then(b.confluence_count.cmp(&a.confluence_count))
                .then(
                    a.distance_from_price_pct
                        .partial_cmp(&b.distance_from_price_pct)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        assert!((pois[0].rr - 2.2).abs() < 1e-9, "viable + most confluent first");
        assert!((pois[1].rr - 2.5).abs() < 1e-9);
        assert!((pois[2].rr - 1.0).abs() < 1e-9, "sub-minimum RR last");
    }
}
