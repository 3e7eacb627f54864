// =============================================================================
// Market data primitives — OHLCV candles and multi-timeframe bundles
// =============================================================================
//
// A frame is an ordered, deduplicated, timestamp-monotonic slice of *closed*
// candles for one (symbol, timeframe). Only closed candles ever reach the
// detection engine; the in-progress kline is dropped at the adapter boundary.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single closed OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, epoch milliseconds.
    pub open_time: i64,
    /// Close time, epoch milliseconds.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// High-low range in price units.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size in price units.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Body as a fraction of the full range. Doji candles with a zero range
    /// report 0.0.
    pub fn body_ratio(&self) -> f64 {
        let range = self.range();
        if range > 0.0 {
            self.body() / range
        } else {
            0.0
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Normalise a raw candle series into a valid frame: sorted by open time and
/// deduplicated on open time. Open candles are already removed by the
/// adapter.
pub fn normalize_frame(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    candles
}

/// The multi-timeframe bundle one detection pass operates on. 15m is
/// required; 1h/4h drive the narrative; 5m is only used by the watchlist
/// sniper re-check.
#[derive(Debug, Clone, Default)]
pub struct TimeframeBundle {
    pub m5: Vec<Candle>,
    pub m15: Vec<Candle>,
    pub h1: Vec<Candle>,
    pub h4: Vec<Candle>,
}

impl TimeframeBundle {
    /// The bundle is usable when the required 15m frame has enough candles
    /// for structural analysis.
    pub fn has_required_data(&self) -> bool {
        self.m15.len() >= 50
    }

    /// Last 15m close — the engine's notion of current price.
    pub fn current_price(&self) -> Option<f64> {
        self.m15.last().map(|c| c.close)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 899_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn body_ratio_of_full_body_candle() {
        let c = candle(0, 100.0, 110.0, 100.0, 110.0);
        assert!((c.body_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn body_ratio_of_doji() {
        let c = candle(0, 100.0, 100.0, 100.0, 100.0);
        assert_eq!(c.body_ratio(), 0.0);
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let frame = normalize_frame(vec![
            candle(2_000, 101.0, 102.0, 100.0, 101.5),
            candle(1_000, 100.0, 101.0, 99.0, 100.5),
            candle(2_000, 101.0, 103.0, 100.0, 102.0),
        ]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0].open_time, 1_000);
        assert_eq!(frame[1].open_time, 2_000);
    }

    #[test]
    fn bundle_requires_15m_depth() {
        let mut bundle = TimeframeBundle::default();
        assert!(!bundle.has_required_data());
        bundle.m15 = (0..60)
            .map(|i| candle(i * 900_000, 100.0, 101.0, 99.0, 100.5))
            .collect();
        assert!(bundle.has_required_data());
        assert_eq!(bundle.current_price(), Some(100.5));
    }
}
