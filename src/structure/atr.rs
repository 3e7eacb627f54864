// =============================================================================
// Average True Range — plain mean of recent true ranges
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// The engine uses the plain mean of the last `period` TR values rather than a
// smoothed variant: the value only gates displacement size and the volatility
// cap, so seed effects do not matter and the mean keeps the gate responsive.
// =============================================================================

use crate::market_data::Candle;

/// Single candles whose range exceeds this many ATRs are treated as volatile
/// outliers: they never form displacement and veto the whole trigger check.
const VOLATILE_RANGE_ATR_MULT: f64 = 3.0;

/// Compute the mean true range over the last `period` candles.
///
/// Returns 0.0 when `period` is zero or the frame is shorter than
/// `period + 1` (each TR needs a previous close).
pub fn average_true_range(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }

    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        sum += hl.max(hc).max(lc);
    }

    let atr = sum / period as f64;
    if atr.is_finite() {
        atr
    } else {
        0.0
    }
}

/// True when a single candle's range blows through the volatility cap
/// (range > 3x ATR). Such candles are never part of a valid setup.
pub fn exceeds_volatility_cap(candle: &Candle, atr: f64) -> bool {
    atr > 0.0 && candle.range() > VOLATILE_RANGE_ATR_MULT * atr
}
