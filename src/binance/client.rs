// =============================================================================
// Binance USD-M Futures REST Client — public market data only
// =============================================================================
//
// The engine consumes klines, last-price tickers, funding rate, open
// interest, and the exchange-info symbol universe. Klines arrive as JSON
// arrays-of-arrays with numeric fields encoded as strings; the last element
// is the in-progress candle and is dropped so the engine only ever sees
// closed candles.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::market_data::{normalize_frame, Candle, TimeframeBundle};

/// Candles fetched per timeframe for a full detection pass.
pub const SCAN_CANDLES: usize = 150;

/// Binance futures REST client for public market data.
#[derive(Clone)]
pub struct FuturesClient {
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl FuturesClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("FuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            base_url: "https://fapi.binance.com".to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        }
    }

    pub fn rate_limit(&self) -> Arc<RateLimitTracker> {
        self.rate_limit.clone()
    }

    async fn get_json(&self, path: &str, weight: u32) -> Result<serde_json::Value> {
        if !self.rate_limit.can_send_request(weight) {
            anyhow::bail!("rate-limit budget exhausted for {path}");
        }
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {path} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Fetch the most recent `n` **closed** candles, oldest first.
    #[instrument(skip(self), name = "binance::get_candles")]
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        n: usize,
    ) -> Result<Vec<Candle>> {
        // +1 because the newest kline is still forming and gets dropped.
        let path = format!(
            "/fapi/v1/klines?symbol={}&interval={}&limit={}",
            symbol,
            timeframe,
            n + 1
        );
        let body = self.get_json(&path, 5).await?;
        let candles = parse_klines(&body, chrono::Utc::now().timestamp_millis())?;
        let start = candles.len().saturating_sub(n);
        Ok(candles[start..].to_vec())
    }

    /// Fetch the full multi-timeframe bundle one detection pass needs.
    #[instrument(skip(self), name = "binance::get_multi_timeframe")]
    pub async fn get_multi_timeframe_data(&self, symbol: &str) -> Result<TimeframeBundle> {
        Ok(TimeframeBundle {
            m5: self.get_candles(symbol, "5m", SCAN_CANDLES).await?,
            m15: self.get_candles(symbol, "15m", SCAN_CANDLES).await?,
            h1: self.get_candles(symbol, "1h", SCAN_CANDLES).await?,
            h4: self.get_candles(symbol, "4h", SCAN_CANDLES).await?,
        })
    }

    // -------------------------------------------------------------------------
    // Tickers
    // -------------------------------------------------------------------------

    /// Last traded price for a single symbol.
    #[instrument(skip(self), name = "binance::get_ticker")]
    pub async fn get_ticker(&self, symbol: &str) -> Result<f64> {
        let path = format!("/fapi/v1/ticker/price?symbol={symbol}");
        let body = self.get_json(&path, 1).await?;
        parse_string_f64(&body["price"], "price")
    }

    // -------------------------------------------------------------------------
    // Futures intelligence (not consumed by the core pipeline)
    // -------------------------------------------------------------------------

    /// Current funding rate from the premium index endpoint.
    #[instrument(skip(self), name = "binance::get_funding_rate")]
    pub async fn get_funding_rate(&self, symbol: &str) -> Result<f64> {
        let path = format!("/fapi/v1/premiumIndex?symbol={symbol}");
        let body = self.get_json(&path, 1).await?;
        parse_string_f64(&body["lastFundingRate"], "lastFundingRate")
    }

    /// Current open interest in contracts.
    #[instrument(skip(self), name = "binance::get_open_interest")]
    pub async fn get_open_interest(&self, symbol: &str) -> Result<f64> {
        let path = format!("/fapi/v1/openInterest?symbol={symbol}");
        let body = self.get_json(&path, 1).await?;
        parse_string_f64(&body["openInterest"], "openInterest")
    }

    // -------------------------------------------------------------------------
    // Universe discovery
    // -------------------------------------------------------------------------

    /// Trading USDT perpetual symbols from exchange info, capped at `limit`.
    #[instrument(skip(self), name = "binance::get_perp_universe")]
    pub async fn get_perp_universe(&self, limit: usize) -> Result<Vec<String>> {
        let body = self.get_json("/fapi/v1/exchangeInfo", 1).await?;
        let symbols = parse_perp_universe(&body);
        if symbols.is_empty() {
            warn!("exchange info returned no tradable perpetuals");
        }
        Ok(symbols.into_iter().take(limit).collect())
    }
}

impl Default for FuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse a klines payload, dropping any candle that has not closed by
/// `now_ms`. Binance kline arrays are:
/// `[open_time, open, high, low, close, volume, close_time, ...]`
fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let rows = body.as_array().context("klines payload is not an array")?;
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let k = row.as_array().context("kline row is not an array")?;
        if k.len() < 7 {
            anyhow::bail!("kline row too short: {} fields", k.len());
        }
        let close_time = k[6].as_i64().context("missing kline close_time")?;
        if close_time > now_ms {
            // Still forming.
            continue;
        }
        candles.push(Candle {
            open_time: k[0].as_i64().context("missing kline open_time")?,
            close_time,
            open: parse_string_f64(&k[1], "open")?,
            high: parse_string_f64(&k[2], "high")?,
            low: parse_string_f64(&k[3], "low")?,
            close: parse_string_f64(&k[4], "close")?,
            volume: parse_string_f64(&k[5], "volume")?,
        });
    }
    Ok(normalize_frame(candles))
}

/// Trading USDT perpetuals from an exchange-info payload.
fn parse_perp_universe(body: &serde_json::Value) -> Vec<String> {
    body["symbols"]
        .as_array()
        .map(|symbols| {
            symbols
                .iter()
                .filter(|s| {
                    s["contractType"].as_str() == Some("PERPETUAL")
                        && s["quoteAsset"].as_str() == Some("USDT")
                        && s["status"].as_str() == Some("TRADING")
                })
                .filter_map(|s| s["symbol"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Binance sends numeric values as JSON strings in most payloads.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_klines_drops_forming_candle() {
        let body = serde_json::json!([
            [1000, "100.0", "101.0", "99.0", "100.5", "123.4", 1999],
            [2000, "100.5", "102.0", "100.0", "101.5", "234.5", 2999],
            [3000, "101.5", "103.0", "101.0", "102.0", "50.0", 3999]
        ]);
        // Now = 3500: the candle closing at 3999 is still forming.
        let candles = parse_klines(&body, 3500).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1000);
        assert!((candles[1].close - 101.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_klines_rejects_malformed_rows() {
        let body = serde_json::json!([[1000, "100.0"]]);
        assert!(parse_klines(&body, i64::MAX).is_err());
        let body = serde_json::json!({"not": "an array"});
        assert!(parse_klines(&body, i64::MAX).is_err());
    }

    #[test]
    fn parse_universe_filters_perps() {
        let body = serde_json::json!({
            "symbols": [
                {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING"},
                {"symbol": "ETHUSDT_230929", "contractType": "CURRENT_QUARTER", "quoteAsset": "USDT", "status": "TRADING"},
                {"symbol": "BTCUSD_PERP", "contractType": "PERPETUAL", "quoteAsset": "USD", "status": "TRADING"},
                {"symbol": "OLDUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "SETTLING"},
                {"symbol": "SOLUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING"}
            ]
        });
        let universe = parse_perp_universe(&body);
        assert_eq!(universe, vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[test]
    fn parse_string_f64_accepts_both_encodings() {
        assert!((parse_string_f64(&serde_json::json!("1.5"), "x").unwrap() - 1.5).abs() < 1e-12);
        assert!((parse_string_f64(&serde_json::json!(2.5), "x").unwrap() - 2.5).abs() < 1e-12);
        assert!(parse_string_f64(&serde_json::json!(null), "x").is_err());
        assert!(parse_string_f64(&serde_json::json!("abc"), "x").is_err());
    }
}
