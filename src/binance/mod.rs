// =============================================================================
// Binance Futures Market Data Module
// =============================================================================
//
// Public USD-M futures REST endpoints only: klines, tickers, funding rate,
// open interest, and exchange-info universe discovery. The engine routes no
// orders, so nothing here is signed.

pub mod client;
pub mod rate_limit;

pub use client::FuturesClient;
pub use rate_limit::RateLimitTracker;
