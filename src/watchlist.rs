// =============================================================================
// Watchlist Loop — bounded observation of formed-but-untriggered setups
// =============================================================================
//
// Every 60 seconds each WATCHING entry is re-evaluated, but only when a new
// 5m candle has closed since the last pass. The entry either gets promoted
// (trigger fired against its stored narrative/POI), expires (SL broken,
// timeout, context lost, POI invalidated), or keeps watching with its candle
// counter advanced.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{Database, NewWatch, WatchRecord};
use crate::engine::{DetectionEngine, StoredContext, WatchCheck, WatchSetup, CONTEXT_SCHEMA_VERSION};
use crate::market_data::Candle;
use crate::params::EngineParams;
use crate::trade_manager::TradeManager;
use crate::types::Direction;

/// 5m candles fetched per re-check.
pub const WATCH_5M_CANDLES: usize = 15;

/// 15m candles fetched for the trigger re-check.
pub const WATCH_15M_CANDLES: usize = 100;

/// What one re-check decided for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// No new 5m candle yet; nothing was evaluated.
    Skipped,
    /// Counter advanced, still watching.
    Watching,
    Promoted,
    Expired(String),
}

pub struct WatchlistManager {
    db: Arc<Database>,
}

impl WatchlistManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add a Watch emission, refusing duplicates: the same (symbol,
    /// direction) never appears in both an ACTIVE signal and a WATCHING
    /// entry.
    pub fn add_watch(&self, setup: &WatchSetup, settings: &Settings) -> Result<Option<i64>> {
        if self.db.watching_exists(&setup.symbol, setup.direction)? {
            debug!(symbol = %setup.symbol, direction = %setup.direction, "already watching");
            return Ok(None);
        }
        if self.db.has_active_for_symbol(&setup.symbol)? {
            debug!(symbol = %setup.symbol, "symbol has an active signal, not watching");
            return Ok(None);
        }

        let context = StoredContext::new(setup.narrative.clone(), setup.poi.clone());
        let id = self.db.add_to_watchlist(&NewWatch {
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            potential_entry: setup.entry,
            potential_sl: setup.sl,
            potential_tp: setup.tp,
            watch_reason: setup.reason.clone(),
            max_watch_candles: settings.max_watch_candles,
            context_json: serde_json::to_string(&context)?,
        })?;

        info!(
            id,
            symbol = %setup.symbol,
            direction = %setup.direction,
            entry = setup.entry,
            reason = %setup.reason,
            "added to watchlist"
        );
        Ok(Some(id))
    }

    /// Re-evaluate one WATCHING entry against fresh frames. The caller
    /// fetches market data; this stays synchronous and testable.
    pub fn recheck_entry(
        &self,
        entry: &WatchRecord,
        m5: &[Candle],
        m15: &[Candle],
        params: &EngineParams,
        settings: &Settings,
        trade_manager: &TradeManager,
    ) -> Result<WatchOutcome> {
        // 1. Only a newly closed 5m candle advances the entry.
        let Some(latest_5m) = m5.last() else {
            debug!(id = entry.id, "no 5m data this pass");
            return Ok(WatchOutcome::Skipped);
        };
        if entry.last_5m_candle_ts == Some(latest_5m.open_time) {
            return Ok(WatchOutcome::Skipped);
        }

        // 2. Advance the counter before any verdict.
        let candles_watched = entry.candles_watched + 1;

        // 3. SL invalidation on the latest 5m candle.
        let sl_broken = match entry.direction {
            Direction::Long => latest_5m.low <= entry.potential_sl,
            Direction::Short => latest_5m.high >= entry.potential_sl,
        };
        if sl_broken {
            return self.expire(entry, "SL broken before trigger");
        }

        // 4. Timeout.
        if candles_watched >= entry.max_watch_candles {
            return self.expire(entry, "Timeout, no trigger");
        }

        // 5. Stored context must parse (and be the schema we understand).
        let ctx: StoredContext = match entry
            .context
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
        {
            Some(ctx) => ctx,
            None => return self.expire(entry, "context lost"),
        };
        if ctx.version != CONTEXT_SCHEMA_VERSION {
            return self.expire(entry, "context schema mismatch");
        }

        // 6-8. Lightweight re-check.
        match DetectionEngine::check_trigger_for_watch(&entry.symbol, &ctx, m15, Some(m5), params)
        {
            WatchCheck::Invalidated { reason } => self.expire(entry, &reason),
            WatchCheck::Triggered(setup) => {
                match trade_manager.open_signal(&setup, settings)? {
                    Some(signal_id) => {
                        self.db.promote_watchlist_item(entry.id)?;
                        info!(
                            id = entry.id,
                            signal_id,
                            symbol = %entry.symbol,
                            quality = %setup.quality,
                            timeframe = %setup.timeframe,
                            "watchlist entry promoted"
                        );
                        Ok(WatchOutcome::Promoted)
                    }
                    None => {
                        // Entry gates refused the promotion; the trigger is
                        // spent, so the entry expires rather than lingering.
                        self.expire(entry, "promotion rejected by entry gates")
                    }
                }
            }
            WatchCheck::None => {
                self.db
                    .update_watchlist_item(entry.id, candles_watched, latest_5m.open_time)?;
                Ok(WatchOutcome::Watching)
            }
        }
    }

    fn expire(&self, entry: &WatchRecord, reason: &str) -> Result<WatchOutcome> {
        self.db.expire_watchlist_item(entry.id, reason)?;
        warn!(
            id = entry.id,
            symbol = %entry.symbol,
            candles = entry.candles_watched,
            reason,
            "watchlist entry expired"
        );
        Ok(WatchOutcome::Expired(reason.to_string()))
    }

    pub fn watching(&self) -> Result<Vec<WatchRecord>> {
        self.db.get_watching_items()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Narrative, Poi};
    use crate::structure::market_structure::StructureState;
    use crate::types::{Bias, StructureQuality};

    fn candle(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 299_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    fn quiet(open_time: i64, level: f64) -> Candle {
        candle(open_time, level, level + 0.05, level - 0.05, level + 0.01)
    }

    fn narrative() -> Narrative {
        Narrative {
            bias: Direction::Long,
            quality: StructureQuality::Strong,
            choch: false,
            source_tf: "4h".to_string(),
            structure: StructureState {
                bias: Bias::Long,
                quality: StructureQuality::Strong,
                choch: false,
                last_bos_price: None,
                last_swing_high: None,
                last_swing_low: None,
            },
        }
    }

    fn poi() -> Poi {
        Poi {
            direction: Direction::Long,
            entry: 100.0,
            sl: 99.0,
            tp: 103.0,
            rr: 3.0,
            zone_high: 100.3,
            zone_low: 99.7,
            confluence_count: 1,
            confluence_sources: vec!["OB".to_string()],
            in_correct_zone: true,
            in_ote: false,
            distance_from_price_pct: 0.002,
            obstacles: Vec::new(),
            has_obstacle: false,
            pd_zone: "DISCOUNT".to_string(),
        }
    }

    fn watch_setup() -> WatchSetup {
        WatchSetup {
            symbol: "AUSDT".to_string(),
            direction: Direction::Long,
            entry: 100.0,
            sl: 99.0,
            tp: 103.0,
            rr: 3.0,
            narrative: narrative(),
            poi: poi(),
            reason: "POI nearby, awaiting trigger".to_string(),
        }
    }

    fn fixture() -> (WatchlistManager, TradeManager, Arc<Database>, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("wl.db").to_str().unwrap()).unwrap());
        std::mem::forget(dir);
        (
            WatchlistManager::new(db.clone()),
            TradeManager::new(db.clone()),
            db,
            Settings::default(),
        )
    }

    fn frames() -> (Vec<Candle>, Vec<Candle>) {
        let m5: Vec<Candle> = (0..WATCH_5M_CANDLES as i64)
            .map(|i| quiet(i * 300_000, 100.0))
            .collect();
        let m15: Vec<Candle> = (0..100).map(|i| quiet(i * 900_000, 100.0)).collect();
        (m5, m15)
    }

    #[test]
    fn duplicate_watch_is_refused() {
        let (wl, _tm, _db, settings) = fixture();
        assert!(wl.add_watch(&watch_setup(), &settings).unwrap().is_some());
        assert!(wl.add_watch(&watch_setup(), &settings).unwrap().is_none());
    }

    #[test]
    fn same_5m_candle_skips() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (m5, m15) = frames();
        let latest_ts = m5.last().unwrap().open_time;
        let entry = &db.get_watching_items().unwrap()[0];
        db.update_watchlist_item(entry.id, 1, latest_ts).unwrap();

        let entry = &db.get_watching_items().unwrap()[0];
        let outcome = wl
            .recheck_entry(entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Skipped);
        // Counter untouched.
        assert_eq!(db.get_watching_items().unwrap()[0].candles_watched, 1);
    }

    #[test]
    fn new_candle_advances_counter() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (m5, m15) = frames();
        let entry = &db.get_watching_items().unwrap()[0];
        let outcome = wl
            .recheck_entry(entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Watching);
        let updated = &db.get_watching_items().unwrap()[0];
        assert_eq!(updated.candles_watched, 1);
        assert_eq!(updated.last_5m_candle_ts, Some(m5.last().unwrap().open_time));
    }

    #[test]
    fn sl_touch_expires() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (mut m5, m15) = frames();
        let n = m5.len();
        m5[n - 1] = candle((n as i64 - 1) * 300_000, 99.4, 99.5, 98.9, 99.1); // low 98.9 <= sl 99.0
        let entry = &db.get_watching_items().unwrap()[0];
        let outcome = wl
            .recheck_entry(entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Expired("SL broken before trigger".to_string()));
        assert!(db.get_watching_items().unwrap().is_empty());
    }

    #[test]
    fn timeout_expires() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (m5, m15) = frames();
        let entry = &db.get_watching_items().unwrap()[0];
        // Pretend 11 candles already watched; this pass makes 12 = max.
        db.update_watchlist_item(entry.id, 11, 0).unwrap();
        let entry = &db.get_watching_items().unwrap()[0];
        let outcome = wl
            .recheck_entry(entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Expired("Timeout, no trigger".to_string()));
    }

    #[test]
    fn unparsable_context_expires() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (m5, m15) = frames();
        let mut entry = db.get_watching_items().unwrap().remove(0);
        entry.context = Some("{not json".to_string());
        let outcome = wl
            .recheck_entry(&entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Expired("context lost".to_string()));
    }

    #[test]
    fn poi_invalidation_expires() {
        let (wl, tm, db, settings) = fixture();
        wl.add_watch(&watch_setup(), &settings).unwrap();
        let (m5, mut m15) = frames();
        // Two closing candles far below zone_low 99.7 * 0.988 = 98.50.
        let n = m15.len();
        m15[n - 2] = candle((n as i64 - 2) * 900_000, 98.4, 98.5, 98.2, 98.3);
        m15[n - 1] = candle((n as i64 - 1) * 900_000, 98.3, 98.4, 98.0, 98.1);
        let entry = &db.get_watching_items().unwrap()[0];
        let outcome = wl
            .recheck_entry(entry, &m5, &m15, &EngineParams::default(), &settings, &tm)
            .unwrap();
        match outcome {
            WatchOutcome::Expired(reason) => assert!(reason.contains("broken below zone")),
            other => panic!("expected expiry, got {other:?}"),
        }
        assert_eq!(db.get_active_trade_count().unwrap(), 0, "no signal may open");
    }
}
