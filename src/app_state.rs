// =============================================================================
// Central Application State — SMC Sentinel
// =============================================================================
//
// Ties the long-lived subsystems together for the scheduler tasks and the
// status API. Cross-task coordination happens through Persistence and the
// Parameter Store, never through ad-hoc shared collections; what lives here
// is the wiring, not the truth.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binance::FuturesClient;
use crate::config::Settings;
use crate::db::Database;
use crate::params::ParamStore;
use crate::trade_manager::TradeManager;
use crate::watchlist::WatchlistManager;

/// Shared state handed to every scheduler task and API handler.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on meaningful
    /// mutations so the dashboard can cheaply detect staleness.
    pub state_version: AtomicU64,

    pub settings: RwLock<Settings>,
    pub db: Arc<Database>,
    pub params: Arc<ParamStore>,
    pub client: Arc<FuturesClient>,
    pub trade_manager: Arc<TradeManager>,
    pub watchlist: Arc<WatchlistManager>,

    /// Symbols the scan tick iterates (explicit config or discovered
    /// universe).
    pub symbols: RwLock<Vec<String>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(settings: Settings, db: Arc<Database>) -> Self {
        let params = Arc::new(ParamStore::new(db.clone()));
        let trade_manager = Arc::new(TradeManager::new(db.clone()));
        let watchlist = Arc::new(WatchlistManager::new(db.clone()));
        Self {
            state_version: AtomicU64::new(1),
            symbols: RwLock::new(settings.symbols.clone()),
            settings: RwLock::new(settings),
            db,
            params,
            client: Arc::new(FuturesClient::new()),
            trade_manager,
            watchlist,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }
}
