// =============================================================================
// Central Application State — pivot signal engine
// =============================================================================
//
// The single source of truth tying together every store and broker. All
// subsystems hold Arc references to their own interior-mutable state;
// AppState wires them together for the HTTP/SSE surface and the background
// tasks spawned from main.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::broker::Broker;
use crate::combiner::Combiner;
use crate::cooldown::Cooldown;
use crate::kline::KlineStore;
use crate::pattern_history::PatternHistory;
use crate::patterns::PatternDetectorConfig;
use crate::pivot::{PivotRefresher, PivotStore};
use crate::ranking::RankingStore;
use crate::runtime_config::RuntimeConfig;
use crate::signal::{CombinedSignal, PatternSignal, Signal};
use crate::signal_history::SignalHistory;
use crate::ticker::{TickerBatch, TickerStore};

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation. The SSE surface does not require it for
    /// correctness, but handlers may use it for cheap change detection.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub pivot_store: Arc<PivotStore>,
    pub pivot_refresher: Arc<PivotRefresher>,

    pub kline_store: Arc<KlineStore>,
    pub pattern_config: RwLock<PatternDetectorConfig>,

    pub cooldown: Arc<Cooldown>,
    pub signal_history: Arc<SignalHistory>,
    pub pattern_history: Arc<PatternHistory>,
    pub combiner: Arc<Combiner>,

    pub ticker_store: Arc<TickerStore>,
    pub ranking_store: Arc<RankingStore>,

    pub signal_broker: Arc<Broker<Signal>>,
    pub pattern_broker: Arc<Broker<PatternSignal>>,
    pub ticker_broker: Arc<Broker<TickerBatch>>,
    pub combined_broker: Arc<Broker<CombinedSignal>>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, pivot_store: Arc<PivotStore>, pivot_refresher: Arc<PivotRefresher>) -> Self {
        let pattern_config = PatternDetectorConfig {
            min_confidence: config.pattern_min_confidence,
            crypto_mode: config.pattern_crypto_mode,
            high_efficiency_only: config.pattern_high_efficiency_only,
        };

        let kline_store = Arc::new(KlineStore::new(config.kline_interval_minutes, config.kline_max_count));
        let cooldown = Arc::new(Cooldown::new(Duration::from_secs(config.cooldown_ttl_secs)));
        let signal_history = Arc::new(SignalHistory::new(config.signal_history_capacity));
        let pattern_history = Arc::new(PatternHistory::new(config.signal_history_capacity));
        let combiner = Arc::new(Combiner::new(Duration::from_secs(config.correlation_window_secs)));
        let ticker_store = Arc::new(TickerStore::new());
        let ranking_store = Arc::new(RankingStore::new(chrono::Duration::seconds(
            config.ranking_max_age_secs as i64,
        )));

        if config.enable_signal_persistence {
            signal_history.enable_persistence(std::path::Path::new(&config.data_dir).join("signals"));
        }
        if config.enable_pattern_persistence {
            pattern_history.enable_persistence(std::path::Path::new(&config.data_dir).join("patterns"));
        }

        Self {
            state_version: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            pivot_store,
            pivot_refresher,
            kline_store,
            pattern_config: RwLock::new(pattern_config),
            cooldown,
            signal_history,
            pattern_history,
            combiner,
            ticker_store,
            ranking_store,
            signal_broker: Arc::new(Broker::new()),
            pattern_broker: Arc::new(Broker::new()),
            ticker_broker: Arc::new(Broker::new()),
            combined_broker: Arc::new(Broker::new()),
        }
    }

    pub fn bump_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.runtime_config.read().data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_refresher(config: &RuntimeConfig) -> Arc<PivotRefresher> {
        Arc::new(PivotRefresher::new(
            Arc::new(PivotStore::new()),
            Arc::new(crate::pivot::RestPreviousOhlcSource::new(
                "https://example.invalid/exchangeInfo".to_string(),
                "https://example.invalid/{symbol}/{interval}".to_string(),
            )),
            std::path::PathBuf::from(&config.data_dir),
            config.pivot_timezone_offset_hours,
            config.pivot_refresh_worker_pool,
            config.symbols.clone(),
        ))
    }

    #[test]
    fn new_wires_pattern_config_from_runtime_config() {
        let mut config = RuntimeConfig::default();
        config.pattern_min_confidence = 75.0;
        let refresher = test_refresher(&config);
        let state = AppState::new(config, Arc::new(PivotStore::new()), refresher);
        assert_eq!(state.pattern_config.read().min_confidence, 75.0);
    }

    #[test]
    fn bump_version_increments_monotonically() {
        let config = RuntimeConfig::default();
        let refresher = test_refresher(&config);
        let state = AppState::new(config, Arc::new(PivotStore::new()), refresher);
        assert_eq!(state.bump_version(), 1);
        assert_eq!(state.bump_version(), 2);
    }
}
