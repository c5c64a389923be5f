// =============================================================================
// Runtime Configuration — hot-loadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the pivot signal engine. Every tunable
// parameter lives here so the engine can be reconfigured without touching
// code.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry a serde default so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_kline_interval_minutes() -> u32 {
    5
}

fn default_kline_max_count() -> usize {
    20
}

fn default_cooldown_ttl_secs() -> u64 {
    1800
}

fn default_correlation_window_secs() -> u64 {
    900
}

fn default_pivot_refresh_worker_pool() -> usize {
    16
}

fn default_pivot_timezone_offset_hours() -> i32 {
    8
}

fn default_signal_history_capacity() -> usize {
    10_000
}

fn default_pattern_min_confidence() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_ranking_sample_interval_secs() -> u64 {
    300
}

fn default_ranking_max_age_secs() -> u64 {
    86_400
}

fn default_ticker_batch_interval_ms() -> u64 {
    500
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

/// Top-level runtime configuration for the pivot signal engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols the engine watches across both streams.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Virtual kline interval, in minutes.
    #[serde(default = "default_kline_interval_minutes")]
    pub kline_interval_minutes: u32,

    /// Number of closed klines retained per symbol.
    #[serde(default = "default_kline_max_count")]
    pub kline_max_count: usize,

    /// Cooldown TTL for repeated pivot crossings, in seconds.
    #[serde(default = "default_cooldown_ttl_secs")]
    pub cooldown_ttl_secs: u64,

    /// Combiner correlation window, in seconds.
    #[serde(default = "default_correlation_window_secs")]
    pub correlation_window_secs: u64,

    /// Concurrency cap on the pivot refresher's per-symbol OHLC fetches.
    #[serde(default = "default_pivot_refresh_worker_pool")]
    pub pivot_refresh_worker_pool: usize,

    /// UTC offset, in hours, used for the refresher's daily/weekly schedule.
    #[serde(default = "default_pivot_timezone_offset_hours")]
    pub pivot_timezone_offset_hours: i32,

    /// Total signal history capacity, split across daily/weekly/other buckets.
    #[serde(default = "default_signal_history_capacity")]
    pub signal_history_capacity: usize,

    /// Minimum confidence a detected pattern must clear to be emitted.
    #[serde(default = "default_pattern_min_confidence")]
    pub pattern_min_confidence: f64,

    /// Relaxes gap-dependent pattern rules (e.g. DarkCloudCover) for
    /// continuous crypto trading, which rarely produces a true session gap.
    #[serde(default = "default_true")]
    pub pattern_crypto_mode: bool,

    /// Restricts emission to efficiency-grade A/B patterns only.
    #[serde(default = "default_false")]
    pub pattern_high_efficiency_only: bool,

    /// Ranking sampler interval, in seconds.
    #[serde(default = "default_ranking_sample_interval_secs")]
    pub ranking_sample_interval_secs: u64,

    /// Maximum age of a retained ranking snapshot, in seconds.
    #[serde(default = "default_ranking_max_age_secs")]
    pub ranking_max_age_secs: u64,

    /// Ticker batching window, in milliseconds.
    #[serde(default = "default_ticker_batch_interval_ms")]
    pub ticker_batch_interval_ms: u64,

    /// Directory for persisted pivot cache, signal history, and ranking
    /// snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Whether emitted pivot signals are appended to disk.
    #[serde(default = "default_true")]
    pub enable_signal_persistence: bool,

    /// Whether detected pattern signals are appended to disk.
    #[serde(default = "default_false")]
    pub enable_pattern_persistence: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            kline_interval_minutes: default_kline_interval_minutes(),
            kline_max_count: default_kline_max_count(),
            cooldown_ttl_secs: default_cooldown_ttl_secs(),
            correlation_window_secs: default_correlation_window_secs(),
            pivot_refresh_worker_pool: default_pivot_refresh_worker_pool(),
            pivot_timezone_offset_hours: default_pivot_timezone_offset_hours(),
            signal_history_capacity: default_signal_history_capacity(),
            pattern_min_confidence: default_pattern_min_confidence(),
            pattern_crypto_mode: true,
            pattern_high_efficiency_only: false,
            ranking_sample_interval_secs: default_ranking_sample_interval_secs(),
            ranking_max_age_secs: default_ranking_max_age_secs(),
            ticker_batch_interval_ms: default_ticker_batch_interval_ms(),
            data_dir: default_data_dir(),
            bind_addr: default_bind_addr(),
            enable_signal_persistence: true,
            enable_pattern_persistence: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), symbols = ?config.symbols, "runtime config loaded");

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.kline_interval_minutes, 5);
        assert_eq!(config.kline_max_count, 20);
        assert_eq!(config.cooldown_ttl_secs, 1800);
        assert_eq!(config.correlation_window_secs, 900);
        assert_eq!(config.pivot_refresh_worker_pool, 16);
        assert_eq!(config.pivot_timezone_offset_hours, 8);
        assert_eq!(config.signal_history_capacity, 10_000);
        assert_eq!(config.pattern_min_confidence, 60.0);
        assert!(config.pattern_crypto_mode);
        assert!(!config.pattern_high_efficiency_only);
        assert_eq!(config.ranking_sample_interval_secs, 300);
        assert_eq!(config.ranking_max_age_secs, 86_400);
        assert_eq!(config.ticker_batch_interval_ms, 500);
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.bind_addr, "0.0.0.0:8090");
        assert!(config.enable_signal_persistence);
        assert!(!config.enable_pattern_persistence);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{"symbols": ["BTCUSDT"]}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(config.kline_interval_minutes, 5);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("pivot-nexus-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut config = RuntimeConfig::default();
        config.symbols = vec!["ETHUSDT".to_string()];
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["ETHUSDT".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_missing_file_errors() {
        let result = RuntimeConfig::load("/nonexistent/path/runtime_config.json");
        assert!(result.is_err());
    }
}
