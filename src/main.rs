// =============================================================================
// Pivot Signal Engine — Main Entry Point
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod combiner;
mod cooldown;
mod kline;
mod pattern_history;
mod patterns;
mod pivot;
mod price_monitor;
mod ranking;
mod runtime_config;
mod signal;
mod signal_history;
mod ticker;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::pivot::{PivotRefresher, PivotStore, RestPreviousOhlcSource};
use crate::runtime_config::RuntimeConfig;
use crate::types::Period;

const CONFIG_PATH: &str = "runtime_config.json";
const BINANCE_FUTURES_EXCHANGE_INFO_URL: &str = "https://fapi.binance.com/fapi/v1/exchangeInfo";
const BINANCE_FUTURES_KLINES_URL_TEMPLATE: &str =
    "https://fapi.binance.com/fapi/v1/klines?symbol={symbol}&interval={interval}&limit=2";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("pivot signal engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(syms) = std::env::var("PIVOT_ENGINE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(bind_addr) = std::env::var("PIVOT_ENGINE_BIND_ADDR") {
        config.bind_addr = bind_addr;
    }
    if let Ok(data_dir) = std::env::var("PIVOT_ENGINE_DATA_DIR") {
        config.data_dir = data_dir;
    }

    info!(symbols = ?config.symbols, bind_addr = %config.bind_addr, "runtime config resolved");

    // ── 2. Build pivot refresher and load any cached snapshot ────────────
    let pivot_store = Arc::new(PivotStore::new());
    let ohlc_source = Arc::new(RestPreviousOhlcSource::new(
        BINANCE_FUTURES_EXCHANGE_INFO_URL.to_string(),
        BINANCE_FUTURES_KLINES_URL_TEMPLATE.to_string(),
    ));
    let pivot_refresher = Arc::new(PivotRefresher::new(
        pivot_store.clone(),
        ohlc_source,
        config.data_dir.clone(),
        config.pivot_timezone_offset_hours,
        config.pivot_refresh_worker_pool,
        config.symbols.clone(),
    ));
    pivot_refresher.load_from_disk();

    // ── 3. Build shared state ─────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, pivot_store, pivot_refresher.clone()));
    state.ranking_store.load(&state.data_dir());

    // ── 4. Spawn the price monitor (pivot crossings + virtual klines) ────
    let monitor = Arc::new(price_monitor::PriceMonitor::new(
        state.pivot_store.clone(),
        Some(state.kline_store.clone()),
        state.cooldown.clone(),
        state.signal_history.clone(),
        state.combiner.clone(),
        state.signal_broker.clone(),
        state.pattern_broker.clone(),
        state.pattern_history.clone(),
        state.combined_broker.clone(),
        state.pattern_config.read().clone(),
    ));
    {
        let monitor = monitor.clone();
        tokio::spawn(async move { price_monitor::run_with_backoff(monitor).await });
    }
    {
        let monitor = monitor.clone();
        tokio::spawn(async move { price_monitor::run_heartbeat(monitor, Duration::from_secs(60)).await });
    }

    // ── 5. Spawn the kline boundary timer ─────────────────────────────────
    {
        let kline_store = state.kline_store.clone();
        let interval_minutes = state.runtime_config.read().kline_interval_minutes;
        tokio::spawn(async move { kline::run_boundary_timer(kline_store, interval_minutes).await });
    }

    // ── 6. Spawn the ticker stream + batcher ──────────────────────────────
    {
        let ticker_store = state.ticker_store.clone();
        tokio::spawn(async move { ticker::monitor::run_with_backoff(ticker_store).await });
    }
    {
        let ticker_store = state.ticker_store.clone();
        let ticker_broker = state.ticker_broker.clone();
        let batch_interval = Duration::from_millis(state.runtime_config.read().ticker_batch_interval_ms);
        tokio::spawn(async move { ticker::monitor::run_batcher(ticker_store, ticker_broker, batch_interval).await });
    }

    // ── 7. Spawn the ranking sampler ──────────────────────────────────────
    {
        let ticker_store = state.ticker_store.clone();
        let ranking_store = state.ranking_store.clone();
        let interval = Duration::from_secs(state.runtime_config.read().ranking_sample_interval_secs);
        tokio::spawn(async move { ranking::sampler::run_sampler(ticker_store, ranking_store, interval).await });
    }

    // ── 8. Spawn the combiner cleanup loop ────────────────────────────────
    {
        let combiner = state.combiner.clone();
        tokio::spawn(async move { combiner.run_cleanup_loop().await });
    }

    // ── 9. Spawn the pivot refresher schedulers ───────────────────────────
    {
        let refresher = pivot_refresher.clone();
        tokio::spawn(async move { refresher.run_scheduler(Period::Daily).await });
    }
    {
        let refresher = pivot_refresher.clone();
        tokio::spawn(async move { refresher.run_scheduler(Period::Weekly).await });
    }

    // ── 10. Start the HTTP + SSE server ───────────────────────────────────
    let bind_addr = state.runtime_config.read().bind_addr.clone();
    {
        let api_state = state.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 11. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }
    state.ranking_store.persist(&state.data_dir());

    info!("pivot signal engine shut down complete");
    Ok(())
}
