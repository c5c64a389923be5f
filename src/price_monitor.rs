// =============================================================================
// PriceMonitor (C5) — mark-price stream ingest, crossing detection
// =============================================================================

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::{GzDecoder, ZlibDecoder};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::combiner::Combiner;
use crate::cooldown::Cooldown;
use crate::kline::KlineStore;
use crate::pattern_history::PatternHistory;
use crate::patterns::{self, PatternDetectorConfig};
use crate::pivot::PivotStore;
use crate::signal::{CombinedSignal, PatternSignal, Signal};
use crate::signal_history::SignalHistory;
use crate::types::{Direction, Period};

const MARK_PRICE_STREAM_URL: &str = "wss://fstream.binance.com/ws/!markPrice@arr";
const CROSSING_LEVELS: [&str; 6] = ["R3", "R4", "R5", "S3", "S4", "S5"];

#[derive(Debug, Clone)]
struct MarkPriceEvent {
    symbol: String,
    mark_price: f64,
    event_time: DateTime<Utc>,
}

fn parse_single_event(value: &serde_json::Value) -> Option<MarkPriceEvent> {
    let symbol = value.get("s")?.as_str()?.to_uppercase();
    let mark_price: f64 = match value.get("p")? {
        serde_json::Value::String(s) => s.parse().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    let event_time_ms = match value.get("E")? {
        serde_json::Value::String(s) => s.parse().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    let event_time = Utc.timestamp_millis_opt(event_time_ms).single()?;
    Some(MarkPriceEvent {
        symbol,
        mark_price,
        event_time,
    })
}

fn parse_events_from_value(value: &serde_json::Value) -> Option<Vec<MarkPriceEvent>> {
    if let Some(array) = value.as_array() {
        let events: Vec<MarkPriceEvent> = array.iter().filter_map(parse_single_event).collect();
        return Some(events);
    }
    if let Some(data) = value.get("data") {
        return parse_events_from_value(data);
    }
    parse_single_event(value).map(|e| vec![e])
}

fn try_decompress(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut gz_out = Vec::new();
    if GzDecoder::new(bytes).read_to_end(&mut gz_out).is_ok() && !gz_out.is_empty() {
        return Some(gz_out);
    }
    let mut zlib_out = Vec::new();
    if ZlibDecoder::new(bytes).read_to_end(&mut zlib_out).is_ok() && !zlib_out.is_empty() {
        return Some(zlib_out);
    }
    let mut deflate_out = Vec::new();
    if flate2::read::DeflateDecoder::new(bytes).read_to_end(&mut deflate_out).is_ok() && !deflate_out.is_empty() {
        return Some(deflate_out);
    }
    None
}

/// Decode cascade: direct array, `{data:[...]}` wrapper, single event,
/// trimmed-tail repair, then decompression (gzip/zlib/raw-deflate) + re-parse.
fn decode_mark_price_message(text: &str, bytes: &[u8]) -> Vec<MarkPriceEvent> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(events) = parse_events_from_value(&value) {
            if !events.is_empty() {
                return events;
            }
        }
    }

    let trimmed = text.trim_end_matches(|c: char| !matches!(c, ']' | '}'));
    if trimmed != text && !trimmed.is_empty() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(events) = parse_events_from_value(&value) {
                if !events.is_empty() {
                    return events;
                }
            }
        }
    }

    if let Some(decompressed) = try_decompress(bytes) {
        if let Ok(text) = String::from_utf8(decompressed) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if let Some(events) = parse_events_from_value(&value) {
                    return events;
                }
            }
        }
    }

    Vec::new()
}

fn crosses(prev: f64, new: f64, level: f64) -> Option<Direction> {
    if prev < level && new >= level {
        Some(Direction::Up)
    } else if prev > level && new <= level {
        Some(Direction::Down)
    } else {
        None
    }
}

pub struct PriceMonitor {
    pivots: Arc<PivotStore>,
    klines: Option<Arc<KlineStore>>,
    cooldown: Arc<Cooldown>,
    history: Arc<SignalHistory>,
    combiner: Arc<Combiner>,
    broker: Arc<Broker<Signal>>,
    pattern_broker: Arc<Broker<PatternSignal>>,
    pattern_history: Arc<PatternHistory>,
    combined_broker: Arc<Broker<CombinedSignal>>,
    pattern_config: PatternDetectorConfig,
    last_price: RwLock<HashMap<String, f64>>,
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
}

impl PriceMonitor {
    pub fn new(
        pivots: Arc<PivotStore>,
        klines: Option<Arc<KlineStore>>,
        cooldown: Arc<Cooldown>,
        history: Arc<SignalHistory>,
        combiner: Arc<Combiner>,
        broker: Arc<Broker<Signal>>,
        pattern_broker: Arc<Broker<PatternSignal>>,
        pattern_history: Arc<PatternHistory>,
        combined_broker: Arc<Broker<CombinedSignal>>,
        pattern_config: PatternDetectorConfig,
    ) -> Self {
        Self {
            pivots,
            klines,
            cooldown,
            history,
            combiner,
            broker,
            pattern_broker,
            pattern_history,
            combined_broker,
            pattern_config,
            last_price: RwLock::new(HashMap::new()),
            events_processed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    fn handle_kline_close(&self, symbol: &str, close_event: crate::kline::KlineCloseEvent) {
        let detected = patterns::detect(&close_event.history, &self.pattern_config);
        if detected.is_empty() {
            return;
        }
        let kline_close_time = close_event
            .history
            .last()
            .map(|k| k.close_time.timestamp())
            .unwrap_or(0);
        let signals = patterns::build_signals(symbol, kline_close_time, &detected, &self.pivots);
        for signal in signals {
            self.pattern_history.add(signal.clone());
            let combined = self.combiner.add_pattern_signal(signal.clone());
            self.pattern_broker.publish(signal);
            for c in combined {
                debug!(symbol = %symbol, "pattern correlated with pivot crossing");
                self.combined_broker.publish(c);
            }
        }
    }

    fn handle_event(&self, event: MarkPriceEvent) {
        if let Some(klines) = &self.klines {
            if let Some(close_event) = klines.update(&event.symbol, event.mark_price, event.event_time) {
                self.handle_kline_close(&event.symbol, close_event);
            }
        }

        let previous = {
            let mut guard = self.last_price.write();
            guard.insert(event.symbol.clone(), event.mark_price)
        };

        let Some(prev) = previous else {
            return;
        };

        for period in Period::ALL {
            let Some(levels) = self.pivots.get_levels(period, &event.symbol) else {
                continue;
            };
            let named = levels.named_crossing_levels();
            for (name, value) in named {
                if value == 0.0 {
                    continue;
                }
                let Some(direction) = crosses(prev, event.mark_price, value) else {
                    continue;
                };
                let cooldown_key = format!("{}|{}|{}", event.symbol, period, name);
                if !self.cooldown.allow(&cooldown_key, event.event_time) {
                    continue;
                }
                let signal = Signal::new(
                    event.symbol.clone(),
                    period,
                    name,
                    event.mark_price,
                    direction,
                    event.event_time,
                    "price_monitor",
                );
                self.history.add(signal.clone());
                let combined = self.combiner.add_pivot_signal(signal.clone());
                self.broker.publish(signal);
                for c in combined {
                    debug!(symbol = %event.symbol, "pivot crossing correlated with pattern");
                    self.combined_broker.publish(c);
                }
            }
        }
    }

    fn note_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn note_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> (u64, u64) {
        (
            self.events_processed.load(Ordering::Relaxed),
            self.events_dropped.load(Ordering::Relaxed),
        )
    }
}

/// Connects once, reads until disconnect or error, and returns so the caller
/// drives reconnection with exponential backoff. Runs a sibling ping task
/// (20s) alongside the single reader.
pub async fn run_price_monitor(monitor: &Arc<PriceMonitor>) -> Result<()> {
    info!(url = MARK_PRICE_STREAM_URL, "connecting to mark-price WebSocket");
    let (ws_stream, _response) = connect_async(MARK_PRICE_STREAM_URL)
        .await
        .context("failed to connect to mark-price WebSocket")?;
    info!("mark-price WebSocket connected");
    let (mut write, mut read) = ws_stream.split();

    let ping_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        loop {
            ticker.tick().await;
            if write.send(Message::Ping(Vec::new())).await.is_err() {
                break;
            }
        }
    });

    let result = async {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let events = decode_mark_price_message(&text, text.as_bytes());
                    if events.is_empty() {
                        monitor.note_dropped();
                        warn!(sample = %text.chars().take(200).collect::<String>(), "dropped unparseable mark-price message");
                    } else {
                        for event in events {
                            monitor.handle_event(event);
                            monitor.note_processed();
                        }
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let events = decode_mark_price_message("", &bytes);
                    if events.is_empty() {
                        monitor.note_dropped();
                    } else {
                        for event in events {
                            monitor.handle_event(event);
                            monitor.note_processed();
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "mark-price WebSocket read error");
                    bail!("mark-price WebSocket read error: {e}");
                }
                None => {
                    warn!("mark-price WebSocket stream ended");
                    bail!("mark-price WebSocket stream ended");
                }
            }
        }
    }
    .await;

    ping_handle.abort();
    result
}

/// Reconnect loop with exponential backoff (1s -> 30s, reset on success).
pub async fn run_with_backoff(monitor: Arc<PriceMonitor>) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let start = tokio::time::Instant::now();
        if let Err(e) = run_price_monitor(&monitor).await {
            error!(error = %e, "price monitor disconnected");
        }
        if start.elapsed() > Duration::from_secs(60) {
            backoff = Duration::from_secs(1);
        } else {
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
        tokio::time::sleep(backoff).await;
    }
}

pub async fn run_heartbeat(monitor: Arc<PriceMonitor>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let (processed, dropped) = monitor.counters();
        info!(processed, dropped, "price monitor heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::LevelTable;

    fn pivots_with_r4(symbol: &str, level: f64) -> Arc<PivotStore> {
        let store = Arc::new(PivotStore::new());
        let mut levels = LevelTable::default();
        levels.r4 = level;
        let mut snapshot = crate::pivot::Snapshot {
            period: Period::Daily,
            updated_at: Utc::now(),
            levels: HashMap::new(),
        };
        snapshot.levels.insert(symbol.to_string(), levels);
        store.swap(Period::Daily, snapshot);
        store
    }

    fn monitor_with(store: Arc<PivotStore>) -> Arc<PriceMonitor> {
        Arc::new(PriceMonitor::new(
            store,
            None,
            Arc::new(Cooldown::new(Duration::from_secs(1800))),
            Arc::new(SignalHistory::new(1000)),
            Arc::new(Combiner::new(Duration::from_secs(900))),
            Arc::new(Broker::new()),
            Arc::new(Broker::new()),
            Arc::new(PatternHistory::new(1000)),
            Arc::new(Broker::new()),
            PatternDetectorConfig::default(),
        ))
    }

    #[test]
    fn s1_crossing_emits_once_then_cooldown_suppresses_repeat() {
        let store = pivots_with_r4("BTCUSDT", 50000.0);
        let monitor = monitor_with(store);
        let (_id, mut rx) = monitor.broker.subscribe(8);

        let t0 = Utc::now();
        monitor.handle_event(MarkPriceEvent {
            symbol: "BTCUSDT".to_string(),
            mark_price: 49500.0,
            event_time: t0,
        });
        monitor.handle_event(MarkPriceEvent {
            symbol: "BTCUSDT".to_string(),
            mark_price: 50100.0,
            event_time: t0 + chrono::Duration::seconds(1),
        });
        monitor.handle_event(MarkPriceEvent {
            symbol: "BTCUSDT".to_string(),
            mark_price: 50050.0,
            event_time: t0 + chrono::Duration::seconds(2),
        });

        let signal = rx.try_recv().expect("expected one signal");
        assert_eq!(signal.level, "R4");
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.price, 50100.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn first_observation_never_crosses() {
        let store = pivots_with_r4("BTCUSDT", 50000.0);
        let monitor = monitor_with(store);
        let (_id, mut rx) = monitor.broker.subscribe(8);
        monitor.handle_event(MarkPriceEvent {
            symbol: "BTCUSDT".to_string(),
            mark_price: 50100.0,
            event_time: Utc::now(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn parses_direct_array_message() {
        let text = r#"[{"s":"BTCUSDT","p":"50000.5","E":1700000000000}]"#;
        let events = decode_mark_price_message(text, text.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol, "BTCUSDT");
        assert_eq!(events[0].mark_price, 50000.5);
    }

    #[test]
    fn s5_parses_wrapped_single_event() {
        let text = r#"{"data":{"s":"ETHUSDT","p":2500.25,"E":1700000000000}}"#;
        let events = decode_mark_price_message(text, text.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol, "ETHUSDT");
    }

    #[test]
    fn trimmed_tail_repair_recovers_truncated_array() {
        let text = r#"[{"s":"BTCUSDT","p":"50000.5","E":1700000000000}]garbage"#;
        let events = decode_mark_price_message(text, text.as_bytes());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unparseable_message_drops_cleanly() {
        let text = "not json at all";
        let events = decode_mark_price_message(text, text.as_bytes());
        assert!(events.is_empty());
    }
}
