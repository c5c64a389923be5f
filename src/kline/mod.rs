// =============================================================================
// KlineStore — virtual OHLC aggregator with rolling history and close-callback
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single synthesized OHLC bar.
///
/// Invariants while building: `open` = first price seen, `high` >=
/// max(open, close, every input), `low` <= min(open, close, every input),
/// `close` = last input, `high` >= `low`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Kline {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub is_closed: bool,
}

impl Kline {
    fn start(open_time: DateTime<Utc>, interval_minutes: u32, price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            open_time,
            close_time: open_time + chrono::Duration::minutes(interval_minutes as i64),
            is_closed: false,
        }
    }

    fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Floor `ts` to the kline open boundary for `interval_minutes`: the minute
/// component is floored to the nearest multiple of `interval_minutes` within
/// the same hour, with seconds/sub-seconds zeroed.
pub fn align(ts: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval_minutes = interval_minutes.max(1);
    let floored_minute = (ts.minute() / interval_minutes) * interval_minutes;
    ts.with_minute(floored_minute)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap()
}

/// Per-symbol kline state: the in-progress candle (if any), bounded history
/// (oldest first, newest last), and the last-seen timestamp.
struct SymbolKlines {
    current: Option<Kline>,
    history: Vec<Kline>,
    last_seen: DateTime<Utc>,
}

/// Snapshot dispatched to the close-callback: symbol plus the deep-copied,
/// freshly trimmed history.
#[derive(Debug, Clone)]
pub struct KlineCloseEvent {
    pub symbol: String,
    pub history: Vec<Kline>,
}

pub struct KlineStore {
    interval_minutes: u32,
    max_count: usize,
    symbols: RwLock<HashMap<String, SymbolKlines>>,
}

impl KlineStore {
    pub fn new(interval_minutes: u32, max_count: usize) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1),
            max_count: max_count.max(1),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one price tick. Returns `Some(KlineCloseEvent)` when this update
    /// closed the in-progress candle; the caller must dispatch it to the
    /// pattern detector / combiner *after* releasing any locks it holds —
    /// this method itself holds the internal lock only for the duration of
    /// the mutation, never across the callback.
    pub fn update(&self, symbol: &str, price: f64, ts: DateTime<Utc>) -> Option<KlineCloseEvent> {
        if price <= 0.0 {
            return None;
        }

        let mut map = self.symbols.write();
        let entry = map.entry(symbol.to_string()).or_insert_with(|| SymbolKlines {
            current: None,
            history: Vec::new(),
            last_seen: ts,
        });
        entry.last_seen = ts;

        match entry.current {
            Some(current) if current.close_time <= ts => {
                let mut closed = current;
                closed.is_closed = true;
                entry.history.push(closed);
                while entry.history.len() > self.max_count {
                    entry.history.remove(0);
                }
                let snapshot = entry.history.clone();

                let open_time = align(ts, self.interval_minutes);
                entry.current = Some(Kline::start(open_time, self.interval_minutes, price));

                Some(KlineCloseEvent {
                    symbol: symbol.to_string(),
                    history: snapshot,
                })
            }
            Some(ref mut current) => {
                current.update(price);
                None
            }
            None => {
                let open_time = align(ts, self.interval_minutes);
                entry.current = Some(Kline::start(open_time, self.interval_minutes, price));
                None
            }
        }
    }

    /// Deep-copied history (oldest first, newest last), independent of
    /// internal state.
    pub fn history(&self, symbol: &str) -> Vec<Kline> {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn current(&self, symbol: &str) -> Option<Kline> {
        self.symbols.read().get(symbol).and_then(|s| s.current)
    }
}

/// Background timer that force-closes klines whose period has elapsed with
/// no intervening price update. Gated on a config flag; spec explicitly
/// allows omitting it when the price stream is dense enough that this never
/// fires in practice.
pub async fn run_boundary_timer(store: Arc<KlineStore>, interval_minutes: u32) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(
        (interval_minutes.max(1) as u64) * 60,
    ));
    loop {
        tick.tick().await;
        let stale_symbols: Vec<String> = {
            let map = store.symbols.read();
            let now = Utc::now();
            map.iter()
                .filter(|(_, s)| s.current.map(|k| k.close_time <= now).unwrap_or(false))
                .map(|(sym, _)| sym.clone())
                .collect()
        };
        for symbol in stale_symbols {
            if let Some(current) = store.current(&symbol) {
                store.update(&symbol, current.close, current.close_time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn align_floors_minute_to_interval_multiple() {
        let t = ts(7, 30);
        let aligned = align(t, 5);
        assert_eq!(aligned.minute(), 5);
        assert_eq!(aligned.second(), 0);
        assert_eq!(aligned.nanosecond(), 0);
    }

    #[test]
    fn align_is_idempotent_on_boundary() {
        let t = ts(10, 0);
        assert_eq!(align(t, 5), align(align(t, 5), 5));
    }

    #[test]
    fn update_tracks_ohlc_invariants() {
        let store = KlineStore::new(5, 20);
        store.update("BTCUSDT", 100.0, ts(0, 0));
        store.update("BTCUSDT", 105.0, ts(1, 0));
        store.update("BTCUSDT", 95.0, ts(2, 0));
        store.update("BTCUSDT", 102.0, ts(3, 0));

        let current = store.current("BTCUSDT").unwrap();
        assert_eq!(current.open, 100.0);
        assert_eq!(current.close, 102.0);
        assert_eq!(current.high, 105.0);
        assert_eq!(current.low, 95.0);
        assert!(current.high >= current.low);
    }

    #[test]
    fn close_ignores_non_positive_price() {
        let store = KlineStore::new(5, 20);
        store.update("BTCUSDT", 100.0, ts(0, 0));
        store.update("BTCUSDT", -5.0, ts(1, 0));
        store.update("BTCUSDT", 0.0, ts(1, 1));
        let current = store.current("BTCUSDT").unwrap();
        assert_eq!(current.close, 100.0);
    }

    #[test]
    fn crossing_interval_closes_and_starts_new_kline() {
        let store = KlineStore::new(5, 20);
        store.update("BTCUSDT", 100.0, ts(0, 0));
        store.update("BTCUSDT", 110.0, ts(4, 59));
        let event = store.update("BTCUSDT", 120.0, ts(5, 0));
        assert!(event.is_some());
        let history = event.unwrap().history;
        assert_eq!(history.len(), 1);
        assert!(history[0].is_closed);
        assert_eq!(history[0].close, 110.0);

        let current = store.current("BTCUSDT").unwrap();
        assert_eq!(current.open, 120.0);
        assert!(!current.is_closed);
    }

    #[test]
    fn history_is_trimmed_to_max_count() {
        let store = KlineStore::new(5, 3);
        for i in 0..10 {
            store.update("BTCUSDT", 100.0 + i as f64, ts(i * 5, 0));
        }
        assert!(store.history("BTCUSDT").len() <= 3);
    }

    #[test]
    fn history_is_independent_of_internal_state() {
        let store = KlineStore::new(5, 20);
        store.update("BTCUSDT", 100.0, ts(0, 0));
        store.update("BTCUSDT", 200.0, ts(5, 0));
        let mut snapshot = store.history("BTCUSDT");
        snapshot.clear();
        assert_eq!(store.history("BTCUSDT").len(), 1);
    }
}
