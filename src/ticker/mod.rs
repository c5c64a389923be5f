pub mod monitor;

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A 24h ticker snapshot for one symbol. Mutable, last-writer-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub price_percent: f64,
    pub trade_count: i64,
    pub quote_volume: f64,
    pub updated_at: i64,
}

/// One coalesced fan-out unit published by the batching task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerBatch {
    pub tickers: HashMap<String, Ticker>,
    pub timestamp_ms: i64,
}

pub struct TickerStore {
    tickers: RwLock<HashMap<String, Ticker>>,
    dirty: RwLock<HashSet<String>>,
}

impl TickerStore {
    pub fn new() -> Self {
        Self {
            tickers: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
        }
    }

    pub fn update(&self, ticker: Ticker) {
        let symbol = ticker.symbol.clone();
        self.tickers.write().insert(symbol.clone(), ticker);
        self.dirty.write().insert(symbol);
    }

    /// Snapshot and clear the pending-dirty set. Called by the batching task.
    pub fn drain_dirty(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.write())
    }

    pub fn get(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.read().get(symbol).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, Ticker> {
        self.tickers.read().clone()
    }

    pub fn snapshot_for(&self, symbols: &HashSet<String>) -> HashMap<String, Ticker> {
        let guard = self.tickers.read();
        symbols
            .iter()
            .filter_map(|s| guard.get(s).map(|t| (s.clone(), t.clone())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.read().is_empty()
    }
}

impl Default for TickerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_percent: 1.0,
            trade_count: 10,
            quote_volume: 1000.0,
            updated_at: 0,
        }
    }

    #[test]
    fn update_is_last_writer_wins() {
        let store = TickerStore::new();
        store.update(ticker("BTCUSDT", 100.0));
        store.update(ticker("BTCUSDT", 105.0));
        assert_eq!(store.get("BTCUSDT").unwrap().last_price, 105.0);
    }

    #[test]
    fn drain_dirty_clears_pending_set() {
        let store = TickerStore::new();
        store.update(ticker("BTCUSDT", 100.0));
        store.update(ticker("ETHUSDT", 200.0));
        let dirty = store.drain_dirty();
        assert_eq!(dirty.len(), 2);
        assert!(store.drain_dirty().is_empty());
    }

    #[test]
    fn snapshot_for_filters_to_requested_symbols() {
        let store = TickerStore::new();
        store.update(ticker("BTCUSDT", 100.0));
        store.update(ticker("ETHUSDT", 200.0));
        let mut wanted = HashSet::new();
        wanted.insert("BTCUSDT".to_string());
        let snap = store.snapshot_for(&wanted);
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("BTCUSDT"));
    }
}
