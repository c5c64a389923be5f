// =============================================================================
// Sampler — periodically snapshots TickerStore into dense-ranked RankingStore
// entries
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::ranking::{dense_rank, RankingEntry, RankingStore, Snapshot};
use crate::ticker::TickerStore;

fn is_rankable_symbol(symbol: &str) -> bool {
    symbol.ends_with("USDT") && symbol.len() > 4
}

/// Build one ranking snapshot from the current ticker universe. Pure
/// function so the dense-rank composition can be tested without a running
/// store.
pub fn build_snapshot(tickers: &std::collections::HashMap<String, crate::ticker::Ticker>) -> Snapshot {
    let rankable: Vec<(&String, &crate::ticker::Ticker)> =
        tickers.iter().filter(|(s, _)| is_rankable_symbol(s)).collect();

    let volume_values: Vec<(String, f64)> = rankable.iter().map(|(s, t)| ((*s).clone(), t.quote_volume)).collect();
    let trade_values: Vec<(String, f64)> =
        rankable.iter().map(|(s, t)| ((*s).clone(), t.trade_count as f64)).collect();

    let volume_ranks = dense_rank(&volume_values);
    let trade_ranks = dense_rank(&trade_values);

    let entries = rankable
        .into_iter()
        .map(|(symbol, t)| {
            (
                symbol.clone(),
                RankingEntry {
                    price: t.last_price,
                    volume: t.quote_volume,
                    trade_count: t.trade_count,
                    volume_rank: volume_ranks.get(symbol).copied().unwrap_or(0),
                    trades_rank: trade_ranks.get(symbol).copied().unwrap_or(0),
                },
            )
        })
        .collect();

    Snapshot {
        timestamp: Utc::now(),
        entries,
    }
}

/// Runs forever at `interval`. Before the first sample, polls every 2s until
/// the ticker store has any data at all, so the initial snapshot isn't empty.
pub async fn run_sampler(ticker_store: Arc<TickerStore>, ranking_store: Arc<RankingStore>, interval: Duration) {
    while ticker_store.is_empty() {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = build_snapshot(&ticker_store.snapshot());
        let count = snapshot.entries.len();
        ranking_store.append(snapshot);
        info!(symbols = count, "appended ranking snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::Ticker;
    use std::collections::HashMap;

    fn ticker(symbol: &str, volume: f64, trade_count: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 1.0,
            price_percent: 0.0,
            trade_count,
            quote_volume: volume,
            updated_at: 0,
        }
    }

    #[test]
    fn s4_filters_to_usdt_pairs_with_dense_ranks() {
        let mut tickers = HashMap::new();
        tickers.insert("BTCUSDT".to_string(), ticker("BTCUSDT", 100.0, 5));
        tickers.insert("ETHUSDT".to_string(), ticker("ETHUSDT", 100.0, 5));
        tickers.insert("SOLUSDT".to_string(), ticker("SOLUSDT", 50.0, 3));
        tickers.insert("FOOBTC".to_string(), ticker("FOOBTC", 999.0, 100));

        let snapshot = build_snapshot(&tickers);
        assert_eq!(snapshot.entries.len(), 3);
        assert!(!snapshot.entries.contains_key("FOOBTC"));
        assert_eq!(snapshot.entries["BTCUSDT"].volume_rank, 1);
        assert_eq!(snapshot.entries["ETHUSDT"].volume_rank, 1);
        assert_eq!(snapshot.entries["SOLUSDT"].volume_rank, 2);
    }

    #[test]
    fn rejects_short_symbols() {
        assert!(!is_rankable_symbol("USDT"));
        assert!(is_rankable_symbol("BTCUSDT"));
    }
}
