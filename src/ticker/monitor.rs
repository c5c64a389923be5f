// =============================================================================
// TickerMonitor — ingests the all-symbol 24h ticker stream and batches
// fan-out through the broker on a fixed coalescing window
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::ticker::{Ticker, TickerBatch, TickerStore};

const TICKER_STREAM_URL: &str = "wss://stream.binance.com:9443/ws/!ticker@arr";

/// Accepts a numeric field delivered as either a JSON number or a JSON string,
/// losslessly for 64-bit integers.
fn parse_numeric_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n.as_f64().with_context(|| format!("field {name} is not f64")),
        _ => bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_numeric_i64(val: &serde_json::Value, name: &str) -> Result<i64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as i64: {s}")),
        serde_json::Value::Number(n) => n.as_i64().with_context(|| format!("field {name} is not i64")),
        _ => bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_ticker_event(event: &serde_json::Value) -> Result<Ticker> {
    let symbol = event["s"].as_str().context("missing field s")?.to_uppercase();
    let last_price = parse_numeric_f64(&event["c"], "c")?;
    let price_percent = parse_numeric_f64(&event["P"], "P")?;
    let quote_volume = parse_numeric_f64(&event["q"], "q")?;
    let trade_count = parse_numeric_i64(&event["n"], "n")?;
    let updated_at = parse_numeric_i64(&event["E"], "E")?;
    Ok(Ticker {
        symbol,
        last_price,
        price_percent,
        trade_count,
        quote_volume,
        updated_at,
    })
}

fn parse_ticker_array(text: &str) -> Result<Vec<Ticker>> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse ticker array JSON")?;
    let events = root.as_array().context("ticker message is not a JSON array")?;
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        match parse_ticker_event(event) {
            Ok(t) => out.push(t),
            Err(e) => warn!(error = %e, "skipping malformed ticker event"),
        }
    }
    Ok(out)
}

/// Connects once, reads until disconnect or error, and returns so the caller
/// drives reconnection with backoff.
pub async fn run_ticker_stream(store: &Arc<TickerStore>) -> Result<()> {
    info!(url = TICKER_STREAM_URL, "connecting to ticker WebSocket");
    let (ws_stream, _response) = connect_async(TICKER_STREAM_URL)
        .await
        .context("failed to connect to ticker WebSocket")?;
    info!("ticker WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_ticker_array(&text) {
                        Ok(tickers) => {
                            for t in tickers {
                                store.update(t);
                            }
                        }
                        Err(e) => debug!(error = %e, "failed to parse ticker array"),
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "ticker WebSocket read error");
                bail!("ticker WebSocket read error: {e}");
            }
            None => {
                warn!("ticker WebSocket stream ended");
                bail!("ticker WebSocket stream ended");
            }
        }
    }
}

/// Reconnect loop with exponential backoff (1s -> 30s, reset on success).
pub async fn run_with_backoff(store: Arc<TickerStore>) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let start = tokio::time::Instant::now();
        if let Err(e) = run_ticker_stream(&store).await {
            error!(error = %e, "ticker stream disconnected");
        }
        if start.elapsed() > Duration::from_secs(60) {
            backoff = Duration::from_secs(1);
        } else {
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
        tokio::time::sleep(backoff).await;
    }
}

/// Fires every `batch_interval`: snapshot and clear the pending-dirty set,
/// then publish one coalesced `TickerBatch`. Subscribers never see per-event
/// updates.
pub async fn run_batcher(store: Arc<TickerStore>, broker: Arc<Broker<TickerBatch>>, batch_interval: Duration) {
    let mut ticker = tokio::time::interval(batch_interval);
    loop {
        ticker.tick().await;
        let dirty = store.drain_dirty();
        if dirty.is_empty() {
            continue;
        }
        let tickers = store.snapshot_for(&dirty);
        let batch = TickerBatch {
            tickers,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        broker.publish(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_numeric_and_string_fields() {
        let text = r#"[
            {"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","P":"1.23","c":"43000.5","q":"9999999.12","n":12345},
            {"e":"24hrTicker","E":"1700000000001","s":"ETHUSDT","P":2.5,"c":2500.0,"q":123456.0,"n":"678"}
        ]"#;
        let tickers = parse_ticker_array(text).unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].symbol, "BTCUSDT");
        assert_eq!(tickers[0].last_price, 43000.5);
        assert_eq!(tickers[1].trade_count, 678);
        assert_eq!(tickers[1].updated_at, 1_700_000_000_001);
    }

    #[test]
    fn skips_malformed_events_without_failing_the_batch() {
        let text = r#"[{"e":"24hrTicker","s":"BTCUSDT"}, {"e":"24hrTicker","E":1,"s":"ETHUSDT","P":"1.0","c":"10.0","q":"1.0","n":1}]"#;
        let tickers = parse_ticker_array(text).unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "ETHUSDT");
    }

    #[tokio::test]
    async fn batcher_coalesces_multiple_updates_into_one_publish() {
        let store = Arc::new(TickerStore::new());
        let broker = Arc::new(Broker::<TickerBatch>::new());
        let (_id, mut rx) = broker.subscribe(8);

        store.update(Ticker {
            symbol: "BTCUSDT".to_string(),
            last_price: 1.0,
            price_percent: 0.0,
            trade_count: 1,
            quote_volume: 1.0,
            updated_at: 0,
        });
        store.update(Ticker {
            symbol: "BTCUSDT".to_string(),
            last_price: 2.0,
            price_percent: 0.0,
            trade_count: 2,
            quote_volume: 2.0,
            updated_at: 1,
        });

        let dirty = store.drain_dirty();
        assert_eq!(dirty.len(), 1);
        let tickers = store.snapshot_for(&dirty);
        broker.publish(TickerBatch {
            tickers,
            timestamp_ms: 0,
        });

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.tickers.get("BTCUSDT").unwrap().last_price, 2.0);
    }
}
