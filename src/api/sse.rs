// =============================================================================
// SSE surface — fan-in of signal/pattern/ticker brokers onto one event stream
// =============================================================================

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};

use crate::app_state::AppState;

/// One subscriber per broker, fanned into a single bounded channel so the
/// handler can hand axum a single `Stream<Item = Event>`.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    let (signal_id, mut signal_rx) = state.signal_broker.subscribe(32);
    let signal_broker = state.signal_broker.clone();
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            let Ok(data) = serde_json::to_string(&signal) else { continue };
            if signal_tx.send(Event::default().event("signal").data(data)).await.is_err() {
                break;
            }
        }
        signal_broker.unsubscribe(signal_id);
    });

    let (pattern_id, mut pattern_rx) = state.pattern_broker.subscribe(32);
    let pattern_broker = state.pattern_broker.clone();
    let pattern_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(signal) = pattern_rx.recv().await {
            let Ok(data) = serde_json::to_string(&signal) else { continue };
            if pattern_tx.send(Event::default().event("pattern").data(data)).await.is_err() {
                break;
            }
        }
        pattern_broker.unsubscribe(pattern_id);
    });

    let (ticker_id, mut ticker_rx) = state.ticker_broker.subscribe(8);
    let ticker_broker = state.ticker_broker.clone();
    let ticker_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(batch) = ticker_rx.recv().await {
            let Ok(data) = serde_json::to_string(&batch) else { continue };
            if ticker_tx.send(Event::default().event("ticker").data(data)).await.is_err() {
                break;
            }
        }
        ticker_broker.unsubscribe(ticker_id);
    });

    drop(tx);

    let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (Ok(event), rx)) });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}
