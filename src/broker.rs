// =============================================================================
// Broker — generic, topic-less pub-sub fan-out
// =============================================================================
//
// One `Broker<T>` instance per signal kind (`Broker<Signal>`,
// `Broker<PatternSignal>`, `Broker<TickerBatch>`). Publish never blocks: a
// subscriber whose buffer is full has the message dropped for it alone, all
// other subscribers are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

/// Opaque handle returned by [`Broker::subscribe`]; pass back to
/// [`Broker::unsubscribe`] to stop receiving further messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Broker<T: Clone + Send + 'static> {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber with the given bounded buffer size.
    pub fn subscribe(&self, buffer: usize) -> (SubscriptionId, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(id, tx);
        (SubscriptionId(id), rx)
    }

    /// Drop a subscriber. Dropping the sender side closes its receiver.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().remove(&id.0);
    }

    /// Fan `value` out to every subscriber. Never blocks: a full subscriber
    /// buffer drops the message for that subscriber only.
    pub fn publish(&self, value: T) {
        let subs = self.subscribers.read();
        for tx in subs.values() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(value.clone()) {
                trace!("broker subscriber buffer full, dropping message for it");
            }
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let broker: Broker<i32> = Broker::new();
        let (_id, mut rx) = broker.subscribe(4);
        broker.publish(42);
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn publish_order_preserved_per_subscriber() {
        let broker: Broker<i32> = Broker::new();
        let (_id, mut rx) = broker.subscribe(8);
        broker.publish(1);
        broker.publish(2);
        broker.publish(3);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_others() {
        let broker: Broker<i32> = Broker::new();
        let (_slow_id, slow_rx) = broker.subscribe(1);
        let (_fast_id, mut fast_rx) = broker.subscribe(4);

        broker.publish(1);
        broker.publish(2); // slow subscriber's buffer is full here, dropped
        broker.publish(3);

        assert_eq!(fast_rx.recv().await, Some(1));
        assert_eq!(fast_rx.recv().await, Some(2));
        assert_eq!(fast_rx.recv().await, Some(3));

        drop(slow_rx); // only received the first message; never blocked publish
    }

    #[tokio::test]
    async fn unsubscribe_closes_receiver() {
        let broker: Broker<i32> = Broker::new();
        let (id, mut rx) = broker.subscribe(4);
        broker.unsubscribe(id);
        broker.publish(99);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn subscriber_count_tracks_subscribe_unsubscribe() {
        let broker: Broker<i32> = Broker::new();
        assert_eq!(broker.subscriber_count(), 0);
        let (id, _rx) = broker.subscribe(1);
        assert_eq!(broker.subscriber_count(), 1);
        broker.unsubscribe(id);
        assert_eq!(broker.subscriber_count(), 0);
    }
}
