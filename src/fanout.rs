//! In-process pub/sub: one producer, many late-joining consumers.
//!
//! Unlike `tokio::sync::broadcast`, a [`Fanout`] never drops items for a slow
//! consumer — each consumer gets its own unbounded queue, so a renderer that
//! momentarily falls behind can never cause another consumer to miss an
//! event. That guarantee is load-bearing here: losing a `Stopped` event
//! would leave the supervisor's live-command set permanently wrong.

use tokio::sync::mpsc;

/// A single subscriber's end of a [`Fanout`].
pub struct Consumer<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Consumer<T> {
    /// Receive the next item, in publish order. Returns `None` once the
    /// fanout (all producer handles) has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Number of items currently queued and not yet received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.len() == 0
    }
}

/// Producer side of the pub/sub. Cloning shares the same consumer set, so
/// multiple tasks can publish into one [`Fanout`].
#[derive(Clone)]
pub struct Fanout<T> {
    consumers: std::sync::Arc<std::sync::Mutex<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> Fanout<T> {
    pub fn new() -> Self {
        Self {
            consumers: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Register a new consumer. Only items published *after* this call are
    /// delivered to it — consumers created before any `put` see everything.
    pub fn consumer(&self) -> Consumer<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.lock().unwrap().push(tx);
        Consumer { rx }
    }

    /// Publish `item` to every registered consumer. Never blocks on
    /// backpressure — an unbounded send only fails if a consumer was
    /// dropped, which we treat as that consumer unsubscribing.
    pub fn put(&self, item: T) {
        let mut consumers = self.consumers.lock().unwrap();
        consumers.retain(|tx| tx.send(item.clone()).is_ok());
    }
}

impl<T: Clone> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumers_created_before_put_see_everything() {
        let fanout: Fanout<i32> = Fanout::new();
        let mut a = fanout.consumer();
        let mut b = fanout.consumer();

        fanout.put(1);
        fanout.put(2);
        fanout.put(3);

        for expected in [1, 2, 3] {
            assert_eq!(a.recv().await, Some(expected));
            assert_eq!(b.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn late_consumer_misses_earlier_puts() {
        let fanout: Fanout<i32> = Fanout::new();
        fanout.put(1);
        let mut late = fanout.consumer();
        fanout.put(2);

        assert_eq!(late.recv().await, Some(2));
    }

    #[tokio::test]
    async fn slow_consumer_never_drops_another_consumers_items() {
        let fanout: Fanout<i32> = Fanout::new();
        let mut fast = fanout.consumer();
        let _slow = fanout.consumer(); // never polled

        for i in 0..1000 {
            fanout.put(i);
        }

        for expected in 0..1000 {
            assert_eq!(fast.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn put_does_not_block_without_consumers() {
        let fanout: Fanout<i32> = Fanout::new();
        fanout.put(1);
        fanout.put(2);
    }
}
