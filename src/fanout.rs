//! Fan-out queue (§4.2): multiple independent subscribers, each seeing every
//! item published after it registered, with bounded per-subscriber buffering
//! and drop-oldest on overflow. Backed by `tokio::sync::broadcast`, the same
//! primitive the grounding crate uses for its own event/log fan-out.

use tokio::sync::broadcast;

pub struct FanoutQueue<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> FanoutQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        FanoutQueue { tx }
    }

    /// Register a new subscriber. It will see every item published from this
    /// point on; overflow drops the oldest buffered item for this subscriber
    /// (broadcast's lagged-receiver semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Publish an item. Never blocks; a publish with no subscribers is a
    /// silent no-op.
    pub fn publish(&self, item: T) {
        let _ = self.tx.send(item);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_subscriber_sees_every_item_published_after_it_joins() {
        let queue: FanoutQueue<i32> = FanoutQueue::new(16);
        let mut a = queue.subscribe();
        queue.publish(1);
        let mut b = queue.subscribe();
        queue.publish(2);

        assert_eq!(a.recv().await.unwrap(), 1);
        assert_eq!(a.recv().await.unwrap(), 2);
        assert_eq!(b.recv().await.unwrap(), 2);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let queue: FanoutQueue<i32> = FanoutQueue::new(4);
        queue.publish(1);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_on_overflow() {
        let queue: FanoutQueue<i32> = FanoutQueue::new(2);
        let mut rx = queue.subscribe();
        queue.publish(1);
        queue.publish(2);
        queue.publish(3); // overflows a 2-slot buffer; 1 gets dropped

        match rx.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), 3);
    }
}
