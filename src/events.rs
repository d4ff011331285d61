//! Per-component publish/subscribe channels
//!
//! Each component owns an [`EventBus`] for the events it emits. Delivery is
//! at-least-once per subscriber: every receiver that exists when an event is
//! published will observe it, unless it falls more than `capacity` events
//! behind, in which case its next `recv` reports how many it missed
//! (`RecvError::Lagged`). Subscribe before calling `start()` on a component
//! so initial events are not missed.

use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast channel scoped to one component instance
#[derive(Debug)]
pub struct EventBus<E> {
    name: &'static str,
    sender: broadcast::Sender<E>,
}

impl<E: Clone + std::fmt::Debug> EventBus<E> {
    /// Create a bus buffering at most `capacity` events per lagging subscriber
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { name, sender }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event; a bus with no subscribers drops it
    pub fn publish(&self, event: E) {
        match self.sender.send(event) {
            Ok(receivers) => trace!(bus = self.name, receivers, "Event published"),
            Err(broadcast::error::SendError(event)) => {
                trace!(bus = self.name, ?event, "Event dropped, no subscribers");
            }
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_published_event() {
        // GIVEN: a bus with two subscribers
        let bus = EventBus::new("test", 8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        // WHEN: an event is published
        bus.publish(42u32);

        // THEN: both observe it
        assert_eq!(a.recv().await.unwrap(), 42);
        assert_eq!(b.recv().await.unwrap(), 42);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new("test", 8);
        bus.publish("dropped");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_many_it_missed() {
        // GIVEN: a tiny bus and a subscriber that never reads
        let bus = EventBus::new("test", 2);
        let mut rx = bus.subscribe();

        // WHEN: more events than capacity are published
        for i in 0..5u32 {
            bus.publish(i);
        }

        // THEN: the first recv reports the lag, then delivery resumes
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap(), 3);
    }
}
