//! Broadcast fan-out for state events.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Default number of undelivered events a slow subscriber may fall behind.
pub const EVENT_CAPACITY: usize = 64;

/// Multi-subscriber event channel. Publishing never blocks and succeeds
/// whether or not anyone is listening.
#[derive(Debug, Clone)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` for every event published from now on, on its own task.
    /// Must be called inside a Tokio runtime.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(T) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber fell behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task: Some(task) }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

/// Handle for a handler registered with [`EventBus::on`]. Dropping it
/// detaches the handler.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::default();
        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_receives_events_until_dropped() {
        let bus: EventBus<u32> = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.on(move |n| {
            let _ = tx.send(n);
        });

        bus.publish(7);
        assert_eq!(rx.recv().await, Some(7));

        sub.unsubscribe();
        // The aborted task drops its sender, closing the channel.
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(closed, Ok(None));
        bus.publish(8);
    }
}
