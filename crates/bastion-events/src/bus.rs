//! Event bus for broadcasting runtime events to subscribers.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::RuntimeEvent;
use crate::subscriber::SubscriberRegistry;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus for broadcasting events to all subscribers.
///
/// Async receivers get events through a broadcast channel; synchronous
/// subscribers in the shared [`SubscriberRegistry`] are called inline.
/// Clones share both.
///
/// Storing a cloned `EventBus` inside a synchronous subscriber creates an
/// `Arc` cycle through the registry.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
    registry: Arc<SubscriberRegistry>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of async receivers that received the event.
    pub fn publish(&self, event: RuntimeEvent) -> usize {
        let event = Arc::new(event);

        trace!(event_type = %event.event_type(), "Publishing event");

        let count = if let Ok(c) = self.sender.send(Arc::clone(&event)) {
            debug!(
                event_type = %event.event_type(),
                receiver_count = c,
                "Event published"
            );
            c
        } else {
            trace!(event_type = %event.event_type(), "No receivers for event");
            0
        };

        self.registry.notify(&event);

        count
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), None)
    }

    /// Subscribe to events whose [`event_type`](RuntimeEvent::event_type) is
    /// one of `types`.
    #[must_use]
    pub fn subscribe_types<I, S>(&self, types: I) -> EventReceiver
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types = types.into_iter().map(Into::into).collect();
        EventReceiver::new(self.sender.subscribe(), Some(types))
    }

    /// Get the synchronous subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Get the current number of active subscribers (both async and synchronous).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .receiver_count()
            .saturating_add(self.registry.len())
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            registry: Arc::clone(&self.registry),
            capacity: self.capacity,
        }
    }
}

/// Receiver for events from the event bus. Dropping it unsubscribes.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<RuntimeEvent>>,
    types: Option<HashSet<String>>,
}

impl EventReceiver {
    fn new(
        receiver: broadcast::Receiver<Arc<RuntimeEvent>>,
        types: Option<HashSet<String>>,
    ) -> Self {
        Self { receiver, types }
    }

    fn matches(&self, event: &RuntimeEvent) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(event.event_type()))
    }

    /// Receive the next matching event.
    ///
    /// Lagged events are logged and skipped. Returns `None` once every
    /// sender has been dropped.
    pub async fn recv(&mut self) -> Option<Arc<RuntimeEvent>> {
        let mut skipped: usize = 0;
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                    skipped = skipped.wrapping_add(1);
                    if skipped.is_multiple_of(100) {
                        tokio::task::yield_now().await;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next matching event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<RuntimeEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every matching event that is already queued.
    pub fn drain(&mut self) -> Vec<Arc<RuntimeEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use crate::subscriber::{EventSubscriber, FilterSubscriber, SubscriberId};
    use bastion_core::ModuleId;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn loaded(id: &str) -> RuntimeEvent {
        RuntimeEvent::ModuleLoaded {
            metadata: EventMetadata::new("test"),
            module_id: ModuleId::new(id).unwrap(),
            version: "0.1.0".to_string(),
        }
    }

    fn started(id: &str) -> RuntimeEvent {
        RuntimeEvent::ModuleStarted {
            metadata: EventMetadata::new("test"),
            module_id: ModuleId::new(id).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(loaded("m1")), 1);

        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg.event_type(), "module_loaded");
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(loaded("m1")), 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_types() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe_types(["module_started"]);

        bus.publish(loaded("m1"));
        bus.publish(started("m1"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "module_started");
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drain_collects_queued_events() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(loaded("m1"));
        bus.publish(started("m1"));

        let types: Vec<_> = receiver.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["module_loaded", "module_started"]);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let _r1 = bus.subscribe();
        bus.registry()
            .register(Arc::new(FilterSubscriber::new("sync", |_| {})));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_registry() {
        let bus = EventBus::new();
        let cloned_bus = bus.clone();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        cloned_bus
            .registry()
            .register(Arc::new(FilterSubscriber::new("test_sync", move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })));

        bus.publish(loaded("m1"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_from_on_event() {
        struct OneShot {
            bus: std::sync::Weak<EventBus>,
            my_id: Mutex<Option<SubscriberId>>,
        }

        impl EventSubscriber for OneShot {
            fn on_event(&self, _event: &RuntimeEvent) {
                let id = self.my_id.lock().unwrap().unwrap();
                if let Some(bus) = self.bus.upgrade() {
                    bus.registry().unregister(id);
                }
            }
        }

        let bus = Arc::new(EventBus::new());
        let sub = Arc::new(OneShot {
            bus: Arc::downgrade(&bus),
            my_id: Mutex::new(None),
        });
        let id = bus
            .registry()
            .register(Arc::clone(&sub) as Arc<dyn EventSubscriber>);
        *sub.my_id.lock().unwrap() = Some(id);

        bus.publish(loaded("m1"));
        assert_eq!(bus.registry().len(), 0);
    }
}
