//! Notification bus.
//!
//! Tracks subscribers and fans sync events out to them. Each subscriber has
//! its own unbounded channel, so events arrive in publish order and a slow
//! subscriber never blocks the coordinator. Late subscribers get no replay.

use std::sync::{Arc, Weak};

use checklist_engine::{Reference, SyncEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Sender for sync events.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

#[derive(Debug)]
struct Subscriber {
    /// `None` receives every event
    filter: Option<Reference>,
    sender: EventSender,
}

impl Subscriber {
    fn wants(&self, event: &SyncEvent) -> bool {
        match (&self.filter, event.reference()) {
            (None, _) => true,
            (Some(filter), Some(reference)) => filter == reference,
            (Some(_), None) => false,
        }
    }
}

/// Publish/subscribe hub for [`SyncEvent`]s.
///
/// Thread-safe and shared via `Arc`.
#[derive(Debug, Default)]
pub struct NotificationBus {
    subscribers: DashMap<String, Subscriber>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Create a new bus wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe to the events of one reference.
    pub fn subscribe(self: &Arc<Self>, reference: Reference) -> Subscription {
        self.register(Some(reference))
    }

    /// Subscribe to every event, global state changes included.
    pub fn subscribe_all(self: &Arc<Self>) -> Subscription {
        self.register(None)
    }

    fn register(self: &Arc<Self>, filter: Option<Reference>) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers
            .insert(id.clone(), Subscriber { filter, sender });

        tracing::debug!(subscription = %id, filter = ?filter, "Subscriber registered");

        Subscription {
            id,
            bus: Arc::downgrade(self),
            receiver,
        }
    }

    /// Remove a subscriber. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: &str) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(subscription = %id, "Subscriber removed");
        }
    }

    /// Deliver an event to every interested subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(&event) {
                continue;
            }
            if subscriber.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(entry.key().clone());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        tracing::trace!(event = event.kind(), recipients = delivered, "Published event");
        delivered
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Handle to a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    bus: Weak<NotificationBus>,
    receiver: mpsc::UnboundedReceiver<SyncEvent>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// End the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.id);
        }
    }
}
