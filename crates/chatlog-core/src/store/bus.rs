//! Change notification bus

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::types::ChangeEvent;

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Token returned by [`NotificationBus::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

/// Single-channel, synchronous publish/subscribe.
///
/// Handlers run on the publisher's call stack in subscription order. A
/// handler must not mutate the store that publishes to this bus.
#[derive(Default)]
pub struct NotificationBus {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        debug!("Subscriber {} registered", id);
        Subscription { id }
    }

    /// Register a channel that receives a clone of every event
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            // Receiver gone; the owner is expected to unsubscribe.
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        handlers.len() != before
    }

    /// Deliver an event to every current subscriber
    pub fn publish(&self, event: &ChangeEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
