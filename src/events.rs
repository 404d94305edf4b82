//! Subscribe/unsubscribe registry for change notifications.
//!
//! Each subscriber gets its own unbounded receiver. Subscribers that drop their
//! receiver are pruned on the next emit; `unsubscribe` removes one explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle returned by `subscribe`, passed back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub struct Listeners<T> {
    senders: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            senders: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<T>) {
        let id = SubscriptionId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Returns false if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn emit(&self, value: &T) {
        self.lock().retain(|_, tx| tx.send(value.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, mpsc::UnboundedSender<T>>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber() {
        let listeners = Listeners::<u8>::new();
        let (_a, mut rx_a) = listeners.subscribe();
        let (_b, mut rx_b) = listeners.subscribe();
        listeners.emit(&7);
        assert_eq!(rx_a.recv().await, Some(7));
        assert_eq!(rx_b.recv().await, Some(7));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners = Listeners::<u8>::new();
        let (id, mut rx) = listeners.subscribe();
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&1);
        assert!(rx.try_recv().is_err());
        assert!(listeners.is_empty());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let listeners = Listeners::<u8>::new();
        let (_id, rx) = listeners.subscribe();
        drop(rx);
        listeners.emit(&1);
        assert_eq!(listeners.len(), 0);
    }
}
