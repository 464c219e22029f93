//! Observer registry backing log subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::LogObserver;
use crate::models::Message;

/// Per-conversation observer table shared by log implementations.
///
/// Registration returns a [`Subscription`] guard; dropping it removes the
/// observer, so a caller that re-subscribes for a different conversation
/// cannot receive stale notifications from the previous one.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<ObserverRegistryInner>,
}

#[derive(Default)]
struct ObserverRegistryInner {
    observers: DashMap<String, Vec<(u64, Arc<LogObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for a conversation.
    pub fn register(&self, conversation_id: &str, observer: Box<LogObserver>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .entry(conversation_id.to_string())
            .or_default()
            .push((id, Arc::from(observer)));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            conversation_id: conversation_id.to_string(),
            id,
        }
    }

    /// Deliver the current full message list to every observer of a
    /// conversation.
    pub fn notify(&self, conversation_id: &str, messages: &[Message]) {
        // Clone the callbacks out so a callback that drops its own
        // subscription does not deadlock against the map entry.
        let callbacks: Vec<Arc<LogObserver>> = match self.inner.observers.get(conversation_id) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(messages.to_vec());
        }
    }

    /// Number of live observers for a conversation.
    pub fn observer_count(&self, conversation_id: &str) -> usize {
        self.inner
            .observers
            .get(conversation_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

/// Cancellation handle for a registered observer.
///
/// Dropping the handle unsubscribes. [`Subscription::cancel`] does the
/// same explicitly.
pub struct Subscription {
    registry: std::sync::Weak<ObserverRegistryInner>,
    conversation_id: String,
    id: u64,
}

impl Subscription {
    /// Explicitly stop delivery.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if let Some(mut entry) = inner.observers.get_mut(&self.conversation_id) {
                entry.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
