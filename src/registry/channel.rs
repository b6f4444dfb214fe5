//! Per-key broadcast point.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::queue::SubscriberQueue;

/// One channel per registry key.
///
/// Holds the live subscriptions of the key. The set only changes through
/// `attach` (subscribe) and `detach` (dispose); terminated entries are pruned
/// lazily on the next dispatch.
pub(crate) struct Channel<T> {
    subscribers: Mutex<Vec<Arc<SubscriberQueue<T>>>>,
    created_at: Instant,
}

impl<T> Channel<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn attach(&self, queue: Arc<SubscriberQueue<T>>) {
        self.subscribers.lock().push(queue);
    }

    pub(crate) fn detach(&self, id: u64) {
        self.subscribers.lock().retain(|q| q.id() != id);
    }

    /// Snapshot of the active subscriptions, pruning terminated ones.
    ///
    /// Dispatch works on the snapshot so a `Block` subscriber never stalls
    /// subscribe or dispose on the same key.
    pub(crate) fn live_subscribers(&self) -> Vec<Arc<SubscriberQueue<T>>> {
        // ---
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|q| q.is_active());
        subscribers.clone()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|q| q.is_active())
            .count()
    }

    /// Complete every active subscription; returns how many were completed.
    pub(crate) fn complete_all(&self) -> usize {
        // ---
        let subscribers = self.live_subscribers();
        for queue in &subscribers {
            queue.complete();
        }
        subscribers.len()
    }

    pub(crate) fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
