//! Lifecycle observers.
//!
//! A [`MetricsCollector`] is notified of channel, subscription and message
//! lifecycle events. Notifications are fire-and-forget; implementations must
//! be cheap and must never block or panic, since they run on dispatch paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Passive observer of core lifecycle events.
///
/// Every method has an empty default so implementors only override what they
/// record. The `name` argument is the registry key or destination name.
pub trait MetricsCollector: Send + Sync {
    /// A channel was lazily created for a key.
    fn channel_created(&self, _name: &str) {}

    /// A payload was dispatched to `subscribers` live subscriptions.
    fn dispatched(&self, _name: &str, _subscribers: usize) {}

    /// A payload was emitted to a key with no live subscription.
    fn no_listener(&self, _name: &str) {}

    /// A subscription (registry or destination view) was created.
    fn subscription_created(&self, _name: &str) {}

    /// A subscription was disposed or terminated.
    fn subscription_destroyed(&self, _name: &str) {}

    /// A record was received from a broker connection.
    fn message_received(&self, _name: &str) {}

    /// A record could not be turned into an envelope.
    fn unparsable_message(&self, _name: &str) {}
}

/// Shared metrics pointer.
pub type MetricsPtr = Arc<dyn MetricsCollector>;

/// Collector that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {}

/// Returns a shared no-op collector.
pub fn noop_metrics() -> MetricsPtr {
    Arc::new(NoopMetrics)
}

/// Collector keeping process-local totals in atomic counters.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    channels_created: AtomicU64,
    dispatches: AtomicU64,
    deliveries: AtomicU64,
    no_listener: AtomicU64,
    subscriptions_created: AtomicU64,
    subscriptions_destroyed: AtomicU64,
    messages_received: AtomicU64,
    unparsable_messages: AtomicU64,
}

/// Point-in-time copy of [`CountingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Channels lazily created
    pub channels_created: u64,
    /// Emits that reached at least one subscriber
    pub dispatches: u64,
    /// Individual subscriber deliveries
    pub deliveries: u64,
    /// Emits with no live subscriber
    pub no_listener: u64,
    /// Subscriptions created
    pub subscriptions_created: u64,
    /// Subscriptions destroyed
    pub subscriptions_destroyed: u64,
    /// Broker records received
    pub messages_received: u64,
    /// Broker records that could not be routed
    pub unparsable_messages: u64,
}

impl MetricsSnapshot {
    /// Subscriptions still alive at snapshot time.
    pub fn live_subscriptions(&self) -> u64 {
        self.subscriptions_created
            .saturating_sub(self.subscriptions_destroyed)
    }
}

impl CountingMetrics {
    /// Create a shared counting collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            channels_created: self.channels_created.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            no_listener: self.no_listener.load(Ordering::Relaxed),
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_destroyed: self.subscriptions_destroyed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            unparsable_messages: self.unparsable_messages.load(Ordering::Relaxed),
        }
    }
}

impl MetricsCollector for CountingMetrics {
    fn channel_created(&self, _name: &str) {
        self.channels_created.fetch_add(1, Ordering::Relaxed);
    }

    fn dispatched(&self, _name: &str, subscribers: usize) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(subscribers as u64, Ordering::Relaxed);
    }

    fn no_listener(&self, _name: &str) {
        self.no_listener.fetch_add(1, Ordering::Relaxed);
    }

    fn subscription_created(&self, _name: &str) {
        self.subscriptions_created.fetch_add(1, Ordering::Relaxed);
    }

    fn subscription_destroyed(&self, _name: &str) {
        self.subscriptions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn message_received(&self, _name: &str) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    fn unparsable_message(&self, _name: &str) {
        self.unparsable_messages.fetch_add(1, Ordering::Relaxed);
    }
}
