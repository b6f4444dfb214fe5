//! Keyed broadcast hub.
//!
//! The registry owns one [`Channel`](channel::Channel) per key, created lazily
//! on first use and never evicted. Emitting to a key fans the payload out to
//! every live subscription of that key; each subscription buffers it
//! according to its own [`BackpressureStrategy`].
//!
//! # Architecture
//!
//! ```text
//!                      DestinationRegistry<K, T>
//!                 ┌──────────────────────────────┐
//!                 │ channels: DashMap<K, Channel>│
//!                 │   Channel { subscribers }    │
//!                 └──────────────┬───────────────┘
//!                                │ emit(key, payload)
//!         ┌──────────────────────┼──────────────────────┐
//!         ▼                      ▼                      ▼
//!  [SubscriberQueue]      [SubscriberQueue]      [SubscriberQueue]
//!   Unbounded              DropLatest             Block
//!         │                      │                      │
//!      recv()                 recv()            callback (listener)
//! ```
//!
//! Registry operations are synchronous and callable from any thread. Only
//! `subscribe_with` needs a Tokio runtime, because it spawns the listener.

mod channel;
mod queue;
mod subscription;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use channel::Channel;
use queue::{Offer, SubscriberQueue};

pub use subscription::{ListenerExit, ListenerHandle, RegistrySubscription};

use crate::{
    // ---
    log_debug,
    log_warn,
    noop_metrics,
    BackpressureStrategy,
    Destination,
    Envelope,
    Error,
    MetricsPtr,
    RegistryConfig,
    Result,
};

/// Outcome of a single `emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The key had no live subscription; nothing was delivered.
    NoListener,
    /// The payload was offered to this many subscriptions.
    ///
    /// Subscriptions that dropped the payload (`DropLatest`) or overflowed
    /// (`ErrorOnOverflow`) are not counted.
    Delivered(usize),
}

/// Statistics for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Live subscriptions on the channel
    pub subscriber_count: usize,
    /// Time since the channel was created
    pub age: Duration,
}

/// Keyed broadcast hub with per-subscriber backpressure.
///
/// # Example
///
/// ```
/// use mom_streams::{BackpressureStrategy, DestinationRegistry};
///
/// let registry: DestinationRegistry<String, u32> = DestinationRegistry::new();
/// let key = "prices".to_string();
///
/// let mut sub = registry.subscribe(&key, BackpressureStrategy::Unbounded).unwrap();
/// registry.emit(&key, 42).unwrap();
///
/// assert_eq!(sub.try_recv(), Some(Ok(Some(42))));
/// ```
pub struct DestinationRegistry<K, T> {
    // ---
    channels: DashMap<K, Arc<Channel<T>>>,
    config: RegistryConfig,
    metrics: MetricsPtr,
    next_subscription_id: AtomicU64,
}

impl<K, T> DestinationRegistry<K, T>
where
    K: AsRef<str> + Eq + Hash + Clone,
    T: Clone,
{
    /// Create a registry with default configuration and no metrics.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), noop_metrics())
    }

    /// Create a registry with custom configuration and metrics collector.
    pub fn with_config(config: RegistryConfig, metrics: MetricsPtr) -> Self {
        // ---
        Self {
            channels: DashMap::new(),
            config,
            metrics,
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Deliver `payload` to every live subscription of `key`.
    ///
    /// The channel is created if this is the first use of `key`. With no live
    /// subscription the payload is discarded and a no-listener signal is
    /// recorded. Subscriber-side failures (overflow, disposal) never surface
    /// here.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key` is empty. This is a programming error.
    pub fn emit(&self, key: &K, payload: T) -> Result<Dispatch> {
        // ---
        let name = validate_key(key)?;
        let channel = self.channel(key);

        let subscribers = channel.live_subscribers();

        if subscribers.is_empty() {
            self.metrics.no_listener(name);
            if self.config.warn_on_no_listener {
                log_warn!("{name}: no subscriber, payload discarded");
            }
            return Ok(Dispatch::NoListener);
        }

        let mut delivered = 0;

        for queue in &subscribers {
            match queue.offer(payload.clone(), self.config.block_wait) {
                Offer::Accepted => delivered += 1,
                Offer::Dropped => {
                    log_debug!("{name}: subscription {} dropped a payload", queue.id());
                }
                Offer::Overflowed => {
                    log_warn!(
                        "{name}: subscription {} overflowed and was terminated",
                        queue.id()
                    );
                }
                Offer::Closed => {}
            }
        }

        self.metrics.dispatched(name, delivered);

        Ok(Dispatch::Delivered(delivered))
    }

    /// Open a new, independent subscription on `key`.
    ///
    /// Repeated calls for the same key return independent subscriptions, each
    /// with its own strategy and lifecycle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key` is empty.
    pub fn subscribe(
        &self,
        key: &K,
        strategy: BackpressureStrategy,
    ) -> Result<RegistrySubscription<T>> {
        // ---
        let name = validate_key(key)?;
        let channel = self.channel(key);

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(
            id,
            strategy,
            self.config.subscriber_capacity,
        ));
        channel.attach(Arc::clone(&queue));

        log_debug!("{name}: subscription {id} created ({strategy})");

        Ok(RegistrySubscription::new(
            Arc::from(name),
            queue,
            channel,
            Arc::clone(&self.metrics),
        ))
    }

    /// Subscribe and feed every payload to `callback` on a spawned task.
    ///
    /// If the callback returns an error or panics, only this subscription is
    /// terminated; the channel and sibling subscriptions keep working.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] if `key` is empty.
    pub fn subscribe_with<F, E>(
        &self,
        key: &K,
        strategy: BackpressureStrategy,
        callback: F,
    ) -> Result<ListenerHandle>
    where
        T: Send + 'static,
        F: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        // ---
        let subscription = self.subscribe(key, strategy)?;
        let name: Arc<str> = Arc::from(subscription.key());

        let join = tokio::spawn(subscription::run_listener(subscription, callback));

        Ok(ListenerHandle::new(name, join))
    }

    /// Complete the current subscriptions of `key`.
    ///
    /// They stop accepting payloads, drain what is buffered, then end. The
    /// channel itself stays and accepts new subscriptions. Returns the number
    /// of subscriptions completed.
    pub fn complete(&self, key: &K) -> Result<usize> {
        // ---
        let name = validate_key(key)?;

        let completed = match self.channels.get(key) {
            Some(channel) => channel.value().complete_all(),
            None => 0,
        };

        log_debug!("{name}: completed {completed} subscription(s)");
        Ok(completed)
    }

    /// Complete the current subscriptions of every channel.
    ///
    /// Returns the number of subscriptions completed.
    pub fn complete_all(&self) -> usize {
        // ---
        self.channels
            .iter()
            .map(|channel| channel.value().complete_all())
            .sum()
    }

    /// Number of live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.channels
            .get(key)
            .map(|channel| channel.value().subscriber_count())
            .unwrap_or(0)
    }

    /// Statistics for `key`, if its channel exists.
    pub fn channel_stats(&self, key: &K) -> Option<ChannelStats> {
        // ---
        self.channels.get(key).map(|channel| ChannelStats {
            subscriber_count: channel.value().subscriber_count(),
            age: channel.value().age(),
        })
    }

    /// Whether a channel has been created for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.channels.contains_key(key)
    }

    /// Number of channels created so far.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Look up the channel of `key`, creating it exactly once.
    fn channel(&self, key: &K) -> Arc<Channel<T>> {
        // ---
        if let Some(channel) = self.channels.get(key) {
            return Arc::clone(channel.value());
        }

        let mut created = false;
        let channel = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Channel::new())
            })
            .value()
            .clone();

        if created {
            self.metrics.channel_created(key.as_ref());
            log_debug!("{}: channel created", key.as_ref());
        }

        channel
    }
}

impl<K, T> Default for DestinationRegistry<K, T>
where
    K: AsRef<str> + Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The in-process event bus: a registry keyed by destination carrying
/// envelopes.
pub type EventBus = DestinationRegistry<Destination, Envelope>;

impl DestinationRegistry<Destination, Envelope> {
    /// Emit `envelope` on its own destination.
    pub fn publish(&self, envelope: Envelope) -> Result<Dispatch> {
        // ---
        let destination = envelope.destination.clone();
        self.emit(&destination, envelope)
    }
}

fn validate_key<K: AsRef<str>>(key: &K) -> Result<&str> {
    // ---
    let name = key.as_ref();
    if name.trim().is_empty() {
        return Err(Error::InvalidKey(name.to_string()));
    }
    Ok(name)
}
