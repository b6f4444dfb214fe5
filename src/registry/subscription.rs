//! Consumer handles returned by the registry.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::Stream;
use tokio::task::JoinHandle;

use super::channel::Channel;
use super::queue::SubscriberQueue;
use crate::{log_debug, BackpressureStrategy, MetricsPtr, Result};

/// A subscription to one registry key.
///
/// Each call to `subscribe` returns an independent handle with its own
/// buffer and backpressure strategy. The subscription is Active until one of:
/// - the handle is dropped or [`dispose`](Self::dispose)d,
/// - the key is completed upstream and the buffer has drained,
/// - the buffer overflowed under `ErrorOnOverflow` and the error was read.
///
/// A terminated subscription never resumes; subscribe again instead.
pub struct RegistrySubscription<T> {
    // ---
    name: Arc<str>,
    queue: Arc<SubscriberQueue<T>>,
    channel: Arc<Channel<T>>,
    metrics: MetricsPtr,
}

impl<T> RegistrySubscription<T> {
    pub(crate) fn new(
        name: Arc<str>,
        queue: Arc<SubscriberQueue<T>>,
        channel: Arc<Channel<T>>,
        metrics: MetricsPtr,
    ) -> Self {
        // ---
        metrics.subscription_created(&name);

        Self {
            name,
            queue,
            channel,
            metrics,
        }
    }

    /// Name of the key this subscription is bound to.
    pub fn key(&self) -> &str {
        &self.name
    }

    /// Backpressure strategy of this subscription.
    pub fn strategy(&self) -> BackpressureStrategy {
        self.queue.strategy()
    }

    /// Whether the subscription still accepts payloads.
    pub fn is_active(&self) -> bool {
        self.queue.is_active()
    }

    /// Number of payloads buffered and not yet received.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Wait for the next payload.
    ///
    /// Returns:
    /// - `Some(Ok(payload))` for each delivered payload, in emit order,
    /// - `Some(Err(Error::Overflow { .. }))` once if the buffer overflowed,
    /// - `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.queue.recv().await
    }

    /// Take the next payload if one is buffered.
    ///
    /// `Some(Ok(None))` means the subscription is alive but empty.
    pub fn try_recv(&mut self) -> Option<Result<Option<T>>> {
        self.queue.try_recv()
    }

    /// Dispose the subscription. Equivalent to dropping it.
    pub fn dispose(self) {}

    /// Convert into a `Stream` of payloads.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl<T> Drop for RegistrySubscription<T> {
    fn drop(&mut self) {
        // ---
        self.queue.dispose();
        self.channel.detach(self.queue.id());
        self.metrics.subscription_destroyed(&self.name);

        log_debug!("{}: subscription {} disposed", self.name, self.queue.id());
    }
}

impl<T> fmt::Debug for RegistrySubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySubscription")
            .field("key", &self.name)
            .field("id", &self.queue.id())
            .field("strategy", &self.queue.strategy())
            .field("active", &self.queue.is_active())
            .finish()
    }
}

/// How a callback-driven listener ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The key was completed upstream and every payload was handled.
    Completed,
    /// The callback failed or panicked, or the buffer overflowed.
    Faulted(crate::Error),
    /// The listener was cancelled through its handle.
    Cancelled,
}

/// Handle to a callback-driven subscription started by
/// [`DestinationRegistry::subscribe_with`](crate::DestinationRegistry::subscribe_with).
///
/// Dropping the handle does not stop the listener; call
/// [`cancel`](Self::cancel) to dispose it.
pub struct ListenerHandle {
    name: Arc<str>,
    join: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    pub(crate) fn new(name: Arc<str>, join: JoinHandle<ListenerExit>) -> Self {
        Self { name, join }
    }

    /// Name of the key the listener is bound to.
    pub fn key(&self) -> &str {
        &self.name
    }

    /// Whether the listener has terminated.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Dispose the listener's subscription.
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// Wait for the listener to terminate.
    pub async fn join(self) -> ListenerExit {
        // ---
        match self.join.await {
            Ok(exit) => exit,
            Err(err) if err.is_cancelled() => ListenerExit::Cancelled,
            Err(_err) => ListenerExit::Faulted(crate::Error::SubscriberFault(
                "listener task panicked".to_string(),
            )),
        }
    }
}

/// Drive `subscription` through `callback` until it terminates.
///
/// A callback error or panic terminates only this subscription.
pub(crate) async fn run_listener<T, F, E>(
    mut subscription: RegistrySubscription<T>,
    mut callback: F,
) -> ListenerExit
where
    F: FnMut(T) -> std::result::Result<(), E>,
    E: fmt::Display,
{
    // ---
    while let Some(item) = subscription.recv().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(err) => {
                crate::log_warn!("{}: listener terminated: {err}", subscription.key());
                return ListenerExit::Faulted(err);
            }
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                crate::log_error!("{}: subscriber callback failed: {err}", subscription.key());
                return ListenerExit::Faulted(crate::Error::SubscriberFault(err.to_string()));
            }
            Err(_panic) => {
                crate::log_error!("{}: subscriber callback panicked", subscription.key());
                return ListenerExit::Faulted(crate::Error::SubscriberFault(
                    "callback panicked".to_string(),
                ));
            }
        }
    }

    log_debug!("{}: listener completed", subscription.key());
    ListenerExit::Completed
}
