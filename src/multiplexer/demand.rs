//! Reference-counted destination demand and per-destination routing.
//!
//! Shared between the multiplexer handle, its views and the poll loop. The
//! desired subscription set is derived from the counts: a destination is
//! desired iff its count is above zero.
//!
//! Every view owns one subscription in `routes`, keyed by its destination.
//! The loop emits each envelope to its destination only, so one view's
//! buffer never holds, or loses, another destination's records.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    // ---
    log_debug,
    log_warn,
    noop_metrics,
    BackpressureStrategy,
    Destination,
    DestinationRegistry,
    Envelope,
    Error,
    MetricsPtr,
    RegistryConfig,
    RegistrySubscription,
    Result,
};

struct Counts {
    counts: HashMap<Destination, usize>,
    shutdown: bool,
}

pub(crate) struct Demand {
    inner: Mutex<Counts>,
    /// One channel per destination, one subscription per view.
    pub(crate) routes: DestinationRegistry<Destination, Envelope>,
    /// Wakes a parked loop when demand changes or shutdown is requested.
    pub(crate) wake: Notify,
    pub(crate) metrics: MetricsPtr,
}

impl Demand {
    pub(crate) fn new(view_capacity: usize, metrics: MetricsPtr) -> Self {
        // ---
        // View lifecycle is reported by `DemandGuard`, so routing stays silent.
        let routes = DestinationRegistry::with_config(
            RegistryConfig::default()
                .with_subscriber_capacity(view_capacity)
                .with_warn_on_no_listener(false),
            noop_metrics(),
        );

        Self {
            inner: Mutex::new(Counts {
                counts: HashMap::new(),
                shutdown: false,
            }),
            routes,
            wake: Notify::new(),
            metrics,
        }
    }

    /// Increment the count of `destination` and open its view buffer.
    ///
    /// Both happen under the counts lock, so the buffer exists before the loop
    /// can observe the new demand, and shutdown either rejects the call or
    /// completes the buffer.
    pub(crate) fn acquire(
        &self,
        destination: &Destination,
        strategy: BackpressureStrategy,
    ) -> Result<RegistrySubscription<Envelope>> {
        // ---
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(Error::Shutdown);
        }

        let subscription = self.routes.subscribe(destination, strategy)?;

        let count = inner.counts.entry(destination.clone()).or_insert(0);
        *count += 1;
        let first = *count == 1;
        drop(inner);

        if first {
            log_debug!("{destination}: added to desired set");
            self.wake.notify_one();
        }

        Ok(subscription)
    }

    /// Decrement the count of `destination`; removes it from the desired set
    /// at zero.
    pub(crate) fn release(&self, destination: &Destination) {
        // ---
        let mut inner = self.inner.lock();

        let last = match inner.counts.get_mut(destination) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            // Cleared by shutdown.
            None => false,
        };

        if last {
            inner.counts.remove(destination);
            drop(inner);
            log_debug!("{destination}: removed from desired set");
            self.wake.notify_one();
        }
    }

    pub(crate) fn count(&self, destination: &Destination) -> usize {
        self.inner
            .lock()
            .counts
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Sorted desired set, or `None` once shutdown was requested.
    pub(crate) fn desired(&self) -> Option<Vec<Destination>> {
        // ---
        let inner = self.inner.lock();
        if inner.shutdown {
            return None;
        }

        let mut desired: Vec<Destination> = inner.counts.keys().cloned().collect();
        desired.sort();
        Some(desired)
    }

    /// Request shutdown: clear every count, complete every view buffer and
    /// wake the loop.
    ///
    /// Views drain what was already routed to them, then end. A `Block` view
    /// that is full releases the loop instead of holding it.
    ///
    /// Returns `false` if shutdown had already been requested.
    pub(crate) fn shutdown(&self) -> bool {
        // ---
        let first = {
            let mut inner = self.inner.lock();
            let first = !inner.shutdown;
            inner.shutdown = true;
            inner.counts.clear();
            first
        };

        let _completed = self.routes.complete_all();
        if first {
            log_debug!("shutdown: {_completed} view(s) completed");
        }

        self.wake.notify_one();
        first
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Route `envelope` to the views of its destination.
    ///
    /// May wait on a full `Block` view; call it off the async workers.
    pub(crate) fn route(&self, envelope: Envelope) {
        // ---
        let destination = envelope.destination.clone();
        if let Err(_err) = self.routes.emit(&destination, envelope) {
            log_warn!("{destination}: routing failed: {_err}");
        }
    }
}
