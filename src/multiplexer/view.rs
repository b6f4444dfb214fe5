//! Per-destination views of a multiplexer.

use std::sync::Arc;

use futures_util::Stream;

use super::demand::Demand;
use crate::{
    // ---
    BackpressureStrategy,
    Destination,
    Envelope,
    RegistrySubscription,
    Result,
};

/// Holds one reference on a destination; dropping it releases the reference.
pub(crate) struct DemandGuard {
    destination: Destination,
    demand: Arc<Demand>,
}

impl DemandGuard {
    pub(crate) fn new(destination: Destination, demand: Arc<Demand>) -> Self {
        // ---
        demand.metrics.subscription_created(destination.as_str());
        Self {
            destination,
            demand,
        }
    }
}

impl Drop for DemandGuard {
    fn drop(&mut self) {
        // ---
        self.demand.release(&self.destination);
        self.demand
            .metrics
            .subscription_destroyed(self.destination.as_str());
    }
}

/// A logical subscription to one destination of a multiplexer.
///
/// Each view has its own buffer, fed by the poll loop with the envelopes of
/// this destination only, in the order the loop observed them. The buffer
/// follows the view's [`BackpressureStrategy`], so a slow or lossy view never
/// affects another view, on this destination or any other.
///
/// Dropping the view (normally or during unwinding) releases its reference,
/// so the multiplexer can drop the destination from the upstream
/// subscription.
pub struct DestinationView {
    // ---
    destination: Destination,
    // Declared before the guard: the buffer detaches before the count drops.
    subscription: RegistrySubscription<Envelope>,
    _guard: DemandGuard,
}

impl DestinationView {
    pub(crate) fn new(
        destination: Destination,
        subscription: RegistrySubscription<Envelope>,
        guard: DemandGuard,
    ) -> Self {
        Self {
            destination,
            subscription,
            _guard: guard,
        }
    }

    /// The destination this view is bound to.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Backpressure strategy of this view.
    pub fn strategy(&self) -> BackpressureStrategy {
        self.subscription.strategy()
    }

    /// Number of envelopes buffered and not yet received.
    pub fn pending(&self) -> usize {
        self.subscription.pending()
    }

    /// Wait for the next envelope on this destination.
    ///
    /// Returns:
    /// - `Some(Ok(envelope))` for each envelope routed to this view,
    /// - `Some(Err(Error::Overflow { .. }))` once if an `ErrorOnOverflow`
    ///   view overflowed,
    /// - `None` once the view has ended (overflow or multiplexer shutdown).
    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        self.subscription.recv().await
    }

    /// Take the next envelope if one is buffered.
    ///
    /// `Some(Ok(None))` means the view is alive but empty.
    pub fn try_recv(&mut self) -> Option<Result<Option<Envelope>>> {
        self.subscription.try_recv()
    }

    /// Dispose the view. Equivalent to dropping it.
    pub fn dispose(self) {}

    /// Convert into a `Stream` of envelopes.
    pub fn into_stream(self) -> impl Stream<Item = Result<Envelope>> {
        futures_util::stream::unfold(self, |mut view| async move {
            let item = view.recv().await?;
            Some((item, view))
        })
    }
}

impl std::fmt::Debug for DestinationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationView")
            .field("destination", &self.destination)
            .field("strategy", &self.strategy())
            .field("pending", &self.pending())
            .finish()
    }
}
