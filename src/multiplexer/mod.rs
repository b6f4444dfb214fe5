//! Reference-counted subscription multiplexer over one broker connection.
//!
//! Many logical subscribers share a single physical connection. Each call to
//! [`SubscriptionMultiplexer::subscribe`] takes one reference on a
//! destination; the upstream subscription is always the set of destinations
//! with at least one live reference.
//!
//! ```text
//!  subscribe("orders") ──► DestinationView ◄── buffer ─┐
//!  subscribe("orders") ──► DestinationView ◄── buffer ─┤  routed by destination
//!  subscribe("audit")  ──► DestinationView ◄── buffer ─┤◄───────────────┐
//!                                                      │                │
//!                      Demand (counts, routes) ────────┘                │
//!                           │                                           │
//!                           ▼                                           │
//!                      poll loop ── apply_subscription / poll ──────────┘
//!                           │
//!                    BrokerConnection (opened lazily)
//! ```
//!
//! ## Concurrency model
//!
//! A single spawned task owns the connection and is the only caller of
//! `open`, `apply_subscription`, `poll` and `close`. Handles and views only
//! touch the shared `Demand` counts, which are guarded by a short mutex.
//! Demand changes wake a parked loop; they never block on the broker.
//!
//! Every view has its own buffer with its own backpressure strategy. The loop
//! routes each envelope to the buffers of its destination only, on the
//! blocking pool since a `Block` view may hold it until read.
//!
//! ## Connection lifecycle
//!
//! - No connection is opened until the first destination is desired.
//! - Whenever the desired set changes, the loop re-applies it before the next
//!   poll.
//! - When the desired set becomes empty the connection is closed; new demand
//!   reopens it.
//! - Shutdown completes every view and closes the open connection exactly
//!   once. Views still drain what was routed to them before they end.
//!
//! ## Error handling
//!
//! Broker failures (`open`, `apply_subscription`, `poll`) are logged and the
//! loop backs off for one poll interval before retrying. Records without a
//! destination are counted as unparsable and skipped.

mod demand;
mod view;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use demand::Demand;
use view::DemandGuard;

pub use view::DestinationView;

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    BackpressureStrategy,
    BrokerConnection,
    ConnectionFactoryPtr,
    Destination,
    Error,
    MetricsPtr,
    MultiplexerConfig,
    Result,
};

/// Shares one broker connection between many destination subscribers.
///
/// Cheap to share behind an `Arc`. Dropping the multiplexer requests shutdown
/// without waiting for it; call [`shutdown`](Self::shutdown) to wait until the
/// connection is closed.
pub struct SubscriptionMultiplexer {
    // ---
    name: Arc<str>,
    demand: Arc<Demand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionMultiplexer {
    /// Start a multiplexer over connections produced by `factory`.
    ///
    /// Must be called from within a Tokio runtime. No connection is opened
    /// until the first [`subscribe`](Self::subscribe).
    pub fn spawn(
        factory: ConnectionFactoryPtr,
        config: MultiplexerConfig,
        metrics: MetricsPtr,
    ) -> Self {
        // ---
        let demand = Arc::new(Demand::new(config.view_capacity.max(1), metrics));
        let name: Arc<str> = Arc::from(config.name.as_str());

        let task = tokio::spawn(
            PollLoop {
                factory,
                config,
                demand: Arc::clone(&demand),
                connection: None,
                applied: Vec::new(),
            }
            .run(),
        );

        log_info!("{name}: multiplexer started");

        Self {
            name,
            demand,
            task: Mutex::new(Some(task)),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take one reference on `destination` and return an unbounded view of
    /// its envelopes.
    ///
    /// The view sees every envelope the loop routes after this call returns.
    /// Fails with [`Error::InvalidDestination`] for an empty name and with
    /// [`Error::Shutdown`] once shutdown was requested.
    pub fn subscribe(&self, destination: impl Into<Destination>) -> Result<DestinationView> {
        self.subscribe_with_backpressure(destination, BackpressureStrategy::Unbounded)
    }

    /// Like [`subscribe`](Self::subscribe), with the view's buffer governed by
    /// `strategy`.
    ///
    /// Bounded strategies use `MultiplexerConfig::view_capacity`. A full
    /// `Block` view holds the loop, and so every other view, until it is read
    /// or dropped.
    pub fn subscribe_with_backpressure(
        &self,
        destination: impl Into<Destination>,
        strategy: BackpressureStrategy,
    ) -> Result<DestinationView> {
        // ---
        let destination = destination.into();
        if !destination.is_valid() {
            return Err(Error::InvalidDestination(destination.to_string()));
        }

        let subscription = self.demand.acquire(&destination, strategy)?;
        let guard = DemandGuard::new(destination.clone(), Arc::clone(&self.demand));

        log_debug!("{}: {strategy} view created for {destination}", self.name);
        Ok(DestinationView::new(destination, subscription, guard))
    }

    /// Number of live views on `destination`.
    pub fn reference_count(&self, destination: &Destination) -> usize {
        self.demand.count(destination)
    }

    /// Destinations with at least one live view, sorted.
    pub fn desired_destinations(&self) -> Vec<Destination> {
        self.demand.desired().unwrap_or_default()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.demand.is_shutdown()
    }

    /// Stop the loop, complete every view and close the connection.
    ///
    /// Idempotent; later calls return once the first shutdown has completed
    /// or immediately if another caller is already waiting on it.
    pub async fn shutdown(&self) {
        // ---
        if self.demand.shutdown() {
            log_info!("{}: shutdown requested", self.name);
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(_err) = task.await {
                log_error!("{}: poll loop ended abnormally: {_err}", self.name);
            }
        }
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        // ---
        self.demand.shutdown();
    }
}

/// State owned by the spawned loop task.
struct PollLoop {
    factory: ConnectionFactoryPtr,
    config: MultiplexerConfig,
    demand: Arc<Demand>,
    connection: Option<Box<dyn BrokerConnection>>,
    applied: Vec<Destination>,
}

impl PollLoop {
    async fn run(mut self) {
        // ---
        let _name = self.config.name.clone();
        log_debug!("{_name}: poll loop running");

        while let Some(desired) = self.demand.desired() {
            if desired.is_empty() {
                self.release_connection().await;
                park(&self.demand, self.config.poll_interval).await;
                continue;
            }

            if let Err(_err) = self.sync_subscription(&desired).await {
                log_error!("{_name}: subscription sync failed: {_err}");
                park(&self.demand, self.config.poll_interval).await;
                continue;
            }

            self.poll_once().await;
        }

        self.release_connection().await;
        log_info!("{_name}: multiplexer stopped");
    }

    /// Open the connection if needed and make its upstream set match
    /// `desired`.
    async fn sync_subscription(&mut self, desired: &[Destination]) -> Result<()> {
        // ---
        if self.connection.is_none() {
            let connection = self.factory.open().await?;
            log_info!("{}: connection opened", self.config.name);
            self.connection = Some(connection);
            self.applied.clear();
        }

        if self.applied.as_slice() == desired {
            return Ok(());
        }

        if let Some(connection) = self.connection.as_mut() {
            connection.apply_subscription(desired).await?;
            log_debug!("{}: subscription set to {desired:?}", self.config.name);
            self.applied = desired.to_vec();
        }
        Ok(())
    }

    async fn poll_once(&mut self) {
        // ---
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let records = match connection.poll(self.config.poll_timeout).await {
            Ok(records) => records,
            Err(_err) => {
                log_warn!("{}: poll failed: {_err}", self.config.name);
                park(&self.demand, self.config.poll_interval).await;
                return;
            }
        };

        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let source = record.destination.clone();
            match record.into_envelope() {
                Some(env) => {
                    self.demand.metrics.message_received(env.destination.as_str());
                    batch.push(env);
                }
                None => {
                    self.demand.metrics.unparsable_message(&source);
                    log_warn!("{}: skipped record without destination", self.config.name);
                }
            }
        }

        if batch.is_empty() {
            return;
        }

        let demand = Arc::clone(&self.demand);
        let routed = tokio::task::spawn_blocking(move || {
            for env in batch {
                demand.route(env);
            }
        })
        .await;

        if let Err(_err) = routed {
            log_error!("{}: routing task failed: {_err}", self.config.name);
        }
    }

    /// Close the open connection, if any. Close failures are logged.
    async fn release_connection(&mut self) {
        // ---
        self.applied.clear();

        if let Some(mut connection) = self.connection.take() {
            match connection.close().await {
                Ok(()) => log_info!("{}: connection closed", self.config.name),
                Err(_err) => log_warn!("{}: close failed: {_err}", self.config.name),
            }
        }
    }
}

/// Wait for a demand change, at most `interval`.
///
/// Takes the shared demand rather than the loop itself: the loop owns a
/// connection that is `Send` but not `Sync`.
async fn park(demand: &Demand, interval: Duration) {
    // ---
    let _ = tokio::time::timeout(interval, demand.wake.notified()).await;
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{noop_metrics, BrokerRecord, MemoryBroker};

    fn config() -> MultiplexerConfig {
        MultiplexerConfig::new("test")
            .with_poll_interval(Duration::from_millis(10))
            .with_poll_timeout(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_rejects_empty_destination() {
        // ---
        let broker = MemoryBroker::new();
        let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), noop_metrics());

        assert!(matches!(
            mux.subscribe(""),
            Err(Error::InvalidDestination(_))
        ));
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fails() {
        // ---
        let broker = MemoryBroker::new();
        let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), noop_metrics());
        mux.shutdown().await;

        assert!(mux.is_shutdown());
        assert!(matches!(mux.subscribe("orders"), Err(Error::Shutdown)));
        assert_eq!(broker.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_reference_counts_track_views() {
        // ---
        let broker = MemoryBroker::new();
        let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), noop_metrics());
        let orders = Destination::from("orders");

        let a = mux.subscribe("orders").unwrap();
        let b = mux.subscribe("orders").unwrap();
        assert_eq!(mux.reference_count(&orders), 2);

        a.dispose();
        assert_eq!(mux.reference_count(&orders), 1);
        assert_eq!(mux.desired_destinations(), vec![orders.clone()]);

        drop(b);
        assert_eq!(mux.reference_count(&orders), 0);
        assert!(mux.desired_destinations().is_empty());

        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_views_end_on_shutdown() {
        // ---
        let broker = MemoryBroker::new();
        let mux = SubscriptionMultiplexer::spawn(broker.factory(), config(), noop_metrics());
        let mut view = mux.subscribe("orders").unwrap();

        broker.publish(BrokerRecord::new("orders", "x"));
        mux.shutdown().await;

        // Envelopes already routed are still readable before the end.
        while let Some(env) = view.recv().await {
            assert_eq!(env.unwrap().destination.as_str(), "orders");
        }
    }
}
