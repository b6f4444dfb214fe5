//! Streaming building blocks for message-oriented middleware consumers.
//!
//! The crate provides three independent components, plus the glue types they
//! share:
//!
//! - [`DestinationRegistry`]: an in-process fan-out hub keyed by name. Each
//!   subscriber owns a buffer governed by a [`BackpressureStrategy`]; slow or
//!   failing subscribers never affect their siblings. [`EventBus`] is the
//!   registry specialised to [`Destination`] and [`Envelope`].
//! - [`AsyncSourceBridge`]: adapts blocking producers into a demand-driven
//!   async stream, with bounded buffering and a release hook that runs
//!   exactly once.
//! - [`SubscriptionMultiplexer`]: shares one broker connection between many
//!   destination subscribers. The upstream subscription always equals the set
//!   of destinations with a live [`DestinationView`].
//!
//! [`MemoryBroker`] is an in-process [`ConnectionFactory`] used by the tests
//! and the demo, and the reference for broker connection behavior.
//!
//! ## Logging
//!
//! With the default `logging` feature, diagnostics go through `tracing`.
//! Install a subscriber (for example `tracing-subscriber`) to see them.
//! Without the feature only errors are printed, to stderr.
//!
//! ## Example
//!
//! ```
//! use mom_streams::{BackpressureStrategy, Destination, Dispatch, Envelope, EventBus};
//!
//! # async fn example() -> mom_streams::Result<()> {
//! let bus = EventBus::new();
//! let orders = Destination::new("orders")?;
//!
//! let mut sub = bus.subscribe(&orders, BackpressureStrategy::Unbounded)?;
//! let dispatch = bus.publish(Envelope::new(orders.clone(), "o-1".into()))?;
//! assert_eq!(dispatch, Dispatch::Delivered(1));
//!
//! let env = sub.recv().await.expect("open")?;
//! assert_eq!(env.payload.as_ref(), b"o-1");
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod bridge;
mod config;
mod domain;
mod error;
mod multiplexer;
mod registry;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use bridge::{AsyncSourceBridge, BridgeSource, BridgeStream};
pub use config::{BridgeConfig, MultiplexerConfig, RegistryConfig};
pub use error::{Error, Result};
pub use multiplexer::{DestinationView, SubscriptionMultiplexer};
pub use registry::{
    // ---
    ChannelStats,
    DestinationRegistry,
    Dispatch,
    EventBus,
    ListenerExit,
    ListenerHandle,
    RegistrySubscription,
};
pub use transport::{BrokerStats, MemoryBroker};

// --- public re-exports
pub use domain::{
    //
    noop_metrics,
    BackpressureStrategy,
    BrokerConnection,
    BrokerRecord,
    ConnectionFactory,
    ConnectionFactoryPtr,
    CountingMetrics,
    Destination,
    Envelope,
    MetricsCollector,
    MetricsPtr,
    MetricsSnapshot,
    NoopMetrics,
};
