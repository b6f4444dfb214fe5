//! Domain layer public interface.
//!
//! This module defines abstractions that are independent of any broker
//! client or protocol: destinations, envelopes, backpressure policies,
//! metrics observers and the connection contract the multiplexer consumes.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod backpressure;
mod connection;
mod destination;
mod metrics;

// --- Domain re-exports ---

pub use backpressure::BackpressureStrategy;

pub use connection::{
    //
    BrokerConnection,
    BrokerRecord,
    ConnectionFactory,
    ConnectionFactoryPtr,
};

pub use destination::{Destination, Envelope};

pub use metrics::{
    //
    noop_metrics,
    CountingMetrics,
    MetricsCollector,
    MetricsPtr,
    MetricsSnapshot,
    NoopMetrics,
};
