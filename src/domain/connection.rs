// src/domain/connection.rs

//! Broker connection abstractions consumed by the multiplexer.
//!
//! The multiplexer depends only on this narrow shape, never on a concrete
//! broker client. A [`ConnectionFactory`] opens physical connections lazily;
//! a [`BrokerConnection`] is then owned exclusively by the multiplexer loop,
//! so implementations need `Send` but not `Sync`.
//!
//! Concrete implementations live under `src/transport/`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::{Destination, Envelope, Result};

/// A raw record as produced by a broker poll.
///
/// `destination` is the name the broker reported for the record. Records
/// with an empty destination cannot be routed to any view and are counted as
/// unparsable by the multiplexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Destination the broker delivered the record on.
    pub destination: String,
    /// Optional record key.
    pub key: Option<String>,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Backend metadata (partition, offset, headers...).
    pub metadata: BTreeMap<String, String>,
}

impl BrokerRecord {
    /// Create a record with no key and no metadata.
    pub fn new(destination: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        // ---
        Self {
            destination: destination.into(),
            key: None,
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a record key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Wrap the record into the canonical envelope.
    ///
    /// Returns `None` when the record carries no usable destination.
    pub fn into_envelope(self) -> Option<Envelope> {
        // ---
        let destination = Destination::new(self.destination).ok()?;

        Some(Envelope {
            destination,
            key: self.key.map(Arc::from),
            payload: self.payload,
            metadata: self.metadata,
        })
    }
}

/// One physical broker connection.
///
/// Implementations must ensure that:
/// - `poll()` returns within roughly `timeout`, with zero or more records;
/// - `apply_subscription()` replaces the whole upstream subscription set;
/// - `close()` releases the connection; it is called at most once.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Treat the methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait BrokerConnection: Send {
    // ---
    /// Wait up to `timeout` for records on the subscribed destinations.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BrokerRecord>>;

    /// Replace the upstream subscription with exactly `destinations`.
    ///
    /// Never called with an empty slice.
    async fn apply_subscription(&mut self, destinations: &[Destination]) -> Result<()>;

    /// Release the physical connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens physical broker connections.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    // ---
    /// Open a new physical connection.
    async fn open(&self) -> Result<Box<dyn BrokerConnection>>;
}

/// Shared connection factory pointer.
///
/// `.clone()` is cheap; every clone opens connections against the same broker.
pub type ConnectionFactoryPtr = Arc<dyn ConnectionFactory>;
