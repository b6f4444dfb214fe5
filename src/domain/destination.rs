// src/domain/destination.rs

//! Destination and envelope types.
//!
//! A [`Destination`] names a logical endpoint (broker topic, event key, queue
//! name). It is treated as an opaque identifier: the core makes no
//! assumptions about hierarchy or wildcard syntax.
//!
//! An [`Envelope`] is the canonical unit handed to consumers, whatever
//! backend produced it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A logical destination.
///
/// Destinations are immutable, cheap to clone, and safe to share across
/// threads. An empty name is never a valid destination; use
/// [`Destination::new`] when the name comes from untrusted input. The `From`
/// conversions do not validate; the registry and the multiplexer reject an
/// empty destination when it is used.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Destination(Arc<str>);

impl Destination {
    /// Create a destination, rejecting empty names.
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self> {
        // ---
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidDestination(name.to_string()));
        }
        Ok(Self(name))
    }

    /// Borrow the destination name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Destination(Arc::from(value))
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        Destination(Arc::from(value))
    }
}

impl From<Arc<str>> for Destination {
    fn from(value: Arc<str>) -> Self {
        Destination(value)
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical message envelope.
///
/// Carries the payload together with the destination it was addressed to and
/// whatever metadata the backend attached (partition, offset, headers...).
/// The core never interprets the payload.
///
/// # Example
///
/// ```
/// # use mom_streams::{Destination, Envelope};
/// # use bytes::Bytes;
/// let env = Envelope::new(Destination::from("orders"), Bytes::from_static(b"{}"))
///     .with_key("order-42")
///     .with_metadata("partition", "3");
///
/// assert_eq!(env.destination.as_str(), "orders");
/// assert_eq!(env.metadata.get("partition").map(String::as_str), Some("3"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Destination the message was addressed to.
    pub destination: Destination,

    /// Optional message key (record key, event id...).
    pub key: Option<Arc<str>>,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Backend metadata, informational only.
    pub metadata: BTreeMap<String, String>,
}

impl Envelope {
    // ---
    /// Create an envelope with no key and no metadata.
    pub fn new(destination: Destination, payload: Bytes) -> Self {
        // ---
        Self {
            destination,
            key: None,
            payload,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a message key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_empty_destination_rejected() {
        // ---
        assert!(matches!(
            Destination::new(""),
            Err(Error::InvalidDestination(_))
        ));
        assert!(matches!(
            Destination::new("   "),
            Err(Error::InvalidDestination(_))
        ));
        assert_eq!(Destination::new("orders").unwrap().as_str(), "orders");
    }

    #[test]
    fn test_destination_ordering_is_by_name() {
        // ---
        let mut all = vec![
            Destination::from("payments"),
            Destination::from("audit"),
            Destination::from("orders"),
        ];
        all.sort();
        let names: Vec<&str> = all.iter().map(Destination::as_str).collect();
        assert_eq!(names, ["audit", "orders", "payments"]);
    }

    #[test]
    fn test_unchecked_conversion_is_not_valid() {
        // ---
        let blank = Destination::from("  ");
        assert!(!blank.is_valid());
        assert_eq!(blank.as_str(), "  ");

        let orders = Destination::from(String::from("orders"));
        assert!(orders.is_valid());
        assert_eq!(orders, Destination::new("orders").unwrap());
    }
}
