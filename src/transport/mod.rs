//! Broker connection implementations.
//!
//! Concrete implementations of the domain-level [`ConnectionFactory`] and
//! [`BrokerConnection`] traits. Domain code must not depend on
//! transport-specific types beyond the constructors exported here.
//!
//! [`ConnectionFactory`]: crate::ConnectionFactory
//! [`BrokerConnection`]: crate::BrokerConnection

mod memory;

pub use memory::{BrokerStats, MemoryBroker};
