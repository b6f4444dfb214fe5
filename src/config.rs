//! Public, backend-agnostic configuration.
//!
//! These types contain no broker-specific concepts. Loading them from files or
//! the environment is left to the embedding application.

use std::time::Duration;

/// Configuration for a [`DestinationRegistry`](crate::DestinationRegistry).
///
/// # Example
///
/// ```
/// use mom_streams::RegistryConfig;
///
/// let config = RegistryConfig::default()
///     .with_subscriber_capacity(16)
///     .with_warn_on_no_listener(false);
/// assert_eq!(config.subscriber_capacity, 16);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Buffer capacity of each bounded subscription.
    ///
    /// Ignored by `Unbounded`; `KeepLatest` always keeps a single payload.
    pub subscriber_capacity: usize,

    /// Log a warning when a payload is emitted to a key with no subscriber.
    pub warn_on_no_listener: bool,

    /// Period at which an emitter blocked by a `Block` subscriber re-checks
    /// whether that subscriber is still alive.
    pub block_wait: Duration,
}

impl Default for RegistryConfig {
    /// - `subscriber_capacity`: 256
    /// - `warn_on_no_listener`: true
    /// - `block_wait`: 100ms
    fn default() -> Self {
        // ---
        Self {
            subscriber_capacity: 256,
            warn_on_no_listener: true,
            block_wait: Duration::from_millis(100),
        }
    }
}

impl RegistryConfig {
    /// Set the bounded subscriber buffer capacity (minimum 1).
    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    /// Enable or disable the no-listener warning.
    pub fn with_warn_on_no_listener(mut self, warn: bool) -> Self {
        self.warn_on_no_listener = warn;
        self
    }

    /// Set the re-check period for blocked emitters.
    pub fn with_block_wait(mut self, wait: Duration) -> Self {
        self.block_wait = wait;
        self
    }
}

/// Configuration for an [`AsyncSourceBridge`](crate::AsyncSourceBridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Number of pushed elements that may wait unconsumed.
    pub capacity: usize,

    /// Length of each bounded wait, on both the push and the drain side.
    ///
    /// Completion and cancellation are observed at this granularity.
    pub wait_timeout: Duration,
}

impl Default for BridgeConfig {
    /// - `capacity`: 1
    /// - `wait_timeout`: 100ms
    fn default() -> Self {
        // ---
        Self {
            capacity: 1,
            wait_timeout: Duration::from_millis(100),
        }
    }
}

impl BridgeConfig {
    /// Set the buffer capacity (minimum 1).
    ///
    /// Larger capacities trade memory for producer latency.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the bounded wait length.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

/// Configuration for a [`SubscriptionMultiplexer`](crate::SubscriptionMultiplexer).
///
/// # Example
///
/// ```
/// use mom_streams::MultiplexerConfig;
/// use std::time::Duration;
///
/// let config = MultiplexerConfig::new("orders-consumer")
///     .with_poll_interval(Duration::from_millis(20))
///     .with_poll_timeout(Duration::from_millis(20));
/// assert_eq!(config.name, "orders-consumer");
/// ```
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Identifier used in log lines.
    pub name: String,

    /// How long the loop parks when no destination is wanted, and how long it
    /// backs off after a failed open, subscribe or poll.
    pub poll_interval: Duration,

    /// Timeout handed to each broker `poll()`.
    pub poll_timeout: Duration,

    /// Buffer capacity of each view subscribed with a bounded strategy.
    /// Unbounded views ignore it.
    pub view_capacity: usize,
}

impl Default for MultiplexerConfig {
    /// - `name`: "multiplexer"
    /// - `poll_interval`: 100ms
    /// - `poll_timeout`: 100ms
    /// - `view_capacity`: 1024
    fn default() -> Self {
        // ---
        Self {
            name: "multiplexer".to_string(),
            poll_interval: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(100),
            view_capacity: 1024,
        }
    }
}

impl MultiplexerConfig {
    /// Create a default configuration with the given log name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the idle park / failure back-off interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the per-view buffer capacity (minimum 1).
    pub fn with_view_capacity(mut self, capacity: usize) -> Self {
        self.view_capacity = capacity.max(1);
        self
    }
}
