//! Per-subscription backpressure policy.

use std::fmt;

/// Behavior when a subscriber cannot keep pace with the dispatch rate.
///
/// The strategy belongs to one subscription. Two subscriptions on the same
/// key may use different strategies without affecting each other or the
/// shared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackpressureStrategy {
    /// Buffer everything. Memory grows with the consumer's lag.
    #[default]
    Unbounded,

    /// Discard the incoming payload while the buffer is full.
    DropLatest,

    /// Keep only the most recent unconsumed payload.
    KeepLatest,

    /// Terminate the subscription with [`Error::Overflow`](crate::Error::Overflow)
    /// once the buffer is full.
    ErrorOnOverflow,

    /// Make the emitting thread wait until the subscriber frees a slot.
    ///
    /// The wait is periodic, so disposing the subscription releases a
    /// blocked emitter promptly.
    Block,
}

impl BackpressureStrategy {
    /// Whether the strategy bounds the subscriber buffer.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, BackpressureStrategy::Unbounded)
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackpressureStrategy::Unbounded => "unbounded",
            BackpressureStrategy::DropLatest => "drop-latest",
            BackpressureStrategy::KeepLatest => "keep-latest",
            BackpressureStrategy::ErrorOnOverflow => "error-on-overflow",
            BackpressureStrategy::Block => "block",
        };
        f.write_str(name)
    }
}
