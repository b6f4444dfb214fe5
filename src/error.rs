use thiserror::Error;

/// Errors raised by the distribution core.
///
/// Only errors that belong to the caller's own operation are ever returned.
/// Failures of downstream consumers are isolated to their subscription and
/// never reach `emit` or `push` callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A registry key was empty. This is a programming error and is not retried.
    #[error("invalid registry key: {0:?}")]
    InvalidKey(String),

    /// A destination name was empty or otherwise unusable.
    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    /// An element was pushed into a bridge after `signal_done()`.
    #[error("element pushed after completion was signalled")]
    PushAfterCompletion,

    /// The bridge stream was cancelled while an operation was waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// A subscriber using `ErrorOnOverflow` could not keep pace.
    #[error("subscriber buffer overflow (capacity {capacity})")]
    Overflow {
        /// Capacity of the buffer that overflowed.
        capacity: usize,
    },

    /// A subscriber callback failed; the subscription was terminated.
    #[error("subscriber fault: {0}")]
    SubscriberFault(String),

    /// A broker connection reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A background loop could not be started.
    #[error("failed to spawn background loop: {0}")]
    Spawn(String),

    /// The multiplexer has been shut down.
    #[error("multiplexer is shut down")]
    Shutdown,
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
