//! Per-subscription buffer.
//!
//! Each subscription owns one [`SubscriberQueue`]. Emitters offer payloads
//! synchronously from any thread; the consumer awaits them. The queue applies
//! the subscription's [`BackpressureStrategy`] on overflow, so one slow
//! subscriber never changes what its siblings receive.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::{BackpressureStrategy, Error, Result};

/// Lifecycle of a subscription buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    /// Accepting payloads.
    Active,
    /// Upstream completed; buffered payloads still drain, then the stream ends.
    Completed,
    /// Overflowed under `ErrorOnOverflow`; buffered payloads drain, then the
    /// error is delivered once.
    Failed(Error),
    /// Disposed, or the terminal signal was already delivered.
    Terminated,
}

/// Outcome of offering one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The payload was buffered.
    Accepted,
    /// The payload was discarded by `DropLatest`.
    Dropped,
    /// The buffer was full under `ErrorOnOverflow`; the subscription failed.
    Overflowed,
    /// The subscription no longer accepts payloads.
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    status: Status,
}

pub(crate) struct SubscriberQueue<T> {
    id: u64,
    strategy: BackpressureStrategy,
    capacity: usize,
    state: Mutex<State<T>>,
    // Emitters blocked by a full `Block` buffer.
    space: Condvar,
    // Consumer waiting for a payload or a terminal signal.
    ready: Notify,
}

impl<T> SubscriberQueue<T> {
    pub(crate) fn new(id: u64, strategy: BackpressureStrategy, capacity: usize) -> Self {
        // ---
        let capacity = match strategy {
            BackpressureStrategy::KeepLatest => 1,
            _ => capacity.max(1),
        };

        Self {
            id,
            strategy,
            capacity,
            state: Mutex::new(State {
                items: VecDeque::new(),
                status: Status::Active,
            }),
            space: Condvar::new(),
            ready: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn strategy(&self) -> BackpressureStrategy {
        self.strategy
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().status == Status::Active
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Offer one payload according to the strategy.
    ///
    /// Only `Block` can wait; it re-checks the subscription status every
    /// `block_wait` so a disposed subscriber releases the emitter.
    pub(crate) fn offer(&self, item: T, block_wait: Duration) -> Offer {
        // ---
        let mut state = self.state.lock();

        if state.status != Status::Active {
            return Offer::Closed;
        }

        let full = state.items.len() >= self.capacity;

        let outcome = match self.strategy {
            BackpressureStrategy::Unbounded => {
                state.items.push_back(item);
                Offer::Accepted
            }
            BackpressureStrategy::DropLatest if full => Offer::Dropped,
            BackpressureStrategy::DropLatest => {
                state.items.push_back(item);
                Offer::Accepted
            }
            BackpressureStrategy::KeepLatest => {
                state.items.clear();
                state.items.push_back(item);
                Offer::Accepted
            }
            BackpressureStrategy::ErrorOnOverflow if full => {
                state.status = Status::Failed(Error::Overflow {
                    capacity: self.capacity,
                });
                Offer::Overflowed
            }
            BackpressureStrategy::ErrorOnOverflow => {
                state.items.push_back(item);
                Offer::Accepted
            }
            BackpressureStrategy::Block => {
                while state.items.len() >= self.capacity && state.status == Status::Active {
                    self.space.wait_for(&mut state, block_wait);
                }
                if state.status != Status::Active {
                    return Offer::Closed;
                }
                state.items.push_back(item);
                Offer::Accepted
            }
        };

        drop(state);

        if outcome != Offer::Dropped {
            self.ready.notify_one();
        }

        outcome
    }

    /// Take the next payload without waiting.
    ///
    /// `Ok(None)` means nothing is buffered yet; `Err(None)` means the stream
    /// has ended; `Err(Some(err))` delivers the terminal error exactly once.
    fn take(&self) -> std::result::Result<Option<T>, Option<Error>> {
        // ---
        let mut state = self.state.lock();

        if let Some(item) = state.items.pop_front() {
            drop(state);
            self.space.notify_one();
            return Ok(Some(item));
        }

        match std::mem::replace(&mut state.status, Status::Terminated) {
            Status::Active => {
                state.status = Status::Active;
                Ok(None)
            }
            Status::Completed | Status::Terminated => Err(None),
            Status::Failed(err) => Err(Some(err)),
        }
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the subscription has ended.
    pub(crate) async fn recv(&self) -> Option<Result<T>> {
        // ---
        loop {
            let notified = self.ready.notified();

            match self.take() {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => notified.await,
                Err(Some(err)) => return Some(Err(err)),
                Err(None) => return None,
            }
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv).
    ///
    /// `Ok(None)` means nothing is buffered and the subscription is alive.
    pub(crate) fn try_recv(&self) -> Option<Result<Option<T>>> {
        // ---
        match self.take() {
            Ok(item) => Some(Ok(item)),
            Err(Some(err)) => Some(Err(err)),
            Err(None) => None,
        }
    }

    /// Upstream completion: stop accepting, drain what is buffered.
    pub(crate) fn complete(&self) {
        // ---
        {
            let mut state = self.state.lock();
            if state.status != Status::Active {
                return;
            }
            state.status = Status::Completed;
        }
        self.space.notify_all();
        self.ready.notify_one();
    }

    /// Consumer disposal: discard buffered payloads and release waiters.
    pub(crate) fn dispose(&self) {
        // ---
        {
            let mut state = self.state.lock();
            state.status = Status::Terminated;
            state.items.clear();
        }
        self.space.notify_all();
        self.ready.notify_one();
    }
}
