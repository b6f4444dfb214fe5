//! Push-to-pull bridge with enforced backpressure.
//!
//! An [`AsyncSourceBridge`] adapts a push-style producer (any number of
//! threads calling [`BridgeSource::push`]) into a single pull stream
//! ([`BridgeStream`]). The buffer between them is bounded, so a slow consumer
//! stalls the producers instead of causing unbounded buffering or silent
//! drops.
//!
//! ## Concurrency model
//!
//! - Producers block on a bounded-wait enqueue while the buffer is full.
//! - One dedicated drain thread per bridge moves elements out of the buffer,
//!   one at a time and only when the consumer asks for the next element.
//!   Nothing leaves the buffer before it is demanded, so at most `capacity`
//!   elements are ever in flight unconsumed.
//! - Every wait is bounded (`BridgeConfig::wait_timeout`) so completion and
//!   cancellation are observed promptly.
//! - A push holds the read side of a gate from its completion check to its
//!   enqueue; `signal_done()` takes the write side. A push that returned
//!   `Ok` is therefore always in the buffer before the stream can complete.
//!
//! ## Teardown
//!
//! The stream completes when `signal_done()` was called and the buffer is
//! empty, when every `BridgeSource` was dropped, or when the stream is
//! cancelled or dropped. In all cases the release callback runs exactly once,
//! on the drain thread.
//!
//! Ordering across producer threads is only the order in which their elements
//! entered the buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{self as cc, RecvTimeoutError, SendTimeoutError, TryRecvError};
use futures_util::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::{log_debug, log_error, BridgeConfig, Error, Result};

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Result of one bounded-time dequeue on the drain side.
#[derive(Debug, PartialEq, Eq)]
enum Poll<T> {
    /// An element was dequeued.
    Element(T),
    /// Completion was signalled and the buffer is empty.
    Completed,
    /// Nothing arrived within the wait; try again.
    TimedOut,
}

/// State shared by sources, stream and drain thread.
struct Shared {
    done: AtomicBool,
    cancelled: AtomicBool,
    gate: RwLock<()>,
    release: Mutex<Option<ReleaseFn>>,
}

impl Shared {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Run the release callback if it has not run yet.
    fn release(&self) {
        // ---
        let callback = self.release.lock().take();
        if let Some(callback) = callback {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
                log_error!("bridge: release callback panicked");
            }
        }
    }
}

/// Builder for a push-to-pull bridge.
///
/// # Example
///
/// ```
/// use mom_streams::{AsyncSourceBridge, BridgeConfig};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> mom_streams::Result<()> {
/// let (source, mut stream) = AsyncSourceBridge::new(BridgeConfig::default())
///     .on_release(|| println!("released"))
///     .start()?;
///
/// std::thread::spawn(move || {
///     for i in 0..3 {
///         source.push(i).unwrap();
///     }
///     source.signal_done();
/// });
///
/// let mut seen = Vec::new();
/// while let Some(i) = stream.recv().await {
///     seen.push(i);
/// }
/// assert_eq!(seen, [0, 1, 2]);
/// # Ok(())
/// # }
/// ```
pub struct AsyncSourceBridge<T> {
    config: BridgeConfig,
    release: Option<ReleaseFn>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> AsyncSourceBridge<T>
where
    T: Send + 'static,
{
    /// Create a bridge builder.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            release: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register a callback invoked exactly once at teardown.
    pub fn on_release<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(callback));
        self
    }

    /// Start the drain thread and return the producer and consumer halves.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the drain thread cannot be started. The release
    /// callback still runs in that case.
    pub fn start(self) -> Result<(BridgeSource<T>, BridgeStream<T>)> {
        // ---
        let capacity = self.config.capacity.max(1);
        let wait = self.config.wait_timeout;

        let (buffer_tx, buffer_rx) = cc::bounded(capacity);
        let (demand_tx, demand_rx) = cc::bounded(1);
        let (out_tx, out_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            gate: RwLock::new(()),
            release: Mutex::new(self.release),
        });

        let drainer = Drainer {
            buffer: buffer_rx,
            demand: demand_rx,
            out: out_tx,
            shared: Arc::clone(&shared),
            wait,
        };

        if let Err(err) = std::thread::Builder::new()
            .name("bridge-drain".to_string())
            .spawn(move || drainer.run())
        {
            shared.cancel();
            shared.release();
            return Err(Error::Spawn(err.to_string()));
        }

        log_debug!("bridge: started (capacity {capacity})");

        let source = BridgeSource {
            buffer: buffer_tx,
            shared: Arc::clone(&shared),
            wait,
        };

        let stream = BridgeStream {
            out: out_rx,
            demand: demand_tx,
            requested: false,
            shared,
        };

        Ok((source, stream))
    }
}

/// Producer half. Cheap to clone; every clone feeds the same buffer.
pub struct BridgeSource<T> {
    buffer: cc::Sender<T>,
    shared: Arc<Shared>,
    wait: Duration,
}

impl<T> Clone for BridgeSource<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            shared: Arc::clone(&self.shared),
            wait: self.wait,
        }
    }
}

impl<T> BridgeSource<T> {
    /// Push one element, blocking the calling thread while the buffer is full.
    ///
    /// Do not call from an async task; use `spawn_blocking` or a plain thread.
    ///
    /// # Errors
    ///
    /// - [`Error::PushAfterCompletion`] if `signal_done()` was called before
    ///   or while this push was waiting; the element is not accepted.
    /// - [`Error::Cancelled`] if the stream was cancelled or dropped.
    pub fn push(&self, element: T) -> Result<()> {
        // ---
        let mut element = element;

        loop {
            // Held from the completion check through the enqueue.
            let _open = self.shared.gate.read();

            if self.shared.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.shared.is_done() {
                return Err(Error::PushAfterCompletion);
            }

            match self.buffer.send_timeout(element, self.wait) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => element = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::Cancelled),
            }
        }
    }

    /// Mark the source finished.
    ///
    /// Elements already buffered are still delivered before the stream
    /// completes. Further pushes fail. May wait up to one wait period for a
    /// push that is mid-enqueue.
    pub fn signal_done(&self) {
        // ---
        let _closed = self.shared.gate.write();
        if !self.shared.done.swap(true, Ordering::AcqRel) {
            log_debug!("bridge: completion signalled");
        }
    }

    /// Whether `signal_done()` has been called.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Number of elements waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Consumer half: a single pull stream.
///
/// Dropping the stream cancels the bridge.
pub struct BridgeStream<T> {
    out: mpsc::Receiver<T>,
    demand: cc::Sender<()>,
    requested: bool,
    shared: Arc<Shared>,
}

impl<T> BridgeStream<T> {
    /// Pull the next element.
    ///
    /// Returns `None` once the stream has completed or was cancelled.
    /// Cancel-safe: a dropped `recv` future leaves its demand outstanding
    /// and the next call picks the element up.
    pub async fn recv(&mut self) -> Option<T> {
        // ---
        if !self.requested {
            // Full means a demand is already outstanding; disconnected means
            // the drainer is gone and `out` will report the end.
            let _ = self.demand.try_send(());
            self.requested = true;
        }

        let element = self.out.recv().await;
        if element.is_some() {
            self.requested = false;
        }
        element
    }

    /// Cancel the bridge.
    ///
    /// The drain thread completes the stream and runs the release callback
    /// within one wait period; pending and future pushes fail with
    /// [`Error::Cancelled`].
    pub fn cancel(&self) {
        // ---
        if !self.shared.cancelled.swap(true, Ordering::AcqRel) {
            log_debug!("bridge: cancelled");
        }
    }

    /// Whether the bridge was cancelled. Stays set once observed.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Convert into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures_util::stream::unfold(self, |mut stream| async move {
            let element = stream.recv().await?;
            Some((element, stream))
        })
    }
}

impl<T> Drop for BridgeStream<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// The background consumer.
struct Drainer<T> {
    buffer: cc::Receiver<T>,
    demand: cc::Receiver<()>,
    out: mpsc::Sender<T>,
    shared: Arc<Shared>,
    wait: Duration,
}

impl<T> Drainer<T> {
    fn run(self) {
        // ---
        'demand: loop {
            if !self.await_demand() {
                break;
            }

            loop {
                match self.next_element() {
                    Poll::Element(element) => {
                        if self.out.blocking_send(element).is_err() {
                            self.shared.cancel();
                            break 'demand;
                        }
                        continue 'demand;
                    }
                    Poll::TimedOut => {
                        if self.shared.is_cancelled() {
                            break 'demand;
                        }
                    }
                    Poll::Completed => break 'demand,
                }
            }
        }

        log_debug!(
            "bridge: drain loop finished (cancelled: {})",
            self.shared.is_cancelled()
        );

        self.shared.release();
        // `out` is dropped with `self`, which completes the stream.
    }

    /// Wait until the consumer asks for an element.
    ///
    /// Returns `false` once the bridge is cancelled, or once completion was
    /// signalled and nothing is left to deliver.
    fn await_demand(&self) -> bool {
        // ---
        loop {
            if self.shared.is_cancelled() {
                return false;
            }
            if self.shared.is_done() && self.buffer.is_empty() {
                return false;
            }

            match self.demand.recv_timeout(self.wait) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.shared.cancel();
                    return false;
                }
            }
        }
    }

    /// One bounded-time dequeue.
    fn next_element(&self) -> Poll<T> {
        // ---
        match self.buffer.try_recv() {
            Ok(element) => return Poll::Element(element),
            Err(TryRecvError::Disconnected) => return Poll::Completed,
            Err(TryRecvError::Empty) => {}
        }

        if self.shared.is_done() {
            // Accepted pushes land before the flag is set; one more look
            // covers a push that finished after the `try_recv` above.
            return match self.buffer.try_recv() {
                Ok(element) => Poll::Element(element),
                Err(_) => Poll::Completed,
            };
        }

        match self.buffer.recv_timeout(self.wait) {
            Ok(element) => Poll::Element(element),
            Err(RecvTimeoutError::Timeout) => Poll::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Poll::Completed,
        }
    }
}
