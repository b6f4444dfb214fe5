// src/transport/memory/mod.rs

//! In-memory broker.
//!
//! A pure in-process implementation of [`ConnectionFactory`]. It is intended
//! for tests, demos and local execution, and as the reference for how a
//! broker connection is expected to behave under the multiplexer.
//!
//! ## Reference Semantics
//!
//! - Once `apply_subscription()` returns, records published afterwards on a
//!   subscribed destination are delivered to that connection.
//! - Records are delivered in publish order, per connection.
//! - Replacing the subscription drops queued records for destinations that
//!   are no longer subscribed.
//!
//! ## Failure injection
//!
//! Tests can make the next `open` or `poll` calls fail, or make every `close`
//! report an error, to exercise recovery paths without a real broker.
//!
//! ## Non-Goals
//!
//! No persistence, partitions, consumer groups or redelivery.

mod connection;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use connection::MemoryConnection;

use crate::{
    // ---
    log_debug,
    BrokerConnection,
    BrokerRecord,
    ConnectionFactory,
    ConnectionFactoryPtr,
    Destination,
    Error,
    Result,
};

/// Call counters kept by a [`MemoryBroker`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Successful `open` calls.
    pub opens: u64,
    /// `close` calls, including failed ones.
    pub closes: u64,
    /// Successful `apply_subscription` calls.
    pub subscription_calls: u64,
    /// `poll` calls, including failed ones.
    pub polls: u64,
}

/// Per-connection state held by the broker.
struct Slot {
    subscribed: HashSet<Destination>,
    records: VecDeque<BrokerRecord>,
    ready: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    slots: HashMap<u64, Slot>,
    next_id: u64,
    subscription_log: Vec<Vec<Destination>>,
    stats: BrokerStats,
    fail_opens: usize,
    fail_polls: usize,
    fail_close: bool,
}

/// Shared in-process broker.
///
/// Cloning is cheap; every clone refers to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    // ---
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create a new, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// This broker as a shared connection factory.
    pub fn factory(&self) -> ConnectionFactoryPtr {
        Arc::new(self.clone())
    }

    /// Publish a record to every open connection subscribed to its destination.
    ///
    /// Returns the number of connections the record was queued on.
    pub fn publish(&self, record: BrokerRecord) -> usize {
        // ---
        let mut state = self.state.lock();
        let mut delivered = 0;

        for slot in state.slots.values_mut() {
            if slot
                .subscribed
                .iter()
                .any(|dest| dest.as_str() == record.destination)
            {
                slot.records.push_back(record.clone());
                slot.ready.notify_one();
                delivered += 1;
            }
        }

        log_debug!("memory broker: {} queued on {delivered} connection(s)", record.destination);
        delivered
    }

    /// Queue a record on every open connection, ignoring subscriptions.
    ///
    /// Lets tests feed records a real broker might produce but no destination
    /// matches, such as records without a destination.
    pub fn inject(&self, record: BrokerRecord) -> usize {
        // ---
        let mut state = self.state.lock();
        for slot in state.slots.values_mut() {
            slot.records.push_back(record.clone());
            slot.ready.notify_one();
        }
        state.slots.len()
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().fail_opens = n;
    }

    /// Make the next `n` calls to `poll` fail, across all connections.
    pub fn fail_next_polls(&self, n: usize) {
        self.state.lock().fail_polls = n;
    }

    /// Make every subsequent `close` report an error. The connection is
    /// released regardless.
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats.clone()
    }

    /// Every subscription set applied so far, in call order.
    pub fn subscription_log(&self) -> Vec<Vec<Destination>> {
        self.state.lock().subscription_log.clone()
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Destinations currently subscribed across all open connections, sorted.
    pub fn subscribed(&self) -> Vec<Destination> {
        // ---
        let state = self.state.lock();
        let mut all: Vec<Destination> = state
            .slots
            .values()
            .flat_map(|slot| slot.subscribed.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    // ---- connection side ----

    fn take_records(&self, id: u64) -> Result<(Vec<BrokerRecord>, Arc<Notify>)> {
        // ---
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(&id) else {
            return Err(Error::Transport(format!("connection {id} is closed")));
        };

        let records = slot.records.drain(..).collect();
        Ok((records, Arc::clone(&slot.ready)))
    }

    fn begin_poll(&self) -> Result<()> {
        // ---
        let mut state = self.state.lock();
        state.stats.polls += 1;
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(Error::Transport("injected poll failure".to_string()));
        }
        Ok(())
    }

    fn apply(&self, id: u64, destinations: &[Destination]) -> Result<()> {
        // ---
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(&id) else {
            return Err(Error::Transport(format!("connection {id} is closed")));
        };

        slot.subscribed = destinations.iter().cloned().collect();
        let subscribed = &slot.subscribed;
        slot.records
            .retain(|record| subscribed.iter().any(|dest| dest.as_str() == record.destination));

        state.subscription_log.push(destinations.to_vec());
        state.stats.subscription_calls += 1;
        Ok(())
    }

    fn release(&self, id: u64) -> Result<()> {
        // ---
        let mut state = self.state.lock();
        state.slots.remove(&id);
        state.stats.closes += 1;

        if state.fail_close {
            return Err(Error::Transport("injected close failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryBroker {
    // ---
    async fn open(&self) -> Result<Box<dyn BrokerConnection>> {
        // ---
        let mut state = self.state.lock();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::Transport("injected open failure".to_string()));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            Slot {
                subscribed: HashSet::new(),
                records: VecDeque::new(),
                ready: Arc::new(Notify::new()),
            },
        );
        state.stats.opens += 1;
        drop(state);

        log_debug!("memory broker: connection {id} opened");
        Ok(Box::new(MemoryConnection::new(id, self.clone())))
    }
}
