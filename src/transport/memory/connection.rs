// src/transport/memory/connection.rs

use std::time::Duration;

use tokio::time::Instant;

use super::MemoryBroker;
use crate::{BrokerConnection, BrokerRecord, Destination, Error, Result};

/// One connection handed out by [`MemoryBroker`].
pub(super) struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
    closed: bool,
}

impl MemoryConnection {
    pub(super) fn new(id: u64, broker: MemoryBroker) -> Self {
        Self {
            id,
            broker,
            closed: false,
        }
    }
}

#[async_trait::async_trait]
impl BrokerConnection for MemoryConnection {
    // ---
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<BrokerRecord>> {
        // ---
        self.broker.begin_poll()?;
        let deadline = Instant::now() + timeout;

        loop {
            let (records, ready) = self.broker.take_records(self.id)?;
            if !records.is_empty() {
                return Ok(records);
            }

            if tokio::time::timeout_at(deadline, ready.notified()).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn apply_subscription(&mut self, destinations: &[Destination]) -> Result<()> {
        // ---
        if self.closed {
            return Err(Error::Transport(format!("connection {} is closed", self.id)));
        }
        self.broker.apply(self.id, destinations)
    }

    async fn close(&mut self) -> Result<()> {
        // ---
        self.closed = true;
        crate::log_debug!("memory broker: connection {} closed", self.id);
        self.broker.release(self.id)
    }
}
