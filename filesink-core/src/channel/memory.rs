//! Bounded in-memory [`Channel`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{Channel, ErrorInjector, Transaction, TxnState};
use crate::config::ChannelConfig;
use crate::message::{Event, EventId};
use crate::{Error, Result};

#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<Event>,
    /// Events taken by open transactions. They still count against the capacity.
    in_flight: usize,
    next_id: u64,
}

/// FIFO channel kept in memory. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: Arc<str>,
    state: Arc<Mutex<ChannelState>>,
    capacity: usize,
    transaction_capacity: usize,
    error_injector: Arc<ErrorInjector>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<Arc<str>>, config: ChannelConfig) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(config.capacity),
                in_flight: 0,
                next_id: 1,
            })),
            capacity: config.capacity,
            transaction_capacity: config.transaction_capacity,
            error_injector: Arc::new(ErrorInjector::new()),
        }
    }

    /// Appends an event at the tail. Fails with [`Error::ChannelFull`] once queued plus
    /// in-flight events reach the capacity.
    pub fn put(&self, body: impl Into<Bytes>) -> Result<EventId> {
        self.put_with_headers(body, HashMap::new())
    }

    pub fn put_with_headers(
        &self,
        body: impl Into<Bytes>,
        headers: HashMap<String, String>,
    ) -> Result<EventId> {
        let mut state = self.state.lock();
        if state.queue.len() + state.in_flight >= self.capacity {
            return Err(Error::ChannelFull(format!(
                "channel {} is at capacity {}",
                self.name, self.capacity
            )));
        }
        let id = EventId::new(state.next_id);
        state.next_id += 1;
        state
            .queue
            .push_back(Event::with_headers(id, body, headers));
        Ok(id)
    }

    /// Number of queued events, not counting the ones held by open transactions.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// True when nothing is queued and no transaction holds an event.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.in_flight == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        let state = self.state.lock();
        self.capacity
            .saturating_sub(state.queue.len() + state.in_flight)
    }

    pub fn error_injector(&self) -> Arc<ErrorInjector> {
        Arc::clone(&self.error_injector)
    }
}

impl Channel for MemoryChannel {
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn begin_transaction(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            channel: self.clone(),
            taken: Vec::new(),
            state: TxnState::Open,
        })
    }
}

/// Transaction over a [`MemoryChannel`]. Dropping it closes it.
#[derive(Debug)]
pub struct MemoryTransaction {
    channel: MemoryChannel,
    taken: Vec<Event>,
    state: TxnState,
}

impl MemoryTransaction {
    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.state != TxnState::Open {
            return Err(Error::Channel(format!(
                "cannot {op}, transaction is {}",
                self.state
            )));
        }
        Ok(())
    }

    /// Puts taken events back at the head of the queue, keeping their order.
    fn restore(&mut self) {
        if self.taken.is_empty() {
            return;
        }
        let mut state = self.channel.state.lock();
        state.in_flight -= self.taken.len();
        for event in self.taken.drain(..).rev() {
            state.queue.push_front(event);
        }
    }
}

impl Transaction for MemoryTransaction {
    fn state(&self) -> TxnState {
        self.state
    }

    fn take(&mut self) -> Result<Option<Event>> {
        self.ensure_open("take")?;
        if self.channel.error_injector.should_fail_take() {
            return Err(Error::Channel("injected take failure".to_string()));
        }
        if self.taken.len() >= self.channel.transaction_capacity {
            return Err(Error::Channel(format!(
                "transaction capacity {} of channel {} exhausted",
                self.channel.transaction_capacity, self.channel.name
            )));
        }

        let mut state = self.channel.state.lock();
        let Some(event) = state.queue.pop_front() else {
            return Ok(None);
        };
        state.in_flight += 1;
        drop(state);

        self.taken.push(event.clone());
        Ok(Some(event))
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;
        if self.channel.error_injector.should_fail_commit() {
            return Err(Error::Channel("injected commit failure".to_string()));
        }
        if !self.taken.is_empty() {
            self.channel.state.lock().in_flight -= self.taken.len();
            debug!(channel = %self.channel.name, events = self.taken.len(), "Committed transaction");
            self.taken.clear();
        }
        self.state = TxnState::Committed;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open("rollback")?;
        if self.channel.error_injector.should_fail_rollback() {
            return Err(Error::Channel("injected rollback failure".to_string()));
        }
        self.restore();
        self.state = TxnState::RolledBack;
        Ok(())
    }

    fn close(&mut self) {
        if self.state == TxnState::Open {
            self.restore();
        }
        self.state = TxnState::Closed;
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.close();
    }
}
