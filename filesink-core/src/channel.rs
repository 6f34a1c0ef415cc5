//! Transactional event channels.
//!
//! A sink drains a [`Channel`] one [`Transaction`] at a time: events taken inside a
//! transaction are removed for good only on [`Transaction::commit`]. Rolling back, or closing
//! (dropping) an open transaction, makes them available again in their original order.

use std::fmt;

use crate::Result;
use crate::message::Event;

mod error_injector;
pub use error_injector::ErrorInjector;

pub mod memory;
pub use memory::{MemoryChannel, MemoryTransaction};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Open => write!(f, "open"),
            TxnState::Committed => write!(f, "committed"),
            TxnState::RolledBack => write!(f, "rolled-back"),
            TxnState::Closed => write!(f, "closed"),
        }
    }
}

/// A source of events that can be consumed under transactions. Shared by any number of
/// concurrent consumers.
pub trait Channel: Send + Sync + 'static {
    type Transaction: Transaction;

    fn name(&self) -> &str;

    /// Opens a new transaction. Every consumer owns its own transaction.
    fn begin_transaction(&self) -> Result<Self::Transaction>;
}

/// A unit of work against a [`Channel`].
///
/// `commit` and `rollback` are only valid while the transaction is open; `close` may be called
/// any number of times and rolls back implicitly if nothing else ended the transaction.
pub trait Transaction: Send + 'static {
    fn state(&self) -> TxnState;

    /// Takes the next event without waiting. `None` means the channel is currently empty.
    fn take(&mut self) -> Result<Option<Event>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn close(&mut self);
}
