//! Sinks drain events from a [`crate::channel::Channel`] and deliver them somewhere else.
//!
//! Every call to [`Sink::process`] handles at most one event inside its own transaction and
//! reports whether the caller may call again right away ([`Status::Ready`]) or should pause
//! first ([`Status::Backoff`]).

use std::fmt;

use crate::Result;

mod file;
pub use file::FileSink;

/// Outcome of one successful [`Sink::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// An event was delivered and committed.
    Ready,
    /// No event showed up within the wait budget; nothing was written.
    Backoff,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ready => write!(f, "READY"),
            Status::Backoff => write!(f, "BACKOFF"),
        }
    }
}

#[trait_variant::make(Sink: Send)]
pub trait LocalSink {
    /// Takes one event, delivers it and commits. On failure the transaction is rolled back,
    /// the event stays in the channel and the error is returned as
    /// [`crate::Error::Delivery`].
    async fn process(&mut self) -> Result<Status>;

    fn name(&self) -> &str;
}
