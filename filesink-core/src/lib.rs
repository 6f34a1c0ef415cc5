//! File sink consumer for transactional event channels.
//!
//! A [`sinker::FileSink`] drains one [`message::Event`] per [`sinker::Sink::process`] call:
//! - begin a transaction on the bound [`channel::Channel`]
//! - wait (bounded, with backoff) for an event
//! - append `<payload>:<epoch-millis>\r\n` to the configured file
//! - commit on success, roll back otherwise so the channel redelivers
//!
//! [`runner::SinkRunner`] is the host loop that keeps calling `process` until cancelled.

mod error;
pub use crate::error::{Error, Result};

/// Key/value configuration and the typed configs built from it.
pub mod config;

/// Channel and transaction contract, plus the in-memory channel.
pub mod channel;

/// Event flowing through a channel.
pub mod message;

/// Counters kept by a sink.
pub mod metrics;

/// Host loop driving a sink.
pub mod runner;

/// Sink contract and the file sink.
pub mod sinker;
