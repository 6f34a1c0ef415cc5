//! Retry helpers used while waiting on a channel.
//!
//! [`retry::Retry`] drives an [`Operation`] until it succeeds, the [`Condition`] rejects the
//! error, or the delay schedule runs dry. Schedules are plain `Iterator<Item = Duration>`s, see
//! [`strategy`].

use std::future::Future;

/// Future that re-runs an operation following a delay schedule.
pub mod retry;

/// Delay schedules.
pub mod strategy;

/// An operation that can be attempted more than once.
pub trait Operation {
    type Item;
    type Error;
    type Future: Future<Output = Result<Self::Item, Self::Error>>;

    /// Starts a fresh attempt.
    fn run(&mut self) -> Self::Future;
}

impl<I, E, T, F> Operation for F
where
    T: Future<Output = Result<I, E>>,
    F: FnMut() -> T,
{
    type Item = I;
    type Error = E;
    type Future = T;

    fn run(&mut self) -> Self::Future {
        self()
    }
}

/// Decides whether a failed attempt is worth another try.
pub trait Condition<E> {
    fn can_retry(&mut self, error: &E) -> bool;
}

impl<E, F> Condition<E> for F
where
    F: FnMut(&E) -> bool,
{
    fn can_retry(&mut self, error: &E) -> bool {
        self(error)
    }
}
