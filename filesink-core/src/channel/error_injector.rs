//! Fault injection for [`MemoryChannel`](super::MemoryChannel), used to exercise the failure
//! paths of sinks.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Makes the next N channel operations of a kind fail.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    fail_next_takes: AtomicUsize,
    fail_next_commits: AtomicUsize,
    fail_next_rollbacks: AtomicUsize,
}

impl ErrorInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next N `take` calls.
    pub fn fail_takes(&self, count: usize) {
        self.fail_next_takes.store(count, Ordering::Relaxed);
    }

    /// Fail the next N `commit` calls. The transaction stays open.
    pub fn fail_commits(&self, count: usize) {
        self.fail_next_commits.store(count, Ordering::Relaxed);
    }

    /// Fail the next N `rollback` calls. The transaction stays open.
    pub fn fail_rollbacks(&self, count: usize) {
        self.fail_next_rollbacks.store(count, Ordering::Relaxed);
    }

    pub(crate) fn should_fail_take(&self) -> bool {
        Self::decrement_counter(&self.fail_next_takes)
    }

    pub(crate) fn should_fail_commit(&self) -> bool {
        Self::decrement_counter(&self.fail_next_commits)
    }

    pub(crate) fn should_fail_rollback(&self) -> bool {
        Self::decrement_counter(&self.fail_next_rollbacks)
    }

    /// True if the counter was above zero, in which case it is decremented.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }
}
