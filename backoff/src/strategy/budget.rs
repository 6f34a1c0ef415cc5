use std::time::Duration;

/// Wraps a schedule so the delays it yields never add up to more than `budget`.
///
/// The delay that would overshoot is shortened to whatever is left, after which the schedule
/// is exhausted. The inner schedule must not yield zero delays, otherwise the budget is never
/// spent.
#[derive(Debug, Clone)]
pub struct Budget<I> {
    inner: I,
    remaining: Duration,
}

impl<I> Budget<I>
where
    I: Iterator<Item = Duration>,
{
    pub fn new(inner: I, budget: Duration) -> Self {
        Self {
            inner,
            remaining: budget,
        }
    }

    /// Time still available for sleeping.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

impl<I> Iterator for Budget<I>
where
    I: Iterator<Item = Duration>,
{
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_zero() {
            return None;
        }
        let delay = self.inner.next()?.min(self.remaining);
        self.remaining -= delay;
        Some(delay)
    }
}
