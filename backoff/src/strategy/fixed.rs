use std::time::Duration;

/// Yields the same delay forever. Combine with [`Iterator::take`] or
/// [`super::budget::Budget`] to bound it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    delay: Duration,
}

impl Interval {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl Iterator for Interval {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.delay)
    }
}
