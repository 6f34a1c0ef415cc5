use std::time::Duration;

use rand::Rng;

/// Delay schedule that multiplies the previous delay by `factor`, capped at `max_interval`.
///
/// The n-th delay is `base_interval * factor^(n - 1)`, optionally spread by `jitter` (a fraction
/// between 0.0 and 1.0, so 0.5 means anywhere in `[0.5x, 1.5x]`).
///
/// ```
/// use backoff::strategy::exponential::Exponential;
/// use std::time::Duration;
///
/// let mut schedule = Exponential::from_millis(10, 100, 2.0, 0.0, Some(3));
/// assert_eq!(schedule.next(), Some(Duration::from_millis(10)));
/// assert_eq!(schedule.next(), Some(Duration::from_millis(20)));
/// assert_eq!(schedule.next(), Some(Duration::from_millis(40)));
/// assert_eq!(schedule.next(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Exponential {
    base_interval: Duration,
    max_interval: Duration,
    factor: f64,
    jitter: f64,
    /// `None` keeps yielding forever.
    max_attempts: Option<u16>,
    attempt: u16,
}

impl Exponential {
    pub fn new(
        base_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self {
            base_interval,
            max_interval,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_millis(
        base_interval_ms: u64,
        max_interval_ms: u64,
        factor: f64,
        jitter: f64,
        max_attempts: Option<u16>,
    ) -> Self {
        Self::new(
            Duration::from_millis(base_interval_ms),
            Duration::from_millis(max_interval_ms),
            factor,
            jitter,
            max_attempts,
        )
    }

    /// Starts the schedule over from `base_interval`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since creation or the last [`Exponential::reset`].
    pub fn attempt(&self) -> u16 {
        self.attempt
    }

    fn delay_for(&self, attempt: u16) -> Duration {
        let exponent = i32::from(attempt.saturating_sub(1));
        let mut millis = self.base_interval.as_millis() as f64 * self.factor.powi(exponent);

        if self.jitter > 0.0 {
            millis *= rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        }

        // float -> int casts saturate, so an overflowing product lands on the cap
        Duration::from_millis(millis as u64).min(self.max_interval)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max_attempts) = self.max_attempts
            && self.attempt >= max_attempts
        {
            return None;
        }

        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay_for(self.attempt))
    }
}
