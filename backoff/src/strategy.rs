/// Caps the total time a schedule may spend sleeping.
pub mod budget;

/// Delay grows by a factor on every attempt.
pub mod exponential;

/// Same delay on every attempt.
pub mod fixed;
