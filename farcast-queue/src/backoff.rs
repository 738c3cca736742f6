//! Exponential retry backoff.

use std::time::Duration;

/// Base delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_secs(30);

/// Upper bound on the retry delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30 * 60);

/// Delay before re-enqueueing a job that has made `attempts` deliveries:
/// `base * 2^(attempts - 1)`, capped at [`MAX_DELAY`].
pub fn retry_delay(attempts: u32) -> Duration {
    retry_delay_with(attempts, BASE_DELAY, MAX_DELAY)
}

/// [`retry_delay`] with explicit base and cap, for tests and tuning.
pub fn retry_delay_with(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}
