//! Bounded retry with exponential backoff
//!
//! Every network round-trip in the crate goes through [`execute_with_retry`].
//! Errors decide for themselves whether another attempt can help by
//! implementing [`Retryable`]; a non-retryable error short-circuits without
//! consuming the remaining attempts.

use crate::timing::Sleeper;
use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// Classification hook for errors passed through the retry loop
pub trait Retryable {
    /// Returns true when repeating the same operation may succeed
    fn is_retryable(&self) -> bool;
}

/// Retry limits for a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the failed attempt with the given 0-based index
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = 1u32 << attempt_index.min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `operation` until it succeeds, fails non-retryably, or runs out of attempts
///
/// After a retryable failure of attempt `i` (0-based) the loop sleeps
/// `base_delay * 2^i`. The last attempt's error is returned without
/// sleeping. `label` only shows up in the log.
pub fn execute_with_retry<T, E, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_index = 0u32;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt_index + 1 >= max_attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay_for(attempt_index);
                warn!(
                    "{} failed ({}), retrying in {}s (attempt {}/{})",
                    label,
                    err,
                    delay.as_secs_f32(),
                    attempt_index + 1,
                    max_attempts
                );
                sleeper.sleep(delay);
                attempt_index += 1;
            }
        }
    }
}
