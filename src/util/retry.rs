//! Bounded retry with linearly increasing backoff.

use std::time::Duration;

use anyhow::Result;

/// How many times to try an operation and how long to wait in between.
///
/// The delay before the second attempt is `initial_delay`; every further
/// attempt waits `increment` longer than the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub increment: Duration,
}

impl RetryPolicy {
    /// Try once, never sleep.
    pub const fn once() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            increment: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay + self.increment * attempt.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 20,
            initial_delay: Duration::from_secs(1),
            increment: Duration::from_millis(500),
        }
    }
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
/// The closure receives the 1-based attempt number. The last error is
/// returned unchanged.
pub fn retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!("Giving up on {} after {} attempts", what, attempt);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "Error during {} (attempt {} of {}): {:#}; retrying in {:.1}s",
                    what,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_secs_f64()
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
