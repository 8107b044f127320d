//! Bounded retry with exponential backoff for flaky remote operations

use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{error, warn};

/// Attempts made before giving up on a remote operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound for any single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Retry policy shared by every retried tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            // the first attempt is not a retry
            max_retries: self.max_attempts.saturating_sub(1),
            current_attempt: 0,
        }
    }

    /// Run `op` until it succeeds, the error is not retryable, or attempts
    /// run out. Only external tool failures are retried.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_if(what, Error::is_tool_failure, &mut op)
    }

    /// Like [`RetryPolicy::run`] with a custom retryable predicate
    pub fn run_if<T, F, P>(&self, what: &str, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: Fn(&Error) -> bool,
    {
        let mut backoff = self.backoff();
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) => {
                    if let Some(delay) = backoff.next_delay() {
                        warn!(
                            "{} failed (attempt {}), retrying in {:?}: {}",
                            what, backoff.current_attempt, delay, e
                        );
                        std::thread::sleep(delay);
                    } else {
                        error!("{} failed after {} attempts: {}", what, self.max_attempts, e);
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff helper
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Get the next delay, or None if max attempts reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }

        let delay = self
            .base_delay
            .checked_mul(2u32.saturating_pow(self.current_attempt))
            .unwrap_or(self.max_delay);
        self.current_attempt += 1;

        Some(delay.min(self.max_delay))
    }

}
