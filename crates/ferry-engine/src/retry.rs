//! Retry with exponential backoff
//!
//! `delay(n) = min(base * 2^(n-1), max)` after the n-th failed attempt,
//! optionally jittered to a uniform draw from `[delay/2, delay]`. Fatal errors
//! are never retried.

use crate::error::TransferError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Result of the last attempt and how many attempts were made
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, TransferError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that retries immediately, for tests and local stores
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Un-jittered delay after `attempt` failures (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let low = delay / 2;
        rand::thread_rng().gen_range(low..=delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out
    pub async fn run<T, F, Fut>(&self, unit_id: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err @ TransferError::Fatal(_)) => {
                    debug!(unit_id, attempt, error = %err, "Fatal error, not retrying");
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(unit_id, attempts = attempt, error = %err, "Retries exhausted");
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    let delay = self.delay(attempt);
                    warn!(
                        unit_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying unit"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
