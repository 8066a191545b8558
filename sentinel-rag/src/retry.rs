//! Per-call timeouts and retry with exponential backoff.
//!
//! Every external call the pipelines make (embedding, vector search,
//! rerank, generation) goes through [`with_retry`]. Guard calls do not:
//! a guard that times out is treated as an unsafe verdict immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// A policy that retries without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, initial_delay_ms: 0, max_delay_ms: 0, jitter: 0.0, ..Self::default() }
    }

    /// Calculate the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31) as i32;
        let base_ms = (self.initial_delay_ms as f64) * self.backoff_factor.max(1.0).powi(exp);
        let base_ms = base_ms.min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 && base_ms > 0.0 {
            let range = base_ms * jitter;
            base_ms + rand::rng().random_range(-range..=range)
        } else {
            base_ms
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Run `operation` with a per-attempt `timeout`, retrying transient failures.
///
/// Only errors for which [`RagError::is_retryable`] holds are retried. A timed
/// out attempt becomes [`RagError::Timeout`]. The error of the final attempt
/// is returned once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout { operation: operation.to_string(), after: timeout }),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
