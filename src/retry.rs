//! Retry controller: exponential backoff over transient model errors.
//!
//! Backoff is deterministic from the attempt index (initial delay times
//! `multiplier^(attempt-1)`, bounded by a ceiling). Only transient errors
//! are retried; permanent errors return immediately. Exhausting the attempt
//! budget returns the last underlying error tagged as
//! [`ModelError::Exhausted`].

use std::future::Future;
use std::time::Duration;

use crate::model::ModelError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay to sleep after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts the policy.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient model error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_transient() => {
                return Err(ModelError::Exhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
