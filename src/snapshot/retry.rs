use super::ChainError;
use crate::constants::{FETCH_BASE_DELAY_MILLIS, FETCH_MAX_DELAY_MILLIS, OPTIONAL_FETCH_ATTEMPTS};
use std::{future::Future, time::Duration};
use tracing::warn;

/// Capped exponential backoff for chain queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(FETCH_BASE_DELAY_MILLIS),
            max_delay: Duration::from_millis(FETCH_MAX_DELAY_MILLIS),
        }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::unbounded()
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retrying after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay.max(self.base_delay))
    }
}

/// Policies for required and optional parts of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicies {
    pub required: RetryPolicy,
    pub optional: RetryPolicy,
}

impl Default for FetchPolicies {
    fn default() -> Self {
        Self {
            required: RetryPolicy::unbounded(),
            optional: RetryPolicy::bounded(OPTIONAL_FETCH_ATTEMPTS),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    warn!("Fetching {what} failed after {attempt} attempts: {e}");
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                match policy.max_attempts {
                    Some(max) => warn!(
                        "Fetching {what} failed (attempt {attempt}/{max}), retrying in {}ms: {e}",
                        delay.as_millis()
                    ),
                    None => warn!(
                        "Fetching {what} failed (attempt {attempt}), retrying in {}ms: {e}",
                        delay.as_millis()
                    ),
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
