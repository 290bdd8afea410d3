//! Bounded retry with exponential backoff and jitter
//!
//! Every outbound call goes through [`execute`]. Client errors (4xx other
//! than 429) fail immediately; rate limits, server errors and failures
//! without a status code are retried until the attempt budget runs out.

use crate::error::HasStatusCode;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Status codes retried by every outbound client in this crate
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry configuration for one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retryable_status_codes: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Whether a failure carrying `status` may be attempted again.
    pub fn is_retryable(&self, status: Option<u16>) -> bool {
        match status {
            None => true,
            Some(code) if self.retryable_status_codes.contains(&code) => true,
            Some(code) if (400..500).contains(&code) => false,
            Some(code) => code >= 500,
        }
    }

    /// Backoff before the attempt following `attempt` (0-based), given a
    /// jitter sample in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponential = self
            .initial_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay);
        let jitter = self.initial_delay.mul_f64(jitter_sample.clamp(0.0, 1.0));

        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails terminally, or exhausts
/// `policy.max_attempts`.
pub async fn execute<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: HasStatusCode + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let status = e.status_code();

                if !policy.is_retryable(status) {
                    error!(?status, error = %e, "Terminal failure, not retrying");
                    return Err(e);
                }

                if attempt + 1 >= max_attempts {
                    error!(
                        ?status,
                        attempts = max_attempts,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempt, rand::random::<f64>());
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    ?status,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
