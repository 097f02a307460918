//! Bounded exponential backoff for remote calls

use crate::error::{IngestError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_JITTER_MS: u64 = 250;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Retry schedule: attempt `n` (1-based) failing transiently waits
/// `min(base * 2^(n-1), max) + rand(0..=jitter)` before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts. Used by tests and fakes.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Delay before the attempt following `attempt`, without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// Each attempt is bounded by `attempt_timeout`; an elapsed timeout counts
    /// as a transient failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::transient(format!(
                    "{} timed out after {:?}",
                    operation, self.attempt_timeout
                ))),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.jittered(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                other => return other,
            }
        }
    }
}
