//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Bounded fetch-latest, mutate, write, retry-on-conflict combinator."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use ordset_api::StoreError;
use ordset_common::RetryConfig;
use rand::Rng;
use tracing::debug;

use crate::error::ReconcileError;

/// Retry budget for optimistic-concurrency conflicts within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: usize,
    /// Delay before the second attempt, doubled on each further attempt.
    pub base_delay: Duration,
    /// Upper bound of random delay added to each wait.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Policy with at least one attempt.
    pub fn new(max_attempts: usize, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed).
    fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = (attempt.saturating_sub(1) as u32).min(8);
        let base = self.base_delay.saturating_mul(2u32.pow(exponent));
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis().max(1)) as u64;
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.jitter)
    }
}

/// Run `operation` until it succeeds, fails with something other than a conflict, or
/// the attempt budget runs out.
///
/// `operation` receives the attempt number (1-indexed) and must fetch the latest object
/// itself on attempts after the first.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    key: &str,
    mut operation: F,
) -> Result<T, ReconcileError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    for attempt in 1..=policy.max_attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() => {
                if attempt == policy.max_attempts {
                    break;
                }
                let delay = policy.backoff_delay(attempt);
                debug!(key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "write conflict; refetching");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::ConflictRetriesExhausted {
        key: key.to_owned(),
        attempts: policy.max_attempts,
    })
}
