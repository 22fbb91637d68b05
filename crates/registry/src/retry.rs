//! Retry with exponential backoff for idempotent registry reads.
//!
//! Only reads go through here. Writes that consume a ticket are never
//! retried after an unavailable error: the first attempt may have been
//! applied, and repeating it would spend a single-use ticket twice.

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Backoff schedule for retried reads.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }
}

/// Runs `operation`, retrying while it fails with [`RegistryError::Unavailable`].
#[tracing::instrument(skip(policy, operation), fields(max_retries = policy.max_retries))]
pub async fn with_read_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> RegistryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RegistryResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt = attempt + 1, "read succeeded after retry");
                }
                return Ok(value);
            },
            Err(err @ RegistryError::Unavailable { .. }) if attempt < policy.max_retries => {
                let delay = compute_backoff(policy, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "registry unavailable, retrying read after backoff",
                );
                fail_point!("registry-retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

/// `initial * 2^attempt`, capped, plus up to 50% jitter.
fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(policy.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}
