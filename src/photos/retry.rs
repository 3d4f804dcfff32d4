//! Bounded retry for provider calls.

use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
    /// Wait before retrying after a 429 where the caller chooses to retry at all.
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: config.retry_delay(),
            rate_limit_backoff: config.rate_limit_backoff(),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or runs out of attempts.
///
/// Only [`ProviderError::Transient`] is retried; the delay grows linearly per attempt.
/// Rate limits are returned immediately so the caller can decide what a 429 means.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                tracing::warn!(
                    error = %e,
                    attempts_left = policy.attempts - attempt,
                    "{what} failed, retrying"
                );
                tokio::time::sleep(policy.delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
