//! Retry policy for chain reads
//!
//! Provides configurable retry logic for transient RPC failures. Failures
//! marked as [`SystemicFailure`] are returned immediately.

use std::future::Future;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;

use super::{ChainReader, DeploymentInfo};
use crate::error::SystemicFailure;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, just try once)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Creates a policy with no retries (fail immediately).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Creates a policy with aggressive retries (flaky public RPC endpoints).
    pub fn aggressive() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }

    /// Executes `operation`, retrying failures until the policy is exhausted.
    ///
    /// Errors carrying [`SystemicFailure`] are never retried.
    ///
    /// # Example
    /// ```rust,ignore
    /// let policy = RetryPolicy::default();
    /// let code = policy.execute(|| reader.code_at(address, block_number)).await?;
    /// ```
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempts > 0 {
                        tracing::info!(
                            target: "discovery::retry",
                            "Operation succeeded after {} attempt(s)",
                            attempts + 1
                        );
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if SystemicFailure::is_in(&err) {
                        tracing::error!(
                            target: "discovery::retry",
                            "Systemic failure, not retrying: {:?}",
                            err
                        );
                        return Err(err);
                    }

                    attempts += 1;

                    if attempts > self.max_retries {
                        tracing::error!(
                            target: "discovery::retry",
                            "Operation failed after {} attempts: {:?}",
                            attempts,
                            err
                        );
                        return Err(err);
                    }

                    tracing::warn!(
                        target: "discovery::retry",
                        "Operation failed (attempt {}/{}): {:?}. Retrying in {:?}...",
                        attempts,
                        self.max_retries + 1,
                        err,
                        backoff
                    );

                    sleep(backoff).await;

                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.backoff_multiplier)
                            .min(self.max_backoff.as_secs_f64()),
                    );
                }
            }
        }
    }
}

/// [`ChainReader`] decorator that applies a [`RetryPolicy`] to every call.
pub struct RetryingChainReader<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: ChainReader> RetryingChainReader<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: ChainReader> ChainReader for RetryingChainReader<R> {
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes> {
        self.policy
            .execute(|| self.inner.code_at(address, block_number))
            .await
    }

    async fn deployment_info(&self, address: Address) -> Result<Option<DeploymentInfo>> {
        self.policy
            .execute(|| self.inner.deployment_info(address))
            .await
    }
}
