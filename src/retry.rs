//! Bounded Retry with Exponential Backoff
//!
//! Every backing-store and data-source call goes through a [`RetryPolicy`]:
//! each attempt is bounded by the per-call timeout, a timed-out attempt
//! counts as a failure, and failures the predicate accepts are retried after
//! `initial_backoff * multiplier^attempt`, capped at `max_backoff`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster::duration_millis;
use crate::error::{Error, Result};

/// Upper bound on the exponent to keep backoff arithmetic finite
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Deadline for a single attempt
    #[serde(with = "duration_millis", rename = "operation_timeout_ms")]
    pub operation_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
            operation_timeout: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::Config(format!(
                "initial_backoff ({:?}) cannot be greater than max_backoff ({:?})",
                self.initial_backoff, self.max_backoff
            )));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::Config("operation_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Successful value plus the retries it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
}

/// Failure after the policy gave up
#[derive(Debug)]
pub struct Exhausted {
    pub error: Error,
    pub retries: u32,
}

impl From<Exhausted> for Error {
    fn from(e: Exhausted) -> Self {
        e.error
    }
}

/// Executes fallible async calls under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry(operation_timeout: Duration) -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            operation_timeout,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
        let millis =
            self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exponent);
        let capped = millis.min(self.config.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// One attempt bounded by the per-call timeout
    pub async fn attempt<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                timeout: self.config.operation_timeout,
            }),
        }
    }

    /// Retry transient errors ([`Error::is_retryable`])
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        f: F,
    ) -> std::result::Result<Attempted<T>, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(operation, Error::is_retryable, f).await
    }

    /// Retry every error except value (de)serialization failures.
    ///
    /// Used for data-source calls, whose failures are opaque to the cache.
    pub async fn run_any<T, F, Fut>(
        &self,
        operation: &str,
        f: F,
    ) -> std::result::Result<Attempted<T>, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(operation, |e| !matches!(e, Error::Serialization(_)), f)
            .await
    }

    /// Retry while `retry_if` accepts the error and attempts remain
    pub async fn run_if<T, F, Fut, P>(
        &self,
        operation: &str,
        retry_if: P,
        mut f: F,
    ) -> std::result::Result<Attempted<T>, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let mut retries = 0u32;
        loop {
            match self.attempt(operation, f()).await {
                Ok(value) => return Ok(Attempted { value, retries }),
                Err(error) => {
                    if retries >= self.config.max_retries || !retry_if(&error) {
                        if retries > 0 {
                            warn!(
                                operation,
                                retries,
                                "Giving up after retries: {}",
                                error
                            );
                        }
                        return Err(Exhausted { error, retries });
                    }
                    let delay = self.delay_for(retries);
                    debug!(
                        operation,
                        attempt = retries + 1,
                        delay = ?delay,
                        "Retrying after error: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
            }
        }
    }
}
