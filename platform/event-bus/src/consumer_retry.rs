//! Consumer retry logic with exponential backoff
//!
//! Retries a failing operation in-process before the failure is handed back
//! to the transport as a negative acknowledgement.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_interval: Duration,
    /// Cap on any single backoff
    pub max_interval: Duration,
    /// Growth factor applied to the backoff after each retry
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

/// Invalid retry configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error("multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("max_interval ({max:?}) must not be shorter than initial_interval ({initial:?})")]
    IntervalOrder { initial: Duration, max: Duration },
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RetryConfigError::InvalidMultiplier(self.multiplier));
        }
        if self.max_interval < self.initial_interval {
            return Err(RetryConfigError::IntervalOrder {
                initial: self.initial_interval,
                max: self.max_interval,
            });
        }
        Ok(())
    }

    /// Backoff schedule described by this config
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            next: self.initial_interval,
            max: self.max_interval,
            multiplier: self.multiplier,
        }
    }
}

/// Non-decreasing backoff intervals: `initial * multiplier^n`, capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = std::cmp::min(self.next, self.max);
        let grown = self.next.as_secs_f64() * self.multiplier;
        // NaN or negative growth saturates at the cap
        self.next = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::try_from_secs_f64(grown).unwrap_or(self.max)
        };
        Some(current)
    }
}

/// Retry a fallible async operation with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `config` - Retry configuration
/// * `context` - Context string for logging (e.g., the handler name)
///
/// # Returns
/// * `Ok(T)` if the operation succeeds within `max_retries + 1` attempts
/// * `Err(E)` with the last error once retries are exhausted
///
/// # Example
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let result = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &config,
///     "example_operation"
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0;
    let mut backoff = config.backoff();

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    debug!(
                        context = %context,
                        retries = retries,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if retries >= config.max_retries {
                    warn!(
                        context = %context,
                        retries = retries,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let wait = backoff.next().unwrap_or(config.max_interval);
                retries += 1;

                warn!(
                    context = %context,
                    retry = retries,
                    max_retries = config.max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(wait).await;
            }
        }
    }
}
