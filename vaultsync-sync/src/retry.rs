//! Retry with exponential backoff.
//!
//! Only errors classified as transient by
//! [`SyncError::is_transient`](crate::error::SyncError::is_transient) are
//! retried; everything else is returned on the first failure.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff policy.
///
/// Presets:
/// - [`RetryConfig::connect()`] fails fast so a bad URL or credential is
///   reported quickly
/// - [`RetryConfig::cycle()`] is the default for replication cycles
/// - [`RetryConfig::live()`] never gives up (live sync loop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` retries forever.
    pub max_attempts: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::cycle()
    }
}

impl RetryConfig {
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    #[must_use]
    pub fn cycle() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    #[must_use]
    pub fn live() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
        }
    }

    /// Minimal delays, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Checks that the policy can be evaluated.
    pub fn validate(&self) -> Result<(), String> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!(
                "retry factor must be a finite number of at least 1, got {}",
                self.factor
            ));
        }
        if self.max_attempts == Some(0) {
            return Err("retry max_attempts must be at least 1".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor.max(1.0))
                .unwrap_or(self.max_delay)
                .min(self.max_delay);
        }
        delay.min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error or
/// runs out of attempts.
pub async fn retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, attempts, "succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                attempts += 1;
                if config.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(err.context(format!(
                        "{operation_name} gave up after {attempts} attempts"
                    )));
                }
                let delay = config.delay_for(attempts);
                warn!(
                    operation = operation_name,
                    attempts,
                    ?delay,
                    error = %err,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

