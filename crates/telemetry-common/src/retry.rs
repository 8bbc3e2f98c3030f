//! Exponential backoff with jitter.
//!
//! Two consumers: startup calls that must eventually succeed go through
//! [`retry_with_backoff`], and controllers keep a [`FailureBackoff`] per
//! object so repeated reconcile failures requeue further and further out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff schedule
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts before giving up; 0 retries forever
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Bounded schedule with the default delays
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Schedule used for requeueing failed reconciles: 5s doubling up to 5m
    pub fn reconcile() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Scale `delay` by a random factor in [0.5, 1.5)
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Run `operation` until it succeeds or the attempt budget is spent
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if config.max_attempts > 0 && attempt >= config.max_attempts => {
                error!(operation = %operation_name, attempt, error = %e, "giving up after max retries");
                return Err(e);
            }
            Err(e) => {
                let delay = jitter(config.delay_for(attempt));
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-object failure counters driving reconcile requeue delays
#[derive(Debug)]
pub struct FailureBackoff {
    config: RetryConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl FailureBackoff {
    /// Tracker using `config` as its schedule
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let count = failures.entry(key.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        jitter(self.config.delay_for(attempt))
    }

    /// Forget the failure history of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    /// Failures recorded for `key` since the last reset
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for FailureBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::reconcile())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delays_double_and_cap() {
        let config = RetryConfig::reconcile();
        assert_eq!(config.delay_for(1), Duration::from_secs(5));
        assert_eq!(config.delay_for(2), Duration::from_secs(10));
        assert_eq!(config.delay_for(3), Duration::from_secs(20));
        assert_eq!(config.delay_for(20), Duration::from_secs(300));
    }

    #[test]
    fn failure_backoff_grows_until_reset() {
        let backoff = FailureBackoff::default();
        let first = backoff.next_delay("trace/a");
        assert!(first >= Duration::from_millis(2500) && first < Duration::from_millis(7500));
        backoff.next_delay("trace/a");
        backoff.next_delay("trace/a");
        assert_eq!(backoff.failures("trace/a"), 3);
        assert_eq!(backoff.failures("trace/b"), 0);

        backoff.reset("trace/a");
        assert_eq!(backoff.failures("trace/a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<&str, String> =
            retry_with_backoff(&RetryConfig::with_max_attempts(5), "install-crds", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("connection refused".to_string())
                    } else {
                        Ok("installed")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("installed"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> =
            retry_with_backoff(&RetryConfig::with_max_attempts(3), "install-crds", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("forbidden".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
