//! Retry policies with exponential backoff
//!
//! Wraps remote calls made during provisioning. Only transient failures are
//! retried; a server refusal or a missing remote fails immediately.

use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::api::remote::RemoteError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry behavior of a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryableError {
    /// Timeouts, dropped connections, server errors
    Transient,
    /// The server answered and refused
    Rejected,
    /// No remote to talk to
    Unavailable,
    /// Anything not raised by a remote implementation
    Unknown,
}

impl RetryableError {
    pub fn should_retry(&self) -> bool {
        match self {
            RetryableError::Transient => true,
            RetryableError::Unknown => true,
            RetryableError::Rejected => false,
            RetryableError::Unavailable => false,
        }
    }

    pub fn classify(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<RemoteError>() {
            Some(RemoteError::Transient(_)) => RetryableError::Transient,
            Some(RemoteError::Rejected { .. }) => RetryableError::Rejected,
            Some(RemoteError::Unavailable) => RetryableError::Unavailable,
            None => RetryableError::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of attempts
    pub async fn execute<F, Fut, T>(&self, label: &str, operation: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("{} (attempt {}/{})", label, attempt, max_attempts);

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", label, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let should_retry = RetryableError::classify(&error).should_retry();
                    if !should_retry || attempt >= max_attempts {
                        warn!(
                            "{} failed permanently on attempt {} (should_retry: {}): {:#}",
                            label, attempt, should_retry, error
                        );
                        return Err(error);
                    }

                    warn!("{} failed on attempt {} (retryable): {:#}", label, attempt, error);
                    let delay = self.calculate_delay(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Exponential backoff delay with optional jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.config.base_delay.as_millis() as f64)
            * self.config.backoff_multiplier.powi(attempt as i32 - 1);

        let mut delay = Duration::from_millis(delay_ms as u64).min(self.config.max_delay);

        if self.config.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            delay = Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64);
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_classification() {
        let transient: anyhow::Error = RemoteError::Transient("timeout".into()).into();
        let rejected: anyhow::Error = RemoteError::Rejected {
            operation: "op".into(),
            message: "no".into(),
        }
        .into();

        assert!(RetryableError::classify(&transient).should_retry());
        assert!(!RetryableError::classify(&rejected).should_retry());
        assert!(!RetryableError::classify(&RemoteError::Unavailable.into()).should_retry());
        assert!(RetryableError::classify(&anyhow::anyhow!("io")).should_retry());
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_success_on_second_attempt() {
        let policy = RetryPolicy::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute("fetch", || {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        Err(RemoteError::Transient("reset".into()).into())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let policy = RetryPolicy::new(fast_config(5));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: anyhow::Result<()> = policy
            .execute("fetch", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RemoteError::Rejected {
                        operation: "fetch".into(),
                        message: "forbidden".into(),
                    }
                    .into())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: anyhow::Result<()> = policy
            .execute("fetch", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Transient("503".into()).into()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
