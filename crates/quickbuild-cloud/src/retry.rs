//! Bounded exponential backoff for service calls

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;

/// Retry configuration for service operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier.max(1.0)).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// the attempt budget is spent.
pub async fn with_retry<T, F, Fut, P>(
    config: &RetryConfig,
    name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CloudError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay.min(config.max_delay);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    name,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> CloudError {
        CloudError::ApiError {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_next_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.next_delay(Duration::from_secs(4)), Duration::from_secs(8));
        assert_eq!(config.next_delay(Duration::from_secs(10)), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&RetryConfig::default(), "op", CloudError::is_transient, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            with_retry(&RetryConfig::default(), "op", CloudError::is_transient, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            with_retry(&RetryConfig::default(), "op", CloudError::is_transient, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CloudError::AuthenticationFailed("expired".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(CloudError::AuthenticationFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
