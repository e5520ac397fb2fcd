//! Backoff for transient provider failures
//!
//! Only rate limits, 5xx responses and dropped connections are retried.
//! Everything else is a caller or configuration problem and surfaces at once.

use crate::error::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first call
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each further one
    pub base_delay: Duration,
    /// Upper bound for any single wait, including server-provided hints
    pub max_delay: Duration,
    /// Spread each wait by ±25%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Exponential wait for the given retry (0 = first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let wait = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            wait.mul_f64(rand::thread_rng().gen_range(0.75..1.25))
        } else {
            wait
        }
    }

    /// How long to wait before retrying `err`, or `None` to give up
    fn wait_for(&self, err: &ProviderError, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries || !err.is_transient() {
            return None;
        }
        match err {
            ProviderError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms).min(self.max_delay)),
            _ => Some(self.backoff(retry)),
        }
    }
}

/// Run a provider call, retrying transient failures per `config`
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(wait) = config.wait_for(&err, retry) else {
            if err.is_transient() {
                warn!(
                    operation = operation_name,
                    attempts = retry + 1,
                    error = %err,
                    "Giving up after retries"
                );
            } else {
                debug!(operation = operation_name, error = %err, "Not retrying");
            }
            return Err(err);
        };

        warn!(
            operation = operation_name,
            attempt = retry + 1,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "Provider call failed, retrying"
        );
        sleep(wait).await;
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(5), Duration::from_secs(30));
        assert_eq!(config.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..20 {
            let wait = config.backoff(1);
            assert!(wait >= Duration::from_millis(1500) && wait <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let config = quick(3);
        let hinted = ProviderError::RateLimited {
            retry_after_ms: Some(60_000),
        };
        assert_eq!(config.wait_for(&hinted, 0), Some(Duration::from_millis(5)));

        let bare = ProviderError::RateLimited { retry_after_ms: None };
        assert_eq!(config.wait_for(&bare, 1), Some(Duration::from_millis(2)));
        assert_eq!(config.wait_for(&bare, 3), None);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&quick(3), "test", || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(ProviderError::Network("connection reset".into())),
                1 => Err(ProviderError::ServerError("502".into())),
                n => Ok(n),
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&quick(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited { retry_after_ms: Some(1) })
        })
        .await;

        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_request_errors_fail_immediately() {
        for err in [
            ProviderError::Authentication("bad key".into()),
            ProviderError::ContextLengthExceeded("too long".into()),
            ProviderError::InvalidResponse("no choices".into()),
        ] {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let result: Result<(), _> = with_retry(&quick(3), "test", move || {
                let err = err.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(err)
                }
            })
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
