//! Retry policy with credential rotation and exponential backoff.
//!
//! The coordinator wraps an attempt closure rather than a fixed request, so
//! callers can put arbitrary work inside one attempt. A streaming request,
//! for example, includes both sending and draining the stream; a truncation
//! discovered mid-drain then retries the whole send.
//!
//! Classification drives the policy:
//! - auth and rate-limit failures rotate the credential pool, then back off
//! - transient failures (network, timeout, 5xx, truncated stream) back off
//!   with the same credential
//! - everything else returns immediately

use std::sync::Arc;
use std::time::Duration;

use codeforge_core::credential::CredentialPool;
use codeforge_core::error::ProviderError;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Drives retries around provider attempts.
#[derive(Clone)]
pub struct RetryCoordinator {
    pool: Arc<CredentialPool>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryCoordinator {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Run `f` until it succeeds, a non-retryable error surfaces, or the
    /// attempt budget is spent.
    ///
    /// The delay before attempt n+1 doubles each time, starting from the
    /// base delay and capped at the maximum.
    pub async fn call<F, Fut, T>(&self, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                tokio::time::sleep(delay).await;
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if e.is_credential_failure() {
                        let index = self.pool.rotate();
                        warn!(
                            attempt = attempt + 1,
                            credential_index = index,
                            error = %e,
                            "Provider attempt failed, rotated credential"
                        );
                    } else {
                        warn!(attempt = attempt + 1, error = %e, "Provider attempt failed");
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(ProviderError::AttemptsExhausted {
            attempts: self.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }

    /// Delay before the given (1-based) retry attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn pool(keys: &[&str]) -> Arc<CredentialPool> {
        Arc::new(CredentialPool::new(keys.iter().map(|k| k.to_string()).collect()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_rotate_and_back_off_until_success() {
        let pool = pool(&["k0", "k1", "k2"]);
        let retry = RetryCoordinator::new(pool.clone());
        let calls = Mutex::new(0u32);

        let start = Instant::now();
        let result = retry
            .call(|| {
                let attempt = {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    *guard
                };
                async move {
                    if attempt <= 2 {
                        Err(ProviderError::RateLimited)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(*calls.lock().unwrap(), 3);
        // Rotated once per rate-limit failure.
        assert_eq!(pool.current_index(), 2);
        // 500ms before attempt 2, 1000ms before attempt 3.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn two_credentials_alternate_across_repeated_auth_failures() {
        let pool = pool(&["k0", "k1"]);
        let retry = RetryCoordinator::new(pool.clone());
        let calls = Mutex::new(0u32);

        let result = retry
            .call(|| {
                let attempt = {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    *guard
                };
                async move {
                    if attempt <= 3 {
                        Err(ProviderError::AuthenticationFailed("expired".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(*calls.lock().unwrap(), 4);
        // Three rotations over a two-entry pool: 0 -> 1 -> 0 -> 1.
        assert_eq!(pool.current_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let retry = RetryCoordinator::new(pool(&["k0"]));
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = retry
            .call(|| {
                *calls.lock().unwrap() += 1;
                async {
                    Err(ProviderError::ApiError {
                        status_code: 400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ProviderError::ApiError { status_code: 400, .. }
        ));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count_and_last_error() {
        let retry = RetryCoordinator::new(pool(&["k0"])).with_max_attempts(3);
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = retry
            .call(|| {
                *calls.lock().unwrap() += 1;
                async { Err(ProviderError::Network("connection reset".into())) }
            })
            .await;

        match result.unwrap_err() {
            ProviderError::AttemptsExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("connection reset"));
            }
            other => panic!("Expected AttemptsExhausted, got {other}"),
        }
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_keep_the_same_credential() {
        let pool = pool(&["k0", "k1"]);
        let retry = RetryCoordinator::new(pool.clone());
        let calls = Mutex::new(0u32);

        let result = retry
            .call(|| {
                let attempt = {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    *guard
                };
                async move {
                    if attempt == 1 {
                        Err(ProviderError::StreamInterrupted("truncated".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(pool.current_index(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryCoordinator::new(pool(&["k0"]));
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(retry.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(retry.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(retry.backoff_delay(10), Duration::from_secs(30));
    }
}
