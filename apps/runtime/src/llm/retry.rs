use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::ApiResult;
use super::rate_limit::RateLimiter;

/// Fraction of the exponential delay added as random jitter, at most
const MAX_JITTER: f64 = 0.2;

/// Exponential backoff with bounded jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt` plus up to
    /// 20% jitter, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0.0..=MAX_JITTER);
        self.delay_with_jitter(attempt, jitter)
    }

    fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponential_ms = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.min(30) as i32);
        let with_jitter_ms = (exponential_ms * (1.0 + jitter)).round();
        let capped_ms = with_jitter_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out.
    ///
    /// Every attempt, retries included, first takes a token from `limiter`.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, mut operation: F) -> ApiResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 0;
        loop {
            limiter.acquire().await;
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(attempts = attempt + 1, error = %e, "retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::errors::ApiClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_millis(30_000))
    }

    fn http(status: u16) -> ApiClientError {
        ApiClientError::Http {
            status,
            code: format!("http_{}", status),
            message: String::new(),
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_millis(2000));
        assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_millis(4000));
        assert_eq!(policy.delay_with_jitter(1, 0.2), Duration::from_millis(2400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_with_jitter(10, 0.0), Duration::from_millis(30_000));
        assert_eq!(policy.delay_with_jitter(40, 0.2), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let policy = policy();
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let limiter = RateLimiter::per_minute(600);
        let calls = AtomicU32::new(0);

        let result = policy()
            .run(&limiter, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(http(503))
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
    async fn test_terminal_error_is_not_retried() {
        let limiter = RateLimiter::per_minute(600);
        let calls = AtomicU32::new(0);

        let result: ApiResult<()> = policy()
            .run(&limiter, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(http(400)) }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_surfaces_after_exhaustion() {
        let limiter = RateLimiter::per_minute(600);
        let calls = AtomicU32::new(0);

        let result: ApiResult<()> = policy()
            .run(&limiter, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(http(500))
                    } else {
                        Err(http(429))
                    }
                }
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(error.status(), Some(429));
        assert!(error.is_retryable());
    }
}
