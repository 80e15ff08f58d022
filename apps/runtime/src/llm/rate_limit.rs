// Request rate limiting
//
// Backed by governor's GCRA limiter: a full burst of `capacity` requests, then
// one more admitted every `period / capacity`. Admission is spread over time
// instead of resetting at interval boundaries.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter shared by every caller of one client
pub struct RateLimiter {
    capacity: NonZeroU32,
    period: Duration,
    inner: DirectRateLimiter,
}

impl RateLimiter {
    /// Limiter that starts full and readmits `capacity` requests per `period`
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = NonZeroU32::new(capacity).unwrap_or(NonZeroU32::MIN);
        let period = period.max(Duration::from_millis(1));
        let quota = Quota::with_period(period / capacity.get())
            .unwrap_or_else(|| Quota::per_second(capacity))
            .allow_burst(capacity);

        Self {
            capacity,
            period,
            inner: governor::RateLimiter::direct(quota),
        }
    }

    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    /// Requests readmitted per millisecond
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.capacity.get()) / (self.period.as_secs_f64() * 1000.0)
    }

    /// Wait until a request may go out
    pub async fn acquire(&self) {
        if self.inner.check().is_ok() {
            return;
        }
        debug!(capacity = self.capacity.get(), "rate limit reached, waiting");
        self.inner.until_ready().await;
    }

    /// Admit a request only if one is allowed right now
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("period", &self.period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_refill_rate_is_capacity_per_minute() {
        let limiter = RateLimiter::per_minute(60);
        assert_eq!(limiter.capacity(), 60);
        assert!((limiter.refill_rate() - 60.0 / 60_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_capacity_admits_one() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_burst_is_capped_at_capacity() {
        let limiter = RateLimiter::new(4, Duration::from_secs(4));
        for _ in 0..4 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_third_call_waits_for_refill() {
        // two requests per 600ms: one readmitted every 300ms
        let limiter = RateLimiter::new(2, Duration::from_millis(600));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(250), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(2), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_refill_is_spread_not_stepped() {
        // one readmitted every 200ms
        let limiter = RateLimiter::new(4, Duration::from_millis(800));
        for _ in 0..4 {
            assert!(limiter.try_acquire());
        }

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_overdraw() {
        // three immediately, then one every 100ms
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(300)));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(250), "elapsed {:?}", start.elapsed());
        assert!(!limiter.try_acquire());
    }
}
