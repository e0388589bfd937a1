//! Per-adapter token bucket.
//!
//! Backed by `governor`'s GCRA limiter, which is equivalent to a token bucket
//! of `capacity` tokens refilled at `refill_per_second`. Refill is computed
//! from the clock at acquisition time and the bucket state is updated with a
//! compare-and-swap, so concurrent acquirers never over-draw.

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::ConfigError;
use crate::sources::SourceError;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What `acquire` does when the bucket is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    /// Wait for the next token if it arrives within the timeout
    #[default]
    Wait,
    /// Never wait; an empty bucket is an immediate `RateLimited`
    FailFast,
}

/// Token bucket guarding one adapter
pub struct RateLimiter {
    name: String,
    capacity: NonZeroU32,
    refill_per_second: f64,
    mode: AcquireMode,
    limiter: DirectRateLimiter,
    clock: DefaultClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("refill_per_second", &self.refill_per_second)
            .field("mode", &self.mode)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(
        name: &str,
        capacity: u32,
        refill_per_second: f64,
        mode: AcquireMode,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRateLimit {
            source_name: name.to_string(),
            reason: reason.to_string(),
        };

        let capacity =
            NonZeroU32::new(capacity).ok_or_else(|| invalid("capacity must be at least 1"))?;
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(invalid("refill_per_second must be a positive number"));
        }

        let period = Duration::try_from_secs_f64(1.0 / refill_per_second)
            .map_err(|_| invalid("refill_per_second is too small"))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| invalid("refill_per_second is too large"))?
            .allow_burst(capacity);

        Ok(Self {
            name: name.to_string(),
            capacity,
            refill_per_second,
            mode,
            limiter: DirectRateLimiter::direct(quota),
            clock: DefaultClock::default(),
        })
    }

    /// Effectively unthrottled limiter, for adapters without configured limits
    pub fn unlimited(name: &str) -> Self {
        let quota = Quota::per_second(nonzero!(1_000_000u32));
        Self {
            name: name.to_string(),
            capacity: nonzero!(1_000_000u32),
            refill_per_second: 1_000_000.0,
            mode: AcquireMode::FailFast,
            limiter: DirectRateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    /// Take one token, waiting at most `timeout`.
    ///
    /// Fails with `RateLimited` without waiting when the next token is further
    /// away than the allowed wait; the error carries that wait as retry-after.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), SourceError> {
        let budget = match self.mode {
            AcquireMode::Wait => timeout,
            AcquireMode::FailFast => Duration::ZERO,
        };

        let wait = match self.limiter.check() {
            Ok(()) => return Ok(()),
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        };

        if wait > budget {
            tracing::debug!(
                "[rate-limit] {}: bucket empty, next token in {:?} (budget {:?})",
                self.name,
                wait,
                budget
            );
            return Err(SourceError::rate_limited(&self.name, Some(wait)));
        }

        match tokio::time::timeout(budget, self.limiter.until_ready()).await {
            Ok(()) => Ok(()),
            // Another acquirer took the token we were waiting for
            Err(_) => Err(SourceError::rate_limited(&self.name, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceErrorKind;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_fail_fast_rejects_second_call() {
        let limiter = RateLimiter::new("pubchem", 1, 1.0, AcquireMode::FailFast).unwrap();

        assert!(limiter.acquire(Duration::from_secs(5)).await.is_ok());

        let err = limiter.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::RateLimited);
        assert_eq!(err.adapter, "pubchem");
        let hint = err.retry_after.expect("retry-after hint");
        assert!(hint > Duration::from_millis(800) && hint <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_mode_blocks_until_refill() {
        let limiter = RateLimiter::new("crossref", 1, 1.0, AcquireMode::Wait).unwrap();

        limiter.acquire(Duration::from_secs(2)).await.unwrap();

        let started = Instant::now();
        limiter.acquire(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_wait_longer_than_timeout_fails_immediately() {
        let limiter = RateLimiter::new("openalex", 1, 1.0, AcquireMode::Wait).unwrap();
        limiter.acquire(Duration::ZERO).await.unwrap();

        let started = Instant::now();
        let err = limiter
            .acquire(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::RateLimited);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_do_not_overdraw() {
        let limiter = Arc::new(
            RateLimiter::new("semantic_scholar", 3, 0.001, AcquireMode::FailFast).unwrap(),
        );

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire(Duration::ZERO).await.is_ok() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        assert!(RateLimiter::new("x", 0, 1.0, AcquireMode::Wait).is_err());
        assert!(RateLimiter::new("x", 1, 0.0, AcquireMode::Wait).is_err());
        assert!(RateLimiter::new("x", 1, f64::NAN, AcquireMode::Wait).is_err());
    }

    #[test]
    fn test_vanishing_refill_rate_is_rejected() {
        let err = RateLimiter::new("x", 1, 1e-30, AcquireMode::Wait).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRateLimit { ref source_name, .. } if source_name == "x"));
        assert!(RateLimiter::new("x", 1, f64::MIN_POSITIVE, AcquireMode::FailFast).is_err());
    }
}
