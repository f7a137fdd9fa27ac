//! Keyed token-bucket rate limiting for chat.
//!
//! Buckets key on the authenticated user id, falling back to the client
//! IP for anonymous traffic. State is in-memory and advisory — it resets
//! on restart.

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

use mnema_core::{defaults, Error, Result};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-user/IP chat rate limiter.
pub struct ChatRateLimiter {
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl ChatRateLimiter {
    /// Limiter allowing `per_minute` requests with an equal burst.
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).expect("max(1) is nonzero");
        let quota = Quota::per_minute(per_minute).allow_burst(per_minute);
        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Limiter using `RATE_LIMIT_REQUESTS_PER_MINUTE` (default 30).
    pub fn from_env() -> Self {
        let per_minute = std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::RATE_LIMIT_REQUESTS_PER_MINUTE);
        Self::new(per_minute)
    }

    /// Check one request for `key`. Over-limit returns `RateLimited` with
    /// the seconds until the next slot.
    pub fn check(&self, key: &str) -> Result<()> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after_secs = not_until
                    .wait_time_from(self.clock.now())
                    .as_secs()
                    .max(1);
                debug!(
                    subsystem = "api",
                    component = "rate_limit",
                    key = %key,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                Err(Error::RateLimited { retry_after_secs })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_burst() {
        let limiter = ChatRateLimiter::new(30);
        for i in 0..30 {
            assert!(limiter.check("user-a").is_ok(), "request {} rejected", i);
        }
    }

    #[test]
    fn test_rejects_request_31_with_retry_after() {
        let limiter = ChatRateLimiter::new(30);
        for _ in 0..30 {
            limiter.check("user-a").unwrap();
        }
        match limiter.check("user-a") {
            Err(Error::RateLimited { retry_after_secs }) => assert!(retry_after_secs >= 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = ChatRateLimiter::new(1);
        assert!(limiter.check("user-a").is_ok());
        assert!(limiter.check("user-b").is_ok());
        assert!(limiter.check("user-a").is_err());
    }
}
