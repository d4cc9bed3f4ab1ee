//! Per-user generation throttle
//!
//! Generation jobs are expensive (a model load or a multi-minute subprocess),
//! so each account gets a token bucket of `generations_per_minute` requests.
//! State is in-memory and resets on restart.

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use uuid::Uuid;

/// Keyed token bucket limiting generation requests per user
pub struct GenerationThrottle {
    /// `None` disables throttling (limit of 0)
    limiter: Option<RateLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>>,
    clock: DefaultClock,
}

impl GenerationThrottle {
    /// Allow `per_minute` requests per user per minute; 0 disables the throttle
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(per_minute)
                .map(|n| RateLimiter::keyed(Quota::per_minute(n))),
            clock: DefaultClock::default(),
        }
    }

    /// Throttle that never limits
    pub fn disabled() -> Self {
        Self::per_minute(0)
    }

    /// Take one request slot for `user_id`
    ///
    /// Returns the wait until a slot frees up when the user is over quota.
    pub fn check(&self, user_id: Uuid) -> Result<(), Duration> {
        match &self.limiter {
            None => Ok(()),
            Some(limiter) => limiter
                .check_key(&user_id)
                .map_err(|not_until| not_until.wait_time_from(self.clock.now())),
        }
    }

    /// Drop bookkeeping for users whose buckets are full again
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_per_user() {
        let throttle = GenerationThrottle::per_minute(2);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(throttle.check(alice).is_ok());
        assert!(throttle.check(alice).is_ok());
        let wait = throttle.check(alice).unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(60));

        assert!(throttle.check(bob).is_ok());
    }

    #[test]
    fn test_zero_disables() {
        let throttle = GenerationThrottle::disabled();
        let user = Uuid::new_v4();
        for _ in 0..100 {
            assert!(throttle.check(user).is_ok());
        }
    }
}
