//! Per-principal rate limiting (GCRA via the governor crate).
//!
//! In-process only: counters reset with the runtime. A rejected message is
//! silently dropped by the webhook - no reply, no error.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

pub struct PrincipalRateLimiter {
    limiter: KeyedLimiter,
}

impl PrincipalRateLimiter {
    /// Allow `max` events per `window` per principal, with the full window
    /// available as burst.
    pub fn new(max: u32, window: Duration) -> Self {
        let max = NonZeroU32::new(max.max(1)).unwrap();
        let per_cell = window / max.get();
        let quota = Quota::with_period(per_cell)
            .unwrap_or_else(|| Quota::per_minute(max))
            .allow_burst(max);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn accepted(&self, principal: &str) -> bool {
        self.limiter.check_key(&principal.to_string()).is_ok()
    }
}
