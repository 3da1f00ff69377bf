use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared request budget for an upstream API.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<DirectRateLimiter>,
}

impl Throttle {
    /// Allow `limit` requests per `window`, with bursts up to `limit`.
    pub fn per_window(window: Duration, limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(window, limit))),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::per_window(Duration::from_secs(60), limit)
    }

    /// Wait until a request slot is available.
    pub async fn ready(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle").finish_non_exhaustive()
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PENDING: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn burst_is_bounded_by_limit() {
        let throttle = Throttle::per_window(Duration::from_secs(60), 2);

        throttle.ready().await;
        throttle.ready().await;
        assert!(tokio::time::timeout(PENDING, throttle.ready()).await.is_err());
    }

    #[tokio::test]
    async fn zero_limit_still_admits_one_request() {
        let throttle = Throttle::per_minute(0);
        assert!(tokio::time::timeout(PENDING, throttle.ready()).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_one_budget() {
        let throttle = Throttle::per_minute(1);
        let clone = throttle.clone();

        throttle.ready().await;
        assert!(tokio::time::timeout(PENDING, clone.ready()).await.is_err());
    }
}
