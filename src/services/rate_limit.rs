//! Per-host quota on CA requests
//!
//! Every host gets its own governor cell in a keyed limiter so a host stuck
//! in a renewal loop cannot exhaust the CA quota of the others.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc};
use tracing::debug;

/// Number of tracked hosts above which idle entries are pruned
const MAX_TRACKED_HOSTS: usize = 10000;

/// Thread-safe per-host limiter of new certificate requests
#[derive(Clone)]
pub struct RequestRateLimiter {
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

impl RequestRateLimiter {
    /// Allow `requests_per_hour` CA requests per host; 0 disables limiting
    pub fn new(requests_per_hour: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(requests_per_hour)
                .map(|n| Arc::new(RateLimiter::keyed(Quota::per_hour(n)))),
        }
    }

    /// A limiter that never refuses
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Consume one request for `host`. Returns false once the quota is used up.
    pub fn check(&self, host: &str) -> bool {
        match self.limiter {
            Some(ref limiter) => limiter.check_key(&host.to_string()).is_ok(),
            None => true,
        }
    }

    /// Number of hosts with limiter state
    pub fn tracked_hosts(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.len())
    }

    /// Forget hosts whose quota is fully replenished once too many are tracked.
    ///
    /// Hosts that made requests within the quota period keep their state.
    pub fn cleanup(&self) {
        let Some(ref limiter) = self.limiter else {
            return;
        };
        let initial_count = limiter.len();
        if initial_count > MAX_TRACKED_HOSTS {
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!(
                "Rate limiter cleanup: {} -> {} entries",
                initial_count,
                limiter.len()
            );
        }
    }
}
