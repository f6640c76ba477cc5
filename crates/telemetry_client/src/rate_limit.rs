//! Read quota for the telemetry API.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const DEFAULT_READS_PER_SEC: u32 = 20;

/// Shared token bucket for outbound reads. Clones share the bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    read_limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_READS_PER_SEC)
    }

    /// Create with a custom per-second limit. Zero falls back to the default.
    pub fn with_limit(reads_per_sec: u32) -> Self {
        let per_sec = NonZeroU32::new(reads_per_sec)
            .or_else(|| NonZeroU32::new(DEFAULT_READS_PER_SEC))
            .unwrap_or(NonZeroU32::MIN);

        Self {
            read_limiter: Arc::new(GovLimiter::direct(Quota::per_second(per_sec))),
        }
    }

    /// Wait until a read slot is available.
    pub async fn wait_read(&self) {
        self.read_limiter.until_ready().await;
    }

    /// Try to acquire a read slot without waiting. Returns true if acquired.
    pub fn try_read(&self) -> bool {
        self.read_limiter.check().is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
