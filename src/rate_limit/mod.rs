// Per-(user, platform) token bucket sized from the registry's rate limit.
//
// Extraction collaborators call check_and_consume before each platform API
// request so a burst of syncs cannot blow a provider's quota. State is
// in-memory only (resets on restart).

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::platforms::RateLimit;

/// Token bucket for a single (user, platform) key.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    /// Window of the limit this bucket was last consumed under; after one
    /// full window idle the bucket is back at capacity and can be evicted.
    window: Duration,
}

impl TokenBucket {
    fn new(limit: &RateLimit) -> Self {
        Self {
            tokens: limit.requests as f64,
            last_refill: Instant::now(),
            window: Duration::from_secs(limit.window_seconds.max(1)),
        }
    }

    /// Try to consume one token. Refills at capacity/window tokens per
    /// second, capped at capacity.
    fn try_consume(&mut self, limit: &RateLimit) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill_rate = limit.requests as f64 / limit.window_seconds.max(1) as f64;
        self.tokens = (self.tokens + elapsed * refill_rate).min(limit.requests as f64);
        self.last_refill = now;
        self.window = Duration::from_secs(limit.window_seconds.max(1));

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-(user, platform) rate limiter. Buckets are created lazily, full.
pub struct RateLimiter {
    buckets: DashMap<(String, String), TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Check and consume one token for `(user_id, platform)` under the
    /// platform's configured limit. Returns false when the bucket is empty.
    pub fn check_and_consume(&self, user_id: &str, platform: &str, limit: &RateLimit) -> bool {
        let mut bucket = self
            .buckets
            .entry((user_id.to_string(), platform.to_string()))
            .or_insert_with(|| TokenBucket::new(limit));
        bucket.try_consume(limit)
    }

    /// Drop buckets idle for at least one full window. Such a bucket has
    /// refilled to capacity, so recreating it later is equivalent.
    pub fn evict_idle(&self) {
        self.buckets
            .retain(|_, bucket| bucket.last_refill.elapsed() < bucket.window);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
