use dashmap::DashMap;
use std::time::Instant;

/// Outcome of a rate-limit check, carried into response headers.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until at least one token is available again. 0 when allowed.
    pub retry_after_secs: u64,
}

/// One token bucket. Capacity and refill rate both equal the tenant's
/// `rate_limit_rps`; refill is continuous, not tick-based.
struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rps: u32) -> Self {
        Self {
            tokens: rps as f64,
            capacity: rps as f64,
            rate: rps as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Per-tenant admission control. Buckets are process-local, rebuilt lazily on
/// first request after startup or after a tenant's rate changes. The dashmap
/// shard lock serialises access per bucket; there is no global lock.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: std::sync::Arc<DashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for the tenant if available.
    pub fn allow(&self, tenant_id: &str, rps: u32) -> RateLimitInfo {
        let mut entry = self
            .buckets
            .entry(tenant_id.to_string())
            .or_insert_with(|| Bucket::new(rps));
        let bucket = entry.value_mut();

        // Tenant config changed since the bucket was built
        if bucket.capacity != rps as f64 {
            *bucket = Bucket::new(rps);
        }

        if bucket.rate <= 0.0 {
            return RateLimitInfo {
                allowed: false,
                limit: rps,
                remaining: 0,
                retry_after_secs: 1,
            };
        }

        bucket.refill(Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitInfo {
                allowed: true,
                limit: rps,
                remaining: bucket.tokens as u32,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateLimitInfo {
                allowed: false,
                limit: rps,
                remaining: 0,
                retry_after_secs: (deficit / bucket.rate).ceil().max(1.0) as u64,
            }
        }
    }
}
