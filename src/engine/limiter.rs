//! Token-bucket rate limiting for outbound provider calls

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket shared across every provider call site of a process.
///
/// Tokens refill continuously at `per_second` up to `bucket_size`. Acquiring
/// waits, polling every `check_interval`, until a whole token is available.
pub struct RateLimiter {
    per_second: f64,
    bucket_size: f64,
    check_interval: Duration,
    inner: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    pub fn new(per_second: f64, bucket_size: f64, check_interval: Duration) -> Self {
        Self {
            per_second,
            bucket_size,
            check_interval,
            inner: Mutex::new(Bucket {
                tokens: bucket_size,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Limits tuned for the hosted search and model APIs the packaged flows
    /// call: 4 requests per second, bursts of 10, checked every 100ms
    pub fn default_shared() -> Arc<Self> {
        Arc::new(Self::new(4.0, 10.0, Duration::from_millis(100)))
    }

    /// Take one token, waiting for refill when the bucket is empty
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }
            tokio::time::sleep(self.check_interval).await;
        }
    }

    /// Take one token only if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.bucket_size);
        bucket.refilled_at = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
