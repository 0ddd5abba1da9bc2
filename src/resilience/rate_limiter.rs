//! # Token Bucket Rate Limiter
//!
//! Capacity is `requests_per_window`; tokens refill continuously at
//! `requests_per_window / window` per second and are tracked fractionally, so a
//! bucket never loses partial refill between calls. Each client owns its own
//! bucket; the lock is held only for the arithmetic, never across a sleep.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// New limiter with a full bucket
    pub fn new(config: RateLimitConfig) -> Self {
        let tokens = f64::from(config.requests_per_window);
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.requests_per_window)
    }

    /// Tokens added per second
    fn refill_rate(&self) -> f64 {
        let window = self.config.window.as_secs_f64();
        if window <= 0.0 {
            return self.capacity();
        }
        self.capacity() / window
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_rate()).min(self.capacity());
            bucket.last_refill = now;
        }
    }

    /// Takes `n` tokens if available. Never blocks.
    ///
    /// Requests larger than `burst_limit` are always refused.
    pub fn acquire(&self, n: u32) -> bool {
        if n > self.config.burst_limit {
            debug!(
                requested = n,
                burst_limit = self.config.burst_limit,
                "Rate limiter refused request above burst limit"
            );
            return false;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Time until one token is available
    pub fn wait_time(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let rate = self.refill_rate();
        if rate <= 0.0 {
            return self.config.window;
        }
        Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
    }

    /// Sleeps the calling task until `n` tokens are taken.
    ///
    /// Returns `false` immediately if `n` can never be granted.
    pub async fn acquire_blocking(&self, n: u32) -> bool {
        if n > self.config.burst_limit || n > self.config.requests_per_window {
            return false;
        }
        loop {
            if self.acquire(n) {
                return true;
            }
            let wait = self.wait_time().max(Duration::from_millis(1));
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }
}
