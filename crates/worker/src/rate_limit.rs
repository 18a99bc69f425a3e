//! Token bucket limiting job dispatch across the worker pool
//!
//! An empty bucket delays dispatch until tokens refill; jobs are never
//! dropped. The bucket is shared by every consumer, so the ceiling applies
//! to the pool as a whole.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared dispatch rate limiter (`count` jobs per `window`)
pub struct DispatchLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl DispatchLimiter {
    pub fn new(count: u32, window: Duration) -> Self {
        let capacity = count as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(f64::EPSILON),
        }
    }

    /// Take one token if available
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                // Time until one full token accrues.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Remaining tokens (for diagnostics)
    pub fn remaining(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();

        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}
