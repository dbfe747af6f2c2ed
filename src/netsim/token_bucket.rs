//! Token bucket rate limiter
//!
//! Tokens are bits. The bucket is replenished from elapsed clock time at
//! `max_kbps * 1000` bits per second and capped at `max_bucket_size * 1000`
//! bits. A negative limit means unlimited.

use crate::netsim::clock::NANOS_PER_SECOND;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current token count in bits
    bucket_size: u64,
    /// Clock time up to which tokens have been handed out
    prev_time: Option<u64>,
    max_kbps: i32,
    max_bucket_size: i32,
}

impl TokenBucket {
    /// Create a bucket; a limited bucket starts full
    pub fn new(max_kbps: i32, max_bucket_size: i32) -> Self {
        let mut bucket = Self {
            bucket_size: 0,
            prev_time: None,
            max_kbps,
            max_bucket_size,
        };
        bucket.refill();
        bucket
    }

    pub fn set_max_kbps(&mut self, max_kbps: i32) {
        self.max_kbps = max_kbps;
    }

    /// Change the capacity. A limited capacity also refills the bucket.
    pub fn set_max_bucket_size(&mut self, max_bucket_size: i32) {
        self.max_bucket_size = max_bucket_size;
        self.refill();
    }

    /// Fill to capacity and forget the replenish timestamp
    pub fn reset(&mut self) {
        self.prev_time = None;
        self.refill();
    }

    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    pub fn capacity_bits(&self) -> Option<u64> {
        (self.max_bucket_size >= 0).then(|| self.max_bucket_size as u64 * 1000)
    }

    pub fn rate_bits_per_sec(&self) -> Option<u64> {
        (self.max_kbps >= 0).then(|| self.max_kbps as u64 * 1000)
    }

    fn refill(&mut self) {
        if let Some(capacity) = self.capacity_bits() {
            self.bucket_size = capacity;
        }
    }

    /// Number of tokens to add to the bucket at clock time `now`.
    ///
    /// With an unlimited rate this tops the bucket off to capacity. Otherwise
    /// only whole tokens are handed out and `prev_time` advances by exactly
    /// their cost, so fractional time carries over to the next call.
    pub fn tokens_available(&mut self, now: Option<u64>) -> i64 {
        let Some(rate) = self.rate_bits_per_sec() else {
            let capacity = self.capacity_bits().unwrap_or(0);
            return capacity as i64 - self.bucket_size as i64;
        };

        let Some(now) = now else {
            tracing::warn!("No clock, can't get the time");
            return 0;
        };

        let elapsed = match self.prev_time {
            None => {
                self.prev_time = Some(now);
                0
            }
            Some(prev) if now < prev => {
                tracing::warn!(now, prev, "Clock is going backwards");
                0
            }
            Some(prev) => now - prev,
        };

        if rate == 0 {
            return 0;
        }

        let tokens = (u128::from(elapsed) * u128::from(rate) / u128::from(NANOS_PER_SECOND)) as u64;
        let token_time = (u128::from(tokens) * u128::from(NANOS_PER_SECOND) / u128::from(rate)) as u64;

        if let Some(prev) = self.prev_time.as_mut() {
            *prev += token_time;
        }

        tokens as i64
    }

    /// Admission check for a buffer of `size_bits` at clock time `now`.
    ///
    /// A rejected buffer takes no tokens.
    pub fn admit(&mut self, size_bits: u64, now: Option<u64>) -> bool {
        let Some(capacity) = self.capacity_bits() else {
            return true;
        };

        let tokens = self.tokens_available(now);
        self.bucket_size = (self.bucket_size as i64)
            .saturating_add(tokens)
            .clamp(0, capacity as i64) as u64;
        tracing::trace!(
            tokens,
            bucket_size = self.bucket_size,
            "Adding tokens to bucket"
        );

        if size_bits > self.bucket_size {
            tracing::debug!(
                size_bits,
                bucket_size = self.bucket_size,
                "Buffer size exceeds bucket size"
            );
            return false;
        }

        self.bucket_size -= size_bits;
        tracing::trace!(
            size_bits,
            bucket_size = self.bucket_size,
            "Buffer taking tokens"
        );
        true
    }
}
