// src/limiter.rs

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// A token bucket for rate limiting, shared by every worker.
///
/// Tokens are bytes. A rate of 0 disables limiting.
#[derive(Clone, Debug)]
pub struct SpeedLimiter {
    state: Arc<Mutex<TokenBucket>>,
}

#[derive(Debug)]
struct TokenBucket {
    /// Burst size. Equal to one second's worth of tokens.
    capacity: u64,
    tokens: u64,
    /// Tokens added per second.
    rate: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn with_rate(rate: u64) -> Self {
        let capacity = capacity_for(rate);
        Self {
            capacity,
            tokens: capacity,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        if self.rate == 0 {
            self.tokens = self.capacity;
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * self.rate as f64) as u64;

        if tokens_to_add > 0 {
            self.tokens = self.tokens.saturating_add(tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

fn capacity_for(rate: u64) -> u64 {
    if rate == 0 {
        u64::MAX
    } else {
        rate
    }
}

impl SpeedLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TokenBucket::with_rate(rate_bytes_per_sec))),
        }
    }

    /// Changes the rate. Transfers already waiting pick it up on their next round.
    ///
    /// Tokens earned so far carry over, capped at the new capacity; a rate
    /// change never hands out a fresh burst.
    pub async fn set_rate(&self, rate_bytes_per_sec: u64) {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        bucket.rate = rate_bytes_per_sec;
        bucket.capacity = capacity_for(rate_bytes_per_sec);
        bucket.tokens = bucket.tokens.min(bucket.capacity);
    }

    pub async fn rate(&self) -> u64 {
        self.state.lock().await.rate
    }

    /// Waits until `amount` bytes may pass.
    ///
    /// Amounts above the bucket capacity are admitted one capacity-sized slice
    /// at a time.
    pub async fn take(&self, amount: u64) {
        let mut remaining = amount;
        while remaining > 0 {
            let wait = {
                let mut bucket = self.state.lock().await;
                bucket.refill();
                if bucket.rate == 0 {
                    return;
                }

                let slice = remaining.min(bucket.capacity);
                if bucket.tokens >= slice {
                    bucket.tokens -= slice;
                    remaining -= slice;
                    continue;
                }

                let tokens_needed = slice - bucket.tokens;
                Duration::from_secs_f64(tokens_needed as f64 / bucket.rate as f64)
            };

            // Lock is released before sleeping.
            tokio::time::sleep(wait).await;
        }
    }
}
