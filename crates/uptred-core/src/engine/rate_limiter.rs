//! Token bucket bandwidth limiter for outgoing request bytes
//!
//! Shared by every fetch of an engine, so concurrent uploads split the
//! configured bytes-per-second budget between them.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Largest amount taken from the bucket in one step
const MAX_STEP: u64 = 16 * 1024;

/// Global rate limiter using a token bucket
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    /// Bytes per second; `None` means unlimited
    rate: Option<u64>,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(bytes_per_second: u64) -> Self {
        let mut state = BucketState::unlimited();
        state.apply_limit(Some(bytes_per_second));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            state: Arc::new(Mutex::new(BucketState::unlimited())),
        }
    }

    /// Build from an optional limit, where `None` and `0` mean unlimited
    pub fn from_limit(limit: Option<u64>) -> Self {
        match limit {
            Some(limit) if limit > 0 => Self::new(limit),
            _ => Self::unlimited(),
        }
    }

    pub async fn set_limit(&self, bytes_per_second: Option<u64>) {
        self.state.lock().await.apply_limit(bytes_per_second);
    }

    pub async fn is_unlimited(&self) -> bool {
        self.state.lock().await.rate.is_none()
    }

    /// Wait until `bytes` may be sent.
    pub async fn acquire(&self, bytes: u64) {
        let mut remaining = bytes;
        while remaining > 0 {
            let step = remaining.min(MAX_STEP);
            if !self.acquire_step(step).await {
                return;
            }
            remaining -= step;
        }
    }

    /// Returns false when the limiter is unlimited.
    async fn acquire_step(&self, step: u64) -> bool {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let Some(rate) = state.rate else {
                    return false;
                };
                state.refill(rate);

                if state.tokens >= step as f64 {
                    state.tokens -= step as f64;
                    return true;
                }

                let needed = step as f64 - state.tokens;
                // short waits keep other fetches responsive
                Duration::from_secs_f64((needed / rate as f64).min(0.05))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl BucketState {
    fn unlimited() -> Self {
        Self {
            rate: None,
            tokens: 0.0,
            last_refill: Instant::now(),
        }
    }

    fn apply_limit(&mut self, limit: Option<u64>) {
        match limit.filter(|l| *l > 0) {
            Some(rate) => {
                // the bucket holds at least one step so large slices can pass
                let capacity = rate.max(MAX_STEP) as f64;
                self.tokens = if self.rate.is_none() { capacity } else { self.tokens.min(capacity) };
                self.rate = Some(rate);
            }
            None => self.rate = None,
        }
        self.last_refill = Instant::now();
    }

    fn refill(&mut self, rate: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.001 {
            let capacity = rate.max(MAX_STEP) as f64;
            self.tokens = (self.tokens + elapsed * rate as f64).min(capacity);
            self.last_refill = now;
        }
    }
}
