use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_RATE: f64 = 2.0;
const DEFAULT_CAPACITY: f64 = 5.0;

/// Token-bucket gate every outbound request passes. Tokens are fractional
/// and refill continuously.
pub struct RateLimiter {
    capacity: f64,
    inner: Mutex<Bucket>,
}

struct Bucket {
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Bucket {
                rate,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self, n: f64, blocking: bool) -> bool {
        loop {
            let wait = {
                let mut bucket = self.inner.lock().await;
                bucket.refill(self.capacity);
                if bucket.tokens >= n {
                    bucket.tokens -= n;
                    return true;
                }
                if !blocking {
                    return false;
                }
                (n - bucket.tokens) / bucket.rate
            };
            // Sleep outside the lock so other callers can refill/observe.
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    pub async fn set_rate(&self, rate: f64) {
        let mut bucket = self.inner.lock().await;
        // The elapsed interval must be credited at the old rate first.
        bucket.refill(self.capacity);
        bucket.rate = rate;
    }

    pub async fn available(&self) -> f64 {
        let mut bucket = self.inner.lock().await;
        bucket.refill(self.capacity);
        bucket.tokens
    }
}

static GLOBAL: OnceLock<RateLimiter> = OnceLock::new();

/// Idempotent: the first caller wins; everyone else observes that instance.
pub fn init_global(rate: f64, capacity: f64) -> &'static RateLimiter {
    GLOBAL.get_or_init(|| RateLimiter::new(rate, capacity))
}

pub fn global() -> &'static RateLimiter {
    GLOBAL.get_or_init(|| RateLimiter::new(DEFAULT_RATE, DEFAULT_CAPACITY))
}
