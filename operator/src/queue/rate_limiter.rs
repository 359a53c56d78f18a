//! Delay policies for requeueing failed items.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use backoff::{ExponentialBackoff, backoff::Backoff};
use tokio::time::Instant;

pub trait RateLimiter<T>: Send + Sync {
    /// Delay before `item` may be processed again. Counts as a failure of `item`.
    fn when(&self, item: &T) -> Duration;

    /// Resets the failure history of `item`.
    fn forget(&self, item: &T);

    /// Consecutive failures recorded for `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ItemBackoff {
    failures: u32,
    backoff: ExponentialBackoff,
}

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<T> {
    base: Duration,
    max: Duration,
    items: Mutex<HashMap<T, ItemBackoff>>,
}

impl<T> ItemExponentialFailureRateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            items: Mutex::new(HashMap::new()),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base,
            max_interval: self.max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

impl<T> RateLimiter<T> for ItemExponentialFailureRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync,
{
    fn when(&self, item: &T) -> Duration {
        let mut items = lock(&self.items);
        let entry = items.entry(item.clone()).or_insert_with(|| ItemBackoff {
            failures: 0,
            backoff: self.backoff(),
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.backoff.next_backoff().unwrap_or(self.max).min(self.max)
    }

    fn forget(&self, item: &T) {
        lock(&self.items).remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.items).get(item).map_or(0, |entry| entry.failures)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by every item: `qps` refill rate, `burst` capacity.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: f64::from(burst),
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;

        // Reserve a token even if that takes the bucket negative; the deficit is the wait.
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Longest delay of all wrapped limiters.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);
pub const DEFAULT_QPS: f64 = 10.0;
pub const DEFAULT_BURST: u32 = 100;

/// Per-item exponential backoff combined with an overall token bucket.
pub fn default_controller_rate_limiter<T>(base: Duration, max: Duration) -> MaxOfRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(DEFAULT_QPS, DEFAULT_BURST)),
    ])
}
