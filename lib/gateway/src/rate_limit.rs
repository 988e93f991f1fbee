//! Per-provider token-bucket admission control.
//!
//! Each provider gets two independent buckets: request count and
//! estimated tokens. An acquire debits both or neither, under a single
//! per-provider lock, so concurrent dispatches can never observe a
//! negative balance or a lost debit.
//!
//! Time is passed explicitly through the `*_at` methods; the public
//! wrappers use `Instant::now()`.

use brightpath_provider::{ProviderDescriptor, ProviderId, RateLimits};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// Both buckets had capacity and were debited.
    Granted,
    /// Insufficient capacity; retrying after the wait may succeed.
    WaitUntil(Duration),
}

impl AcquireResult {
    /// Returns true if the acquire was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// A continuously refilling token bucket.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    available: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            available: capacity,
            refill_per_sec: f64::from(refill_per_minute) / 60.0,
            last_refill: now,
        }
    }

    fn refill_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Wait until `amount` would be available, assuming no competing
    /// debits. Rounded up a millisecond so a re-acquire after the wait
    /// does not land short on float arithmetic.
    fn wait_for(&self, amount: f64) -> Duration {
        let shortfall = amount - self.available;
        if shortfall <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(shortfall / self.refill_per_sec) + Duration::from_millis(1)
    }
}

/// The two admission buckets for one provider.
#[derive(Debug)]
struct ProviderBuckets {
    limits: RateLimits,
    requests: TokenBucket,
    tokens: TokenBucket,
}

impl ProviderBuckets {
    fn new(limits: RateLimits, now: Instant) -> Self {
        Self {
            limits,
            requests: TokenBucket::new(limits.requests_per_minute, limits.requests_per_minute, now),
            tokens: TokenBucket::new(limits.tokens_per_minute, limits.tokens_per_minute, now),
        }
    }
}

/// Per-provider rate limiter.
///
/// Bucket state is keyed by provider ID and survives catalog reloads;
/// when a reload changes a provider's limits the buckets are rebuilt on
/// the next acquire.
pub struct RateLimiter {
    state: RwLock<HashMap<ProviderId, Arc<Mutex<ProviderBuckets>>>>,
}

impl RateLimiter {
    /// Creates an empty rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Attempts to admit one request with the given token estimate.
    pub fn try_acquire(
        &self,
        descriptor: &ProviderDescriptor,
        estimated_tokens: u32,
    ) -> AcquireResult {
        self.try_acquire_at(descriptor, estimated_tokens, Instant::now())
    }

    /// Attempts admission at an explicit instant.
    ///
    /// A request whose token estimate exceeds the bucket capacity can
    /// never be granted; the returned wait reflects that and the caller's
    /// latency budget is expected to reject it.
    pub fn try_acquire_at(
        &self,
        descriptor: &ProviderDescriptor,
        estimated_tokens: u32,
        now: Instant,
    ) -> AcquireResult {
        let bucket = self.bucket_for(descriptor, now);
        let mut guard = bucket.lock().expect("rate bucket lock poisoned");

        // A reload may have changed this provider's limits.
        if guard.limits != descriptor.limits {
            *guard = ProviderBuckets::new(descriptor.limits, now);
        }

        guard.requests.refill_at(now);
        guard.tokens.refill_at(now);

        let needed = f64::from(estimated_tokens.max(1));
        if guard.requests.available >= 1.0 && guard.tokens.available >= needed {
            guard.requests.available -= 1.0;
            guard.tokens.available -= needed;
            AcquireResult::Granted
        } else {
            let wait = guard.requests.wait_for(1.0).max(guard.tokens.wait_for(needed));
            AcquireResult::WaitUntil(wait)
        }
    }

    fn bucket_for(&self, descriptor: &ProviderDescriptor, now: Instant) -> Arc<Mutex<ProviderBuckets>> {
        if let Some(bucket) = self
            .state
            .read()
            .expect("rate limiter lock poisoned")
            .get(&descriptor.id)
        {
            return Arc::clone(bucket);
        }

        let mut state = self.state.write().expect("rate limiter lock poisoned");
        Arc::clone(
            state
                .entry(descriptor.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ProviderBuckets::new(descriptor.limits, now)))),
        )
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brightpath_provider::WireShape;

    fn descriptor(id: &str, requests_per_minute: u32, tokens_per_minute: u32) -> ProviderDescriptor {
        ProviderDescriptor::new(
            id,
            "test-model",
            WireShape::OpenAiChat,
            "https://example.test",
            "TEST_KEY",
        )
        .with_limits(RateLimits {
            requests_per_minute,
            tokens_per_minute,
        })
    }

    #[test]
    fn exhausts_request_capacity_then_refills() {
        let limiter = RateLimiter::new();
        let d = descriptor("p", 2, 1_000_000);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(&d, 10, now).is_granted());
        assert!(limiter.try_acquire_at(&d, 10, now).is_granted());

        // Capacity 2: the third immediate acquire must wait.
        let AcquireResult::WaitUntil(wait) = limiter.try_acquire_at(&d, 10, now) else {
            panic!("expected WaitUntil");
        };
        // Refill rate is 2/min, so roughly 30s for one request token.
        assert!(wait > Duration::from_secs(29) && wait < Duration::from_secs(31));

        // After the advertised wait, one further acquire succeeds.
        assert!(limiter.try_acquire_at(&d, 10, now + wait).is_granted());
    }

    #[test]
    fn token_bucket_gates_large_requests() {
        let limiter = RateLimiter::new();
        let d = descriptor("p", 100, 1000);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(&d, 600, now).is_granted());
        // 400 tokens left; a second 600-token request must wait even
        // though request capacity remains.
        assert!(!limiter.try_acquire_at(&d, 600, now).is_granted());
    }

    #[test]
    fn failed_acquire_debits_neither_bucket() {
        let limiter = RateLimiter::new();
        let d = descriptor("p", 1, 1000);
        let now = Instant::now();

        // Token shortfall: request bucket must not be debited.
        assert!(!limiter.try_acquire_at(&d, 5000, now).is_granted());
        // The single request token is still available.
        assert!(limiter.try_acquire_at(&d, 10, now).is_granted());
    }

    #[test]
    fn available_never_exceeds_capacity() {
        let limiter = RateLimiter::new();
        let d = descriptor("p", 2, 1_000_000);
        let now = Instant::now();

        // A long idle period refills to capacity, not beyond.
        let later = now + Duration::from_secs(3600);
        assert!(limiter.try_acquire_at(&d, 10, later).is_granted());
        assert!(limiter.try_acquire_at(&d, 10, later).is_granted());
        assert!(!limiter.try_acquire_at(&d, 10, later).is_granted());
    }

    #[test]
    fn providers_are_isolated() {
        let limiter = RateLimiter::new();
        let a = descriptor("a", 1, 1_000_000);
        let b = descriptor("b", 1, 1_000_000);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(&a, 10, now).is_granted());
        assert!(!limiter.try_acquire_at(&a, 10, now).is_granted());
        assert!(limiter.try_acquire_at(&b, 10, now).is_granted());
    }

    #[test]
    fn reloaded_limits_rebuild_buckets() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        let old = descriptor("p", 1, 1_000_000);
        assert!(limiter.try_acquire_at(&old, 10, now).is_granted());
        assert!(!limiter.try_acquire_at(&old, 10, now).is_granted());

        let new = descriptor("p", 10, 1_000_000);
        assert!(limiter.try_acquire_at(&new, 10, now).is_granted());
    }

    #[test]
    fn concurrent_acquires_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new());
        let d = Arc::new(descriptor("p", 16, 1_000_000));
        let now = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let d = Arc::clone(&d);
            handles.push(std::thread::spawn(move || {
                let mut granted = 0u32;
                for _ in 0..10 {
                    if limiter.try_acquire_at(&d, 10, now).is_granted() {
                        granted += 1;
                    }
                }
                granted
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 16);
    }
}
