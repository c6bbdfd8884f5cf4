//! Per-source token-bucket rate limiting with reactive backoff.
//!
//! One shared limiter instance serves every source so per-source state stays
//! centrally discoverable, but each source owns its own bucket and lock:
//! a noisy source never starves another's throughput. The limiter is passed
//! explicitly into connectors and the engine, never held as a global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use funding_core::config::RateLimitConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Token bucket state for one source.
#[derive(Debug)]
struct BucketState {
    capacity_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    backoff_until: Option<Instant>,
}

impl BucketState {
    fn new(capacity_per_sec: f64) -> Self {
        Self {
            capacity_per_sec,
            tokens: capacity_per_sec,
            last_refill: Instant::now(),
            backoff_until: None,
        }
    }

    /// Adds `elapsed * capacity` tokens, capped at capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity_per_sec).min(self.capacity_per_sec);
        self.last_refill = now;
    }
}

/// Read-only snapshot of one source's limiter state.
#[derive(Debug, Clone)]
pub struct SourceLimiterStatus {
    pub tokens: f64,
    pub capacity_per_sec: f64,
    pub in_backoff: bool,
    pub backoff_remaining: Duration,
}

/// Shared rate limiter with one token bucket per source.
pub struct SourceRateLimiter {
    default_rate: f64,
    overrides: HashMap<String, f64>,
    throttle_backoff: Duration,
    buckets: RwLock<HashMap<String, Arc<Mutex<BucketState>>>>,
}

impl SourceRateLimiter {
    /// Creates a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            default_rate: config.default_requests_per_sec,
            overrides: config.per_source.clone(),
            throttle_backoff: Duration::from_secs(config.throttle_backoff_secs),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a limiter with a uniform rate for every source.
    #[must_use]
    pub fn with_rate(requests_per_sec: f64) -> Self {
        Self::new(&RateLimitConfig {
            default_requests_per_sec: requests_per_sec,
            ..RateLimitConfig::default()
        })
    }

    async fn bucket(&self, source: &str) -> Arc<Mutex<BucketState>> {
        if let Some(bucket) = self.buckets.read().await.get(source) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;
        let rate = self
            .overrides
            .get(source)
            .copied()
            .unwrap_or(self.default_rate);
        buckets
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(rate))))
            .clone()
    }

    /// Acquires one token for `source`, blocking until it is available.
    ///
    /// Returns the total time spent waiting.
    pub async fn acquire(&self, source: &str) -> Duration {
        self.acquire_cost(source, 1.0).await
    }

    /// Acquires `cost` tokens for `source`, blocking until available.
    ///
    /// Waits out any server-signaled backoff first, then refills the bucket
    /// and sleeps for the token deficit if there is one. The per-source lock
    /// is held across the sleep, so concurrent callers for the same source
    /// queue behind each other while other sources proceed untouched.
    ///
    /// Returns the total time the caller was blocked, queueing included.
    pub async fn acquire_cost(&self, source: &str, cost: f64) -> Duration {
        let started = Instant::now();
        let bucket = self.bucket(source).await;
        let mut state = bucket.lock().await;

        while let Some(until) = state.backoff_until {
            let now = Instant::now();
            if until <= now {
                state.backoff_until = None;
                break;
            }
            tokio::time::sleep(until - now).await;
        }

        state.refill();
        if state.tokens < cost {
            let deficit = cost - state.tokens;
            let wait = Duration::from_secs_f64(deficit / state.capacity_per_sec);
            tokio::time::sleep(wait).await;
            state.tokens = 0.0;
            state.last_refill = Instant::now();
        } else {
            state.tokens -= cost;
        }

        started.elapsed()
    }

    /// Records a rate-limit signal from the source (HTTP 429 or equivalent).
    ///
    /// Empties the bucket and blocks further acquires until `retry_after`
    /// (or the configured default backoff) has elapsed.
    pub async fn report_throttled(&self, source: &str, retry_after: Option<Duration>) {
        let backoff = retry_after.unwrap_or(self.throttle_backoff);
        let bucket = self.bucket(source).await;
        let mut state = bucket.lock().await;
        state.tokens = 0.0;
        state.backoff_until = Some(Instant::now() + backoff);
        tracing::warn!(
            "Source {} throttled, backing off for {:?}",
            source,
            backoff
        );
    }

    /// Restores full tokens and clears any backoff for `source`.
    pub async fn reset(&self, source: &str) {
        let bucket = self.bucket(source).await;
        let mut state = bucket.lock().await;
        state.tokens = state.capacity_per_sec;
        state.last_refill = Instant::now();
        state.backoff_until = None;
    }

    /// Snapshot of every known source's bucket, for introspection.
    pub async fn status(&self) -> HashMap<String, SourceLimiterStatus> {
        let buckets = self.buckets.read().await;
        let mut out = HashMap::with_capacity(buckets.len());
        let now = Instant::now();

        for (source, bucket) in buckets.iter() {
            let state = bucket.lock().await;
            let backoff_remaining = state
                .backoff_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);
            out.insert(
                source.clone(),
                SourceLimiterStatus {
                    tokens: state.tokens,
                    capacity_per_sec: state.capacity_per_sec,
                    in_backoff: backoff_remaining > Duration::ZERO,
                    backoff_remaining,
                },
            );
        }

        out
    }
}
