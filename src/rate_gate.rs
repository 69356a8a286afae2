//! Per-source adaptive rate limiter: a token bucket with burst capacity and
//! backoff-driven retry, plus a short-TTL cache of the last successful
//! payload that lets a throttled caller avoid sleeping entirely.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::metrics::MetricsRegistry;

const REFILL_INTERVAL_MS: f64 = 60_000.0;
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct BucketState {
    limit_per_minute: f64,
    burst_capacity: f64,
    tokens: f64,
    last_refill: Instant,
    retry_backoff_ms: u64,
}

impl BucketState {
    fn new(limit_per_minute: f64, burst_capacity: f64, retry_backoff_ms: u64) -> Self {
        BucketState {
            limit_per_minute,
            burst_capacity,
            tokens: burst_capacity,
            last_refill: Instant::now(),
            retry_backoff_ms,
        }
    }

    /// Lazily refill based on elapsed wall-clock time, bounded by `burst_capacity`.
    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        let tokens_to_add = (elapsed_ms / REFILL_INTERVAL_MS * self.limit_per_minute).floor();
        if tokens_to_add > 0.0 {
            self.tokens = (self.tokens + tokens_to_add).min(self.burst_capacity);
            self.last_refill = now;
        }
    }
}

#[derive(Debug, Clone)]
struct CachedPayload {
    fetched_at: Instant,
    value: Value,
}

/// Outcome of a single `acquire` call.
#[derive(Debug)]
pub enum Admission {
    /// A token was available (or refilled in time); proceed with the request.
    Ok,
    /// No token was available and no fresh cache existed; the caller slept
    /// `wait_hint` and should retry the acquire itself.
    Throttled { wait_hint: Duration },
    /// No token was available, but a cached payload is fresh enough to reuse
    /// instead of making a new request.
    UseCached(Value),
}

pub struct RateGate {
    buckets: DashMap<String, Arc<Mutex<BucketState>>>,
    cache: DashMap<String, CachedPayload>,
    metrics: MetricsRegistry,
}

impl RateGate {
    pub fn new(metrics: MetricsRegistry) -> Self {
        RateGate {
            buckets: DashMap::new(),
            cache: DashMap::new(),
            metrics,
        }
    }

    pub fn configure_source(
        &self,
        source: &str,
        limit_per_minute: f64,
        burst_capacity: f64,
        retry_backoff_ms: u64,
    ) {
        self.buckets.insert(
            source.to_string(),
            Arc::new(Mutex::new(BucketState::new(
                limit_per_minute,
                burst_capacity,
                retry_backoff_ms,
            ))),
        );
        self.metrics.set_quota(source, limit_per_minute);
    }

    fn bucket_for(&self, source: &str) -> Arc<Mutex<BucketState>> {
        self.buckets
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(30.0, 30.0, 1000))))
            .clone()
    }

    /// Remember a successfully fetched payload for `source`, short-TTL.
    pub fn remember_payload(&self, source: &str, value: Value) {
        self.cache.insert(
            source.to_string(),
            CachedPayload {
                fetched_at: Instant::now(),
                value,
            },
        );
    }

    fn fresh_cached(&self, source: &str) -> Option<Value> {
        self.cache.get(source).and_then(|entry| {
            if entry.fetched_at.elapsed() < CACHE_TTL {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Attempt to admit one request against `source`'s bucket. Blocks up to
    /// `retry_backoff_ms` if throttled and no cache is available; the outer
    /// extractor decides whether to call again.
    pub async fn acquire(&self, source: &str) -> Admission {
        let bucket = self.bucket_for(source);
        let mut guard = bucket.lock().await;
        guard.refill(Instant::now());

        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            self.metrics.set_tokens_remaining(source, guard.tokens);
            trace!(source, tokens = guard.tokens, "rate gate admitted request");
            return Admission::Ok;
        }

        self.metrics.throttle_event(source);

        if let Some(cached) = self.fresh_cached(source) {
            debug!(source, "rate gate serving cached payload instead of sleeping");
            return Admission::UseCached(cached);
        }

        let backoff = Duration::from_millis(guard.retry_backoff_ms);
        drop(guard);

        let start = Instant::now();
        tokio::time::sleep(backoff).await;
        self.metrics
            .observe_retry_latency(source, start.elapsed().as_secs_f64());

        // One retry of the refill check, per the contract; the caller may
        // invoke `acquire` again if this still reports Throttled.
        let mut guard = bucket.lock().await;
        guard.refill(Instant::now());
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            self.metrics.set_tokens_remaining(source, guard.tokens);
            Admission::Ok
        } else {
            Admission::Throttled { wait_hint: backoff }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_capacity_admits_immediately_then_throttles() {
        let gate = RateGate::new(MetricsRegistry);
        gate.configure_source("C", 3.0, 3.0, 5);

        for _ in 0..3 {
            assert!(matches!(gate.acquire("C").await, Admission::Ok));
        }

        // Fourth immediate acquire has no tokens, no cache, and a tiny
        // backoff so the test stays fast; it should not re-admit within 5ms.
        let outcome = gate.acquire("C").await;
        assert!(matches!(outcome, Admission::Throttled { .. }));
    }

    #[tokio::test]
    async fn cached_payload_avoids_sleep_when_throttled() {
        let gate = RateGate::new(MetricsRegistry);
        gate.configure_source("C", 1.0, 1.0, 60_000);
        assert!(matches!(gate.acquire("C").await, Admission::Ok));
        gate.remember_payload("C", serde_json::json!({"cached": true}));

        let outcome = gate.acquire("C").await;
        match outcome {
            Admission::UseCached(value) => assert_eq!(value["cached"], true),
            other => panic!("expected cached payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tokens_never_exceed_burst_capacity() {
        let gate = RateGate::new(MetricsRegistry);
        gate.configure_source("A", 30.0, 5.0, 1000);
        // Force a long elapsed time by constructing the bucket directly
        // would require internal access; instead verify via repeated acquire
        // that we never see more than burst_capacity consumed before refill.
        for _ in 0..5 {
            assert!(matches!(gate.acquire("A").await, Admission::Ok));
        }
        assert!(matches!(gate.acquire("A").await, Admission::Throttled { .. } | Admission::UseCached(_)));
    }
}
