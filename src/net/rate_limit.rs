//! Token bucket rate limiting for flood protection

use super::types::RATE_ENTRY_EXPIRY_SECS;
use crate::types::ClientId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Consume `tokens` if available. Zero or negative requests
    /// succeed without touching any state.
    pub fn try_consume(&mut self, tokens: f64) -> bool {
        if tokens <= 0.0 {
            return true;
        }
        self.refill();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Refill and return the current token count without consuming.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Seconds until `tokens` would be available, zero if they already
    /// are.
    pub fn time_until_available(&mut self, tokens: f64) -> f64 {
        self.refill();
        if self.tokens >= tokens {
            return 0.0;
        }
        (tokens - self.tokens) / self.refill_rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

#[derive(Debug)]
struct RateEntry {
    bucket: TokenBucket,
    violations: u64,
    last_violation: Option<Instant>,
    total_requests: u64,
}

impl RateEntry {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            bucket: TokenBucket::new(capacity, refill_rate),
            violations: 0,
            last_violation: None,
            total_requests: 0,
        }
    }
}

/// Rate-limit status for one client.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub tokens_available: f64,
    pub capacity: f64,
    pub refill_rate_per_second: f64,
    pub violations: u64,
    pub total_requests: u64,
    pub time_until_next_token: f64,
}

/// Aggregate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub active_clients: usize,
    pub total_violations: u64,
    pub total_requests: u64,
    pub rate_per_minute: u32,
    pub burst_allowance: u32,
}

struct LimiterInner {
    entries: HashMap<ClientId, RateEntry>,
    last_cleanup: Instant,
}

/// Per-client message admission. Buckets are created on first access
/// with capacity `rate + burst` and refill at `rate / 60` tokens per
/// second; stale entries are swept lazily.
pub struct MessageRateLimiter {
    rate_per_minute: u32,
    burst_allowance: u32,
    cleanup_interval: Duration,
    inner: Mutex<LimiterInner>,
}

impl MessageRateLimiter {
    pub fn new(rate_per_minute: u32, burst_allowance: u32) -> Self {
        Self::with_cleanup_interval(rate_per_minute, burst_allowance, Duration::from_secs(300))
    }

    pub fn with_cleanup_interval(
        rate_per_minute: u32,
        burst_allowance: u32,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            rate_per_minute,
            burst_allowance,
            cleanup_interval,
            inner: Mutex::new(LimiterInner {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn capacity(&self) -> f64 {
        (self.rate_per_minute + self.burst_allowance) as f64
    }

    fn refill_rate(&self) -> f64 {
        self.rate_per_minute as f64 / 60.0
    }

    /// Try to spend `tokens` for `client`. A refusal is recorded as a
    /// violation; zero-token checks always pass (broadcast policy:
    /// consult but never consume).
    pub async fn check(&self, client: ClientId, tokens: f64) -> bool {
        let mut inner = self.inner.lock().await;
        self.maybe_cleanup(&mut inner);

        let capacity = self.capacity();
        let refill_rate = self.refill_rate();
        let entry = inner
            .entries
            .entry(client)
            .or_insert_with(|| RateEntry::new(capacity, refill_rate));

        if entry.bucket.try_consume(tokens) {
            entry.total_requests += 1;
            true
        } else {
            entry.violations += 1;
            entry.last_violation = Some(Instant::now());
            false
        }
    }

    /// Current status for `client`, if it has a bucket.
    pub async fn status(&self, client: ClientId) -> Option<RateLimitStatus> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&client)?;
        Some(RateLimitStatus {
            tokens_available: entry.bucket.available(),
            capacity: entry.bucket.capacity(),
            refill_rate_per_second: entry.bucket.refill_rate,
            violations: entry.violations,
            total_requests: entry.total_requests,
            time_until_next_token: entry.bucket.time_until_available(1.0),
        })
    }

    /// Refill `client`'s bucket to capacity and clear its violations.
    pub async fn reset(&self, client: ClientId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&client) {
            Some(entry) => {
                entry.bucket = TokenBucket::new(self.capacity(), self.refill_rate());
                entry.violations = 0;
                entry.last_violation = None;
                true
            }
            None => false,
        }
    }

    /// Drop entries that show no recent activity: bucket ≥ 90% full
    /// with no recorded violation, or last violation older than an
    /// hour.
    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        Self::sweep(&mut inner);
        inner.last_cleanup = Instant::now();
    }

    fn maybe_cleanup(&self, inner: &mut LimiterInner) {
        if inner.last_cleanup.elapsed() < self.cleanup_interval {
            return;
        }
        Self::sweep(inner);
        inner.last_cleanup = Instant::now();
    }

    fn sweep(inner: &mut LimiterInner) {
        let expiry = Duration::from_secs(RATE_ENTRY_EXPIRY_SECS);
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| {
            let idle =
                entry.violations == 0 && entry.bucket.available() >= entry.bucket.capacity() * 0.9;
            let expired = entry.last_violation.is_some_and(|at| at.elapsed() > expiry);
            !(idle || expired)
        });
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!("rate limiter swept {} stale entries", removed);
        }
    }

    pub async fn statistics(&self) -> RateLimiterStats {
        let inner = self.inner.lock().await;
        RateLimiterStats {
            active_clients: inner.entries.len(),
            total_violations: inner.entries.values().map(|e| e.violations).sum(),
            total_requests: inner.entries.values().map(|e| e.total_requests).sum(),
            rate_per_minute: self.rate_per_minute,
            burst_allowance: self.burst_allowance,
        }
    }
}
