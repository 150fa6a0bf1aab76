//! Fixed-window rate limiting
//!
//! Counts requests per opaque key (route + caller identity) within a
//! fixed window. A window record is valid only while `now < reset_at`;
//! an expired record is treated as absent and recreated on next access.
//!
//! Store failures fail OPEN: the request is allowed and a warning
//! logged. Under-enforcement here costs at most minor abuse, while
//! denying every request on a store hiccup would take the whole service
//! down. The counter is also best-effort under true concurrency: an
//! off-by-one between two racing checks is accepted for this dimension.
//!
//! A periodic sweep removes records whose window passed plus a safety
//! margin, bounding memory independent of traffic. The sweep runs on
//! its own timer and touches only the counter store's lock, never the
//! owner-scoped capacity locks.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;

/// Expired records linger this long before the sweep removes them.
const SWEEP_MARGIN_SECS: i64 = 60;

/// One fixed window worth of counting for a key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRecord {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Key-value contract for window records.
///
/// A single-process map satisfies this for one instance; a shared store
/// satisfies it for a multi-instance deployment (with the best-effort
/// concurrency caveat above).
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>>;
    async fn put(&self, key: &str, record: WindowRecord) -> Result<()>;
    /// Remove records whose `reset_at` is before `cutoff`, returning how many.
    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-process counter store
pub struct MemoryCounterStore {
    records: RwLock<HashMap<String, WindowRecord>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<WindowRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, record: WindowRecord) -> Result<()> {
        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.reset_at >= cutoff);
        Ok(before - records.len())
    }
}

/// Fixed-window request limiter
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request against `key` and decide whether it may proceed.
    ///
    /// First hit of a window (or of an expired window) creates a fresh
    /// record with `count = 1`; later hits increment and are allowed
    /// while `count <= max`.
    pub async fn check(&self, key: &str, window_ms: u64, max: u32) -> RateLimitDecision {
        let now = self.clock.now();
        let window = Duration::milliseconds(window_ms as i64);

        let existing = match self.store.get(key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("rate-limit store read failed for {}: {} (allowing)", key, e);
                return Self::fail_open(now, window, max);
            }
        };

        let record = match existing {
            Some(mut record) if now < record.reset_at => {
                record.count = record.count.saturating_add(1);
                record
            }
            _ => WindowRecord {
                count: 1,
                reset_at: now + window,
            },
        };

        let count = record.count;
        let reset_at = record.reset_at;
        let allowed = count <= max;
        let remaining = max.saturating_sub(count);

        if let Err(e) = self.store.put(key, record).await {
            warn!("rate-limit store write failed for {}: {} (allowing)", key, e);
            return Self::fail_open(now, window, max);
        }

        if !allowed {
            warn!(
                "rate limit exceeded for {}: {}/{} until {}",
                key, count, max, reset_at
            );
        }

        RateLimitDecision {
            allowed,
            remaining,
            reset_at,
        }
    }

    // Availability over enforcement: report the decision a fresh window
    // would have produced.
    fn fail_open(now: DateTime<Utc>, window: Duration, max: u32) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: max.saturating_sub(1),
            reset_at: now + window,
        }
    }

    /// Drop records whose window passed more than the safety margin ago.
    pub async fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - Duration::seconds(SWEEP_MARGIN_SECS);
        match self.store.remove_expired(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    debug!("rate-limit sweep removed {} expired window(s)", removed);
                }
                removed
            }
            Err(e) => {
                warn!("rate-limit sweep failed: {}", e);
                0
            }
        }
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_sweeper(self: Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::GateError;
    use chrono::TimeZone;

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn limiter_with_clock(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()), clock)
    }

    #[tokio::test]
    async fn test_window_counts_down_remaining() {
        let clock = manual_clock();
        let start = clock.now();
        let limiter = limiter_with_clock(Arc::clone(&clock));

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.check("produce:alice", 60_000, 5).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check("produce:alice", 60_000, 5).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, start + Duration::milliseconds(60_000));
    }

    #[tokio::test]
    async fn test_expired_window_is_recreated() {
        let clock = manual_clock();
        let limiter = limiter_with_clock(Arc::clone(&clock));

        for _ in 0..5 {
            limiter.check("produce:alice", 60_000, 5).await;
        }
        assert!(!limiter.check("produce:alice", 60_000, 5).await.allowed);

        clock.advance(Duration::milliseconds(60_001));

        let decision = limiter.check("produce:alice", 60_000, 5).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let clock = manual_clock();
        let limiter = limiter_with_clock(clock);

        for _ in 0..5 {
            limiter.check("produce:alice", 60_000, 5).await;
        }
        assert!(!limiter.check("produce:alice", 60_000, 5).await.allowed);
        assert!(limiter.check("produce:bob", 60_000, 5).await.allowed);
        assert!(limiter.check("status:alice", 60_000, 5).await.allowed);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_records() {
        let clock = manual_clock();
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone() as Arc<dyn CounterStore>, Arc::clone(&clock) as Arc<dyn Clock>);

        limiter.check("produce:alice", 60_000, 5).await;
        limiter.check("produce:bob", 3_600_000, 5).await;
        assert_eq!(store.len().await, 2);

        // inside the safety margin nothing is removed
        clock.advance(Duration::milliseconds(60_001));
        assert_eq!(limiter.sweep().await, 0);

        clock.advance(Duration::seconds(SWEEP_MARGIN_SECS));
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(store.len().await, 1);
    }

    struct FailingCounterStore;

    #[async_trait]
    impl CounterStore for FailingCounterStore {
        async fn get(&self, _key: &str) -> Result<Option<WindowRecord>> {
            Err(GateError::StoreUnavailable("injected".to_string()))
        }

        async fn put(&self, _key: &str, _record: WindowRecord) -> Result<()> {
            Err(GateError::StoreUnavailable("injected".to_string()))
        }

        async fn remove_expired(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
            Err(GateError::StoreUnavailable("injected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let clock = manual_clock();
        let limiter = RateLimiter::new(Arc::new(FailingCounterStore), clock);

        // every call is allowed even though nothing can be counted
        for _ in 0..20 {
            let decision = limiter.check("produce:alice", 60_000, 5).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 4);
        }

        // the sweep swallows the failure too
        assert_eq!(limiter.sweep().await, 0);
    }
}
