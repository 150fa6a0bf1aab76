//! End-to-end produce scenarios against in-memory stores.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use gate_rs::capacity::{CapacityPolicy, CapacityStore, Owner};
use gate_rs::clock::{Clock, ManualClock};
use gate_rs::config::Config;
use gate_rs::error::GateError;
use gate_rs::pipeline::AdmissionPipeline;
use gate_rs::quota::QuotaCounter;
use gate_rs::ratelimit::{MemoryCounterStore, RateLimiter};
use gate_rs::store::memory::{MemoryBlobStore, MemoryMetadataStore};
use gate_rs::store::{BlobStore, ItemRow, MetadataStore};
use gate_rs::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory-backed metadata store with switchable failure injection.
struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    fail_insert: AtomicBool,
}

impl FlakyMetadataStore {
    fn new() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_insert: AtomicBool::new(false),
        }
    }

    fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<ItemRow>> {
        self.inner.list(owner_id).await
    }

    async fn insert(&self, row: ItemRow) -> Result<()> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(GateError::StoreUnavailable("injected insert failure".to_string()));
        }
        self.inner.insert(row).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn count(&self, owner_id: &str) -> Result<usize> {
        self.inner.count(owner_id).await
    }

    async fn max_sequence(&self) -> Result<u64> {
        self.inner.max_sequence().await
    }
}

struct Harness {
    pipeline: AdmissionPipeline,
    clock: Arc<ManualClock>,
    metadata: Arc<FlakyMetadataStore>,
    blobs: Arc<MemoryBlobStore>,
}

async fn harness(policy: CapacityPolicy, produce_max: u32, daily_limit: u32) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let metadata = Arc::new(FlakyMetadataStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());

    let capacity = CapacityStore::open(
        metadata.clone() as Arc<dyn MetadataStore>,
        blobs.clone() as Arc<dyn BlobStore>,
        clock.clone() as Arc<dyn Clock>,
        policy,
        Vec::new(),
    )
    .await
    .unwrap();

    let limiter = RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        clock.clone() as Arc<dyn Clock>,
    );

    let mut config = Config::default();
    config.limits.produce_max = produce_max;
    config.quota.default_daily_limit = daily_limit;

    let pipeline = AdmissionPipeline::new(
        Arc::new(limiter),
        Arc::new(QuotaCounter::new(30)),
        Arc::new(capacity),
        clock.clone() as Arc<dyn Clock>,
        config.limits,
        config.quota,
    );

    Harness {
        pipeline,
        clock,
        metadata,
        blobs,
    }
}

fn payload() -> Vec<u8> {
    b"generated".to_vec()
}

#[tokio::test]
async fn test_stored_count_never_exceeds_max_items() {
    let h = harness(CapacityPolicy::new(10), 1000, 1000).await;
    let owner = Owner::new("alice", "free");

    for _ in 0..30 {
        h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
        h.clock.advance(Duration::seconds(1));
        let count = h.metadata.count("alice").await.unwrap();
        assert!(count <= 10, "count {count} exceeded the cap");
    }

    assert_eq!(h.metadata.count("alice").await.unwrap(), 10);
}

#[tokio::test]
async fn test_full_owner_evicts_oldest_and_keeps_newest_ten() {
    let h = harness(CapacityPolicy::new(10), 1000, 1000).await;
    let owner = Owner::new("alice", "free");

    let mut ids = Vec::new();
    for _ in 0..10 {
        let outcome = h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
        ids.push(outcome.item.id);
        h.clock.advance(Duration::seconds(1));
    }

    let outcome = h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    assert_eq!(outcome.evicted, vec![ids[0].clone()]);

    let remaining = h.metadata.list("alice").await.unwrap();
    let remaining_ids: Vec<&str> = remaining.iter().map(|r| r.id.as_str()).collect();
    let mut expected: Vec<&str> = ids[1..].iter().map(String::as_str).collect();
    expected.push(outcome.item.id.as_str());
    assert_eq!(remaining_ids, expected);
    assert!(!h.blobs.contains(&format!("alice/{}", ids[0])).await);
}

#[tokio::test]
async fn test_sixth_call_in_window_is_rate_limited() {
    let h = harness(CapacityPolicy::new(10), 5, 1000).await;
    let owner = Owner::new("alice", "free");
    let first_call_at = h.clock.now();

    for _ in 0..5 {
        h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    }

    let err = h.pipeline.try_produce(&owner, "image", payload).await.unwrap_err();
    match err {
        GateError::RateLimited { reset_at } => {
            assert_eq!(reset_at, first_call_at + Duration::milliseconds(60_000));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // the rejected call reserved no quota
    let status = h.pipeline.quota_status(&owner, "image").await;
    assert_eq!(status.current, 5);
}

#[tokio::test]
async fn test_quota_counts_reset_across_midnight() {
    let h = harness(CapacityPolicy::new(100), 1000, 3).await;
    let owner = Owner::new("alice", "free");

    h.clock.set(Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 59).unwrap());
    for _ in 0..3 {
        h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    }
    let err = h.pipeline.try_produce(&owner, "image", payload).await.unwrap_err();
    assert!(matches!(err, GateError::QuotaExceeded { limit: 3, .. }));

    h.clock.set(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 1).unwrap());
    let status = h.pipeline.quota_status(&owner, "image").await;
    assert_eq!(status.current, 0);
    assert_eq!(status.remaining, 3);

    h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
}

#[tokio::test]
async fn test_capacity_failure_releases_the_quota_reservation() {
    let h = harness(CapacityPolicy::new(10), 1000, 50).await;
    let owner = Owner::new("alice", "free");

    h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    assert_eq!(h.pipeline.quota_status(&owner, "image").await.current, 1);

    h.metadata.set_fail_insert(true);
    let err = h.pipeline.try_produce(&owner, "image", payload).await.unwrap_err();
    assert!(matches!(err, GateError::StoreUnavailable(_)));

    // compensation: the count is back at its pre-reservation value
    assert_eq!(h.pipeline.quota_status(&owner, "image").await.current, 1);

    h.metadata.set_fail_insert(false);
    h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    assert_eq!(h.pipeline.quota_status(&owner, "image").await.current, 2);
}

#[tokio::test]
async fn test_unlimited_tier_never_evicts() {
    let h = harness(CapacityPolicy::new(10).with_tier("unlimited", -1), 1000, 1000).await;
    let owner = Owner::new("alice", "unlimited");

    for _ in 0..25 {
        let outcome = h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
        assert!(outcome.evicted.is_empty());
        h.clock.advance(Duration::seconds(1));
    }

    assert_eq!(h.metadata.count("alice").await.unwrap(), 25);
}

#[tokio::test]
async fn test_insert_failure_leaves_one_slot_of_slack_without_drifting() {
    let h = harness(CapacityPolicy::new(10), 1000, 1000).await;
    let owner = Owner::new("alice", "free");

    for _ in 0..10 {
        h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
        h.clock.advance(Duration::seconds(1));
    }
    assert_eq!(h.metadata.count("alice").await.unwrap(), 10);

    // eviction succeeds, then the insert fails: one below capacity
    h.metadata.set_fail_insert(true);
    h.pipeline.try_produce(&owner, "image", payload).await.unwrap_err();
    assert_eq!(h.metadata.count("alice").await.unwrap(), 9);

    // repeated failures do not evict again while under the cap
    for _ in 0..5 {
        h.pipeline.try_produce(&owner, "image", payload).await.unwrap_err();
        assert_eq!(h.metadata.count("alice").await.unwrap(), 9);
    }

    // the next successful produce fills the slot without evicting
    h.metadata.set_fail_insert(false);
    let outcome = h.pipeline.try_produce(&owner, "image", payload).await.unwrap();
    assert!(outcome.evicted.is_empty());
    assert_eq!(h.metadata.count("alice").await.unwrap(), 10);
}

#[tokio::test]
async fn test_concurrent_produces_for_one_owner_respect_the_cap() {
    let h = harness(CapacityPolicy::new(10), 1000, 1000).await;
    let pipeline = Arc::new(h.pipeline);
    let owner = Owner::new("alice", "free");

    for _ in 0..10 {
        pipeline.try_produce(&owner, "image", payload).await.unwrap();
        h.clock.advance(Duration::seconds(1));
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            pipeline.try_produce(&owner, "image", payload).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.metadata.count("alice").await.unwrap(), 10);
}
