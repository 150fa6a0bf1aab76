use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::{CapacityPolicy, UNLIMITED_ITEMS};
use super::Owner;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::{BlobStore, ItemRow, MetadataStore};

/// Read-only capacity snapshot for an owner
#[derive(Debug, Clone, serde::Serialize)]
pub struct CapacityStats {
    pub count: usize,
    pub max_items: i64,
    pub remaining: i64,
    pub can_insert_more: bool,
}

#[derive(Debug, Clone)]
pub struct EvictionOutcome {
    pub item_id: String,
    pub blob_deleted: bool,
    pub metadata_deleted: bool,
}

/// Aggregated result of one eviction pass. Per-item failures are
/// recorded here instead of aborting the pass.
#[derive(Debug, Default)]
pub struct EvictionReport {
    /// Items whose metadata row is gone (the owner's visible count dropped)
    pub deleted: usize,
    pub outcomes: Vec<EvictionOutcome>,
    pub errors: Vec<String>,
}

impl EvictionReport {
    /// Ids of items that actually left the owner's visible set
    pub fn evicted_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.metadata_deleted)
            .map(|o| o.item_id.clone())
            .collect()
    }
}

/// Bounded per-owner item store spanning metadata and blob storage.
///
/// The metadata row is the source of truth for an owner's visible
/// count: an item only counts as evicted once its row is gone, and a
/// blob that outlives its row is queued for reconciliation rather than
/// failing the operation.
pub struct CapacityStore {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    policy: CapacityPolicy,
    sequence: AtomicU64,
    orphans: RwLock<Vec<String>>,
    legacy_prefixes: Vec<String>,
}

impl CapacityStore {
    /// Open the store, seeding the sequence counter from the highest
    /// sequence number already persisted.
    pub async fn open(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        policy: CapacityPolicy,
        legacy_prefixes: Vec<String>,
    ) -> Result<Self> {
        let seed = metadata.max_sequence().await?;
        Ok(Self {
            metadata,
            blobs,
            clock,
            policy,
            sequence: AtomicU64::new(seed),
            orphans: RwLock::new(Vec::new()),
            legacy_prefixes,
        })
    }

    /// Items that must be evicted before one more insert keeps the
    /// owner at or under the tier limit.
    ///
    /// Returns the oldest `count - max + 1` items when `count >= max`,
    /// so that after eviction plus the pending insert the owner lands
    /// exactly at `max`. Empty when under the limit or unconstrained.
    pub async fn prepare_insert(&self, owner: &Owner) -> Result<Vec<ItemRow>> {
        if self.policy.is_unlimited(&owner.tier) {
            return Ok(Vec::new());
        }
        let max = self.policy.max_items(&owner.tier);

        let items = self.metadata.list(&owner.id).await?;
        let count = items.len() as i64;
        if count < max {
            return Ok(Vec::new());
        }

        let surplus = (count - max + 1) as usize;
        Ok(items.into_iter().take(surplus).collect())
    }

    /// Best-effort two-phase delete: blob first, metadata second.
    ///
    /// Never fails as a whole; each item's outcome is recorded
    /// independently so the caller can re-check the count and decide.
    pub async fn evict(&self, items: &[ItemRow]) -> EvictionReport {
        let mut report = EvictionReport::default();

        for item in items {
            let blob_deleted = match self.delete_blob(item).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "blob delete failed for item {}: {} (queued for reconciliation)",
                        item.id, e
                    );
                    report.errors.push(format!("blob {}: {}", item.id, e));
                    self.orphans.write().await.extend(self.retry_refs(item));
                    false
                }
            };

            match self.metadata.delete(&item.id).await {
                Ok(_) => {
                    report.deleted += 1;
                    report.outcomes.push(EvictionOutcome {
                        item_id: item.id.clone(),
                        blob_deleted,
                        metadata_deleted: true,
                    });
                }
                Err(e) => {
                    // the row survived, so the item is still visible and NOT evicted
                    warn!("metadata delete failed for item {}: {}", item.id, e);
                    report.errors.push(format!("metadata {}: {}", item.id, e));
                    report.outcomes.push(EvictionOutcome {
                        item_id: item.id.clone(),
                        blob_deleted,
                        metadata_deleted: false,
                    });
                }
            }
        }

        if report.deleted > 0 {
            info!("evicted {} item(s)", report.deleted);
        }
        report
    }

    async fn delete_blob(&self, item: &ItemRow) -> Result<()> {
        if !item.blob_ref.is_empty() {
            // recorded mapping; a missing blob still counts as deleted
            self.blobs.delete(&item.blob_ref).await?;
            return Ok(());
        }

        // rows predating the recorded mapping: probe the configured
        // legacy locations until one delete hits
        for prefix in &self.legacy_prefixes {
            let candidate = format!("{}/{}", prefix, item.id);
            if self.blobs.delete(&candidate).await? {
                debug!("deleted legacy blob {}", candidate);
                return Ok(());
            }
        }

        // found nowhere: already gone
        Ok(())
    }

    // Locations worth retrying when a delete fails now. Legacy rows
    // carry no recorded ref, so every probe candidate is queued.
    fn retry_refs(&self, item: &ItemRow) -> Vec<String> {
        if !item.blob_ref.is_empty() {
            return vec![item.blob_ref.clone()];
        }
        self.legacy_prefixes
            .iter()
            .map(|prefix| format!("{}/{}", prefix, item.id))
            .collect()
    }

    /// Persist a new item: blob first, then the metadata row.
    ///
    /// Callers must only invoke this after a verified post-eviction
    /// count below the limit (the pipeline holds the owner lock across
    /// that check and this insert).
    pub async fn insert(&self, owner: &Owner, bytes: Vec<u8>) -> Result<ItemRow> {
        let id = Uuid::new_v4().to_string();
        let blob_ref = format!("{}/{}", owner.id, id);
        let row = ItemRow {
            id,
            owner_id: owner.id.clone(),
            created_at: self.clock.now(),
            size_bytes: bytes.len() as u64,
            blob_ref: blob_ref.clone(),
            sequence_no: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };

        self.blobs.write(&blob_ref, &bytes).await?;

        if let Err(e) = self.metadata.insert(row.clone()).await {
            // a blob without a row is invisible to eviction; queue it
            self.orphans.write().await.push(blob_ref);
            return Err(e);
        }

        debug!(
            "stored item {} for {} ({} bytes, seq {})",
            row.id, owner.id, row.size_bytes, row.sequence_no
        );
        Ok(row)
    }

    /// Remove one item on explicit user request.
    pub async fn delete_item(&self, owner: &Owner, item_id: &str) -> Result<bool> {
        let items = self.metadata.list(&owner.id).await?;
        let Some(item) = items.into_iter().find(|i| i.id == item_id) else {
            return Ok(false);
        };

        if let Err(e) = self.delete_blob(&item).await {
            warn!(
                "blob delete failed for item {}: {} (queued for reconciliation)",
                item.id, e
            );
            self.orphans.write().await.extend(self.retry_refs(&item));
        }

        self.metadata.delete(&item.id).await?;
        info!("deleted item {} for {}", item_id, owner.id);
        Ok(true)
    }

    pub async fn stats(&self, owner: &Owner) -> Result<CapacityStats> {
        let count = self.metadata.count(&owner.id).await?;

        if self.policy.is_unlimited(&owner.tier) {
            return Ok(CapacityStats {
                count,
                max_items: UNLIMITED_ITEMS,
                remaining: UNLIMITED_ITEMS,
                can_insert_more: true,
            });
        }

        let max = self.policy.max_items(&owner.tier);
        Ok(CapacityStats {
            count,
            max_items: max,
            remaining: (max - count as i64).max(0),
            can_insert_more: (count as i64) < max,
        })
    }

    /// Retry blob deletions that failed during eviction. Blobs that
    /// still cannot be deleted stay queued for the next pass.
    pub async fn reconcile_orphans(&self) -> usize {
        let pending: Vec<String> = self.orphans.write().await.drain(..).collect();
        if pending.is_empty() {
            return 0;
        }

        let mut cleaned = 0;
        let mut requeue = Vec::new();
        for blob_ref in pending {
            match self.blobs.delete(&blob_ref).await {
                Ok(_) => cleaned += 1,
                Err(e) => {
                    warn!("orphaned blob {} still undeletable: {}", blob_ref, e);
                    requeue.push(blob_ref);
                }
            }
        }

        if !requeue.is_empty() {
            self.orphans.write().await.extend(requeue);
        }
        if cleaned > 0 {
            info!("reconciled {} orphaned blob(s)", cleaned);
        }
        cleaned
    }

    pub async fn orphan_count(&self) -> usize {
        self.orphans.read().await.len()
    }

    /// Spawn the periodic orphan reconciliation task.
    pub fn spawn_reconciler(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.reconcile_orphans().await;
            }
        })
    }
}
