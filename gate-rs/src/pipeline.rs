//! The composed produce operation
//!
//! Orders the three gates cheapest-first: rate check, quota
//! reservation, then the capacity prepare/evict/verify/insert cycle.
//! There is no transaction spanning the quota store and the capacity
//! stores, so a capacity failure after a successful reservation is
//! compensated by decrementing the same (identity, category, day)
//! counter before returning.
//!
//! The quota increment through the final insert runs under an
//! owner-scoped async lock; without it two concurrent calls for one
//! owner could both observe `count = max - 1`, both skip eviction and
//! both insert, transiently exceeding the cap.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::capacity::{CapacityStats, CapacityStore, Owner};
use crate::clock::Clock;
use crate::config::{LimitsConfig, QuotaConfig};
use crate::error::{GateError, Result};
use crate::quota::{QuotaCounter, QuotaDay, QuotaStatusReport};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::store::ItemRow;

/// Stage a produce call has reached; any stage can fail, and a failure
/// at or after `QuotaReserved` triggers compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceStage {
    Pending,
    RateChecked,
    QuotaReserved,
    CapacityPrepared,
    Committed,
}

#[derive(Debug)]
pub struct ProduceOutcome {
    pub item: ItemRow,
    /// Ids of items evicted to make room
    pub evicted: Vec<String>,
}

pub struct AdmissionPipeline {
    limiter: Arc<RateLimiter>,
    quota: Arc<QuotaCounter>,
    capacity: Arc<CapacityStore>,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
    quota_limits: QuotaConfig,
    // one async mutex per owner ever seen; separate lock domain from
    // the rate-limit sweep so unrelated owners never queue behind it
    owner_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AdmissionPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        quota: Arc<QuotaCounter>,
        capacity: Arc<CapacityStore>,
        clock: Arc<dyn Clock>,
        limits: LimitsConfig,
        quota_limits: QuotaConfig,
    ) -> Self {
        Self {
            limiter,
            quota,
            capacity,
            clock,
            limits,
            quota_limits,
            owner_locks: RwLock::new(HashMap::new()),
        }
    }

    fn route_limit(&self, route: &str) -> (u64, u32) {
        match route {
            "produce" => (self.limits.produce_window_ms, self.limits.produce_max),
            _ => (self.limits.status_window_ms, self.limits.status_max),
        }
    }

    fn daily_limit(&self, category: &str) -> u32 {
        self.quota_limits
            .category_limits
            .get(category)
            .copied()
            .unwrap_or(self.quota_limits.default_daily_limit)
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.owner_locks.read().await;
            if let Some(lock) = locks.get(owner_id) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.owner_locks.write().await;
        Arc::clone(
            locks
                .entry(owner_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Rate-limit check for any route, without touching quotas or storage.
    pub async fn check_admission(&self, identity: &str, route: &str) -> RateLimitDecision {
        let (window_ms, max) = self.route_limit(route);
        self.limiter
            .check(&format!("{route}:{identity}"), window_ms, max)
            .await
    }

    /// Admit and persist one more unit of output for `owner`.
    ///
    /// `factory` is only called once every gate has passed and room has
    /// been made; the bytes it returns become the stored blob.
    pub async fn try_produce<F>(
        &self,
        owner: &Owner,
        category: &str,
        factory: F,
    ) -> Result<ProduceOutcome>
    where
        F: FnOnce() -> Vec<u8>,
    {
        let mut stage = ProduceStage::Pending;

        let decision = self.check_admission(&owner.id, "produce").await;
        if !decision.allowed {
            debug!("produce for {} rejected at {:?}: rate limited", owner.id, stage);
            return Err(GateError::RateLimited {
                reset_at: decision.reset_at,
            });
        }
        stage = ProduceStage::RateChecked;
        debug!("produce for {}: {:?}", owner.id, stage);

        // one period value threads through the increment and any
        // compensation, so a midnight boundary cannot split the pair
        let day = QuotaDay::from_timestamp(self.clock.now());
        let limit = self.daily_limit(category);

        let lock = self.owner_lock(&owner.id).await;
        let _guard = lock.lock().await;

        if let Err(e) = self.quota.increment(&owner.id, day, category, limit).await {
            debug!("produce for {} rejected at {:?}: {}", owner.id, stage, e);
            return Err(e);
        }
        stage = ProduceStage::QuotaReserved;
        debug!("produce for {}: {:?}", owner.id, stage);

        match self.capacity_stage(owner, factory, &mut stage).await {
            Ok(outcome) => {
                stage = ProduceStage::Committed;
                debug!(
                    "produce for {}: {:?} (item {}, {} evicted)",
                    owner.id,
                    stage,
                    outcome.item.id,
                    outcome.evicted.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    "produce for {} failed at {:?}: {} (releasing quota reservation)",
                    owner.id, stage, e
                );
                self.quota.decrement(&owner.id, day, category).await;
                Err(e)
            }
        }
    }

    async fn capacity_stage<F>(
        &self,
        owner: &Owner,
        factory: F,
        stage: &mut ProduceStage,
    ) -> Result<ProduceOutcome>
    where
        F: FnOnce() -> Vec<u8>,
    {
        let to_evict = self.capacity.prepare_insert(owner).await?;
        *stage = ProduceStage::CapacityPrepared;

        let report = self.capacity.evict(&to_evict).await;

        // partial eviction failures do not abort by themselves; only the
        // verified post-eviction count decides whether the insert proceeds
        let stats = self.capacity.stats(owner).await?;
        if !stats.can_insert_more {
            return Err(GateError::CapacityExceeded {
                limit: stats.max_items,
            });
        }

        let item = self.capacity.insert(owner, factory()).await?;
        Ok(ProduceOutcome {
            item,
            evicted: report.evicted_ids(),
        })
    }

    pub async fn quota_status(&self, owner: &Owner, category: &str) -> QuotaStatusReport {
        let day = QuotaDay::from_timestamp(self.clock.now());
        self.quota
            .status(&owner.id, day, category, self.daily_limit(category))
            .await
    }

    pub async fn capacity_status(&self, owner: &Owner) -> Result<CapacityStats> {
        self.capacity.stats(owner).await
    }
}
