use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{QuotaDay, QuotaRecord, QuotaStatusReport};
use crate::error::{GateError, Result};

/// Per-day usage counter with per-category limits
pub struct QuotaCounter {
    records: Arc<RwLock<HashMap<(String, QuotaDay), QuotaRecord>>>,
    retention_days: i64,
}

impl QuotaCounter {
    pub fn new(retention_days: i64) -> Self {
        QuotaCounter {
            records: Arc::new(RwLock::new(HashMap::new())),
            retention_days,
        }
    }

    /// Get the record for (identity, day), creating an empty one if absent
    pub async fn get_or_create(&self, identity: &str, day: QuotaDay) -> QuotaRecord {
        {
            let records = self.records.read().await;
            if let Some(record) = records.get(&(identity.to_string(), day)) {
                return record.clone();
            }
        }

        let mut records = self.records.write().await;
        records
            .entry((identity.to_string(), day))
            .or_insert_with(|| QuotaRecord::new(identity, day))
            .clone()
    }

    /// Raise the category count by one, failing once the limit is reached.
    ///
    /// The check and the increment happen under one write lock, so two
    /// concurrent calls cannot both pass at `limit - 1`.
    pub async fn increment(
        &self,
        identity: &str,
        day: QuotaDay,
        category: &str,
        limit: u32,
    ) -> Result<u32> {
        let mut records = self.records.write().await;
        let record = records
            .entry((identity.to_string(), day))
            .or_insert_with(|| QuotaRecord::new(identity, day));

        let current = record.count(category);
        if current >= limit {
            warn!(
                "quota exceeded for {} [{}] on {}: {}/{}",
                identity, category, day, current, limit
            );
            return Err(GateError::QuotaExceeded {
                limit,
                reset_at: day.next_reset(),
            });
        }

        let next = current + 1;
        record.counts.insert(category.to_string(), next);
        Ok(next)
    }

    /// Compensation only: undo a reservation after a later stage failed.
    /// Never drives a count below zero.
    pub async fn decrement(&self, identity: &str, day: QuotaDay, category: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&(identity.to_string(), day)) {
            let current = record.count(category);
            record
                .counts
                .insert(category.to_string(), current.saturating_sub(1));
            debug!(
                "released quota reservation for {} [{}] on {}",
                identity, category, day
            );
        }
    }

    pub async fn status(
        &self,
        identity: &str,
        day: QuotaDay,
        category: &str,
        limit: u32,
    ) -> QuotaStatusReport {
        let current = self.get_or_create(identity, day).await.count(category);
        QuotaStatusReport {
            current,
            limit,
            remaining: limit.saturating_sub(current),
            reset_at: day.next_reset(),
        }
    }

    /// Retention job: drop records older than the configured horizon.
    pub async fn cleanup_expired(&self, today: QuotaDay) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        let horizon = self.retention_days;
        records.retain(|(_, day), _| today.days_since(*day) <= horizon);
        let removed = before - records.len();
        if removed > 0 {
            debug!("quota retention removed {} record(s)", removed);
        }
        removed
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}
