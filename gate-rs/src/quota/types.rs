use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// UTC calendar day used as the quota period.
///
/// Computed once per call path and threaded through paired operations,
/// so a check and its increment can never straddle midnight and land on
/// different days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuotaDay(NaiveDate);

impl QuotaDay {
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        QuotaDay(at.date_naive())
    }

    /// UTC midnight at which this day's counters stop applying
    pub fn next_reset(&self) -> DateTime<Utc> {
        match self.0.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN).and_utc(),
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn days_since(&self, other: QuotaDay) -> i64 {
        self.0.signed_duration_since(other.0).num_days()
    }
}

impl std::fmt::Display for QuotaDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-category usage counts for one identity on one day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub identity: String,
    pub day: QuotaDay,
    pub counts: HashMap<String, u32>,
}

impl QuotaRecord {
    pub fn new(identity: impl Into<String>, day: QuotaDay) -> Self {
        QuotaRecord {
            identity: identity.into(),
            day,
            counts: HashMap::new(),
        }
    }

    pub fn count(&self, category: &str) -> u32 {
        self.counts.get(category).copied().unwrap_or(0)
    }
}

/// Snapshot of one category's usage for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatusReport {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}
