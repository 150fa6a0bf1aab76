use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel limit meaning "no capacity bound for this tier"
pub const UNLIMITED_ITEMS: i64 = -1;

/// Maps owner tiers to their maximum stored item count.
///
/// Unknown tiers fall back to the default; `-1` disables capacity
/// enforcement entirely for a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityPolicy {
    default_max_items: i64,
    tiers: HashMap<String, i64>,
}

impl CapacityPolicy {
    pub fn new(default_max_items: i64) -> Self {
        CapacityPolicy {
            default_max_items,
            tiers: HashMap::new(),
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>, max_items: i64) -> Self {
        self.tiers.insert(tier.into(), max_items);
        self
    }

    pub fn max_items(&self, tier: &str) -> i64 {
        self.tiers.get(tier).copied().unwrap_or(self.default_max_items)
    }

    pub fn is_unlimited(&self, tier: &str) -> bool {
        self.max_items(tier) == UNLIMITED_ITEMS
    }
}
