/// Bounded per-owner item storage
///
/// Keeps each owner's stored item count within the tier policy by
/// evicting oldest items first, across a metadata store and a blob
/// store with no shared transaction:
/// - [`policy`]: tier -> max items mapping (-1 = unconstrained)
/// - [`store`]: prepare/evict/insert cycle with per-item outcome
///   aggregation and an orphan list for failed blob deletions

pub mod policy;
pub mod store;

use serde::{Deserialize, Serialize};

pub use policy::{CapacityPolicy, UNLIMITED_ITEMS};
pub use store::{CapacityStats, CapacityStore, EvictionOutcome, EvictionReport};

/// An owner of stored items: an account id plus its capacity tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub tier: String,
}

impl Owner {
    pub fn new(id: impl Into<String>, tier: impl Into<String>) -> Self {
        Owner {
            id: id.into(),
            tier: tier.into(),
        }
    }
}
