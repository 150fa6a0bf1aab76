/// Daily usage quotas
///
/// Per-owner, per-category counters keyed by UTC calendar day:
/// - One record per (identity, day), created lazily
/// - Increment fails closed once the category limit is reached
/// - Decrement exists only as compensation and saturates at zero
/// - A retention job drops records older than N days

pub mod counter;
pub mod types;

pub use counter::QuotaCounter;
pub use types::{QuotaDay, QuotaRecord, QuotaStatusReport};
