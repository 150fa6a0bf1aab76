//! Metadata and blob store contracts
//!
//! The capacity layer spans two stores with no shared transaction: a
//! metadata store holding one row per item (the source of truth for an
//! owner's visible count) and a blob store holding the payload bytes.
//!
//! Backends:
//! - [`memory`]: in-process maps for single-instance use and tests
//! - [`sqlite`]: sqlx-backed metadata rows
//! - [`fs`]: filesystem blobs

pub mod fs;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One stored item's metadata row.
///
/// `(created_at, sequence_no)` is the eviction ordering key; the
/// sequence number breaks ties between same-timestamp inserts so the
/// oldest item is well defined even under clock skew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub blob_ref: String,
    pub sequence_no: u64,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All rows for an owner, ordered by `(created_at, sequence_no)` ascending
    async fn list(&self, owner_id: &str) -> Result<Vec<ItemRow>>;

    async fn insert(&self, row: ItemRow) -> Result<()>;

    /// Returns whether a row existed
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self, owner_id: &str) -> Result<usize>;

    /// Highest sequence number ever assigned (0 when empty); used to
    /// seed the in-process sequence counter on startup
    async fn max_sequence(&self) -> Result<u64>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Idempotent on missing: deleting an absent blob returns `Ok(false)`.
    async fn delete(&self, path: &str) -> Result<bool>;
}
