use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{BlobStore, ItemRow, MetadataStore};
use crate::error::Result;

/// In-process metadata store
pub struct MemoryMetadataStore {
    rows: RwLock<Vec<ItemRow>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<ItemRow>> {
        let rows = self.rows.read().await;
        let mut items: Vec<ItemRow> = rows
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        items.sort_by_key(|r| (r.created_at, r.sequence_no));
        Ok(items)
    }

    async fn insert(&self, row: ItemRow) -> Result<()> {
        self.rows.write().await.push(row);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }

    async fn count(&self, owner_id: &str) -> Result<usize> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|r| r.owner_id == owner_id).count())
    }

    async fn max_sequence(&self) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows.iter().map(|r| r.sequence_no).max().unwrap_or(0))
    }
}

/// In-process blob store
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(path).is_some())
    }
}
