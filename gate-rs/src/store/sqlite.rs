use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::{ItemRow, MetadataStore};
use crate::error::{GateError, Result};

/// sqlite-backed metadata store.
///
/// Timestamps are stored as integer milliseconds since the epoch, which
/// keeps the ordering index trivial and the schema free of text parsing.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub async fn connect(url: &str) -> Result<Self> {
        // sqlite serializes writers anyway; one connection also keeps
        // in-memory databases coherent across queries
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                blob_ref TEXT NOT NULL,
                sequence_no INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_owner_order
             ON items (owner_id, created_at, sequence_no)",
        )
        .execute(&pool)
        .await?;

        info!("metadata store ready at {}", url);
        Ok(Self { pool })
    }
}

fn row_to_item(row: SqliteRow) -> Result<ItemRow> {
    let millis: i64 = row.try_get("created_at")?;
    let created_at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| GateError::StoreUnavailable(format!("bad timestamp {millis}")))?;

    Ok(ItemRow {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        created_at,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        blob_ref: row.try_get("blob_ref")?,
        sequence_no: row.try_get::<i64, _>("sequence_no")? as u64,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<ItemRow>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, created_at, size_bytes, blob_ref, sequence_no
             FROM items WHERE owner_id = ?
             ORDER BY created_at ASC, sequence_no ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_item).collect()
    }

    async fn insert(&self, row: ItemRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO items (id, owner_id, created_at, size_bytes, blob_ref, sequence_no)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.owner_id)
        .bind(row.created_at.timestamp_millis())
        .bind(row.size_bytes as i64)
        .bind(&row.blob_ref)
        .bind(row.sequence_no as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, owner_id: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM items WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn max_sequence(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(sequence_no), 0) AS n FROM items")
            .fetch_one(&self.pool)
            .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
