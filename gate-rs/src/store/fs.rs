use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::BlobStore;
use crate::error::{GateError, Result};

/// Filesystem blob store rooted at a base directory.
///
/// Blob refs are relative paths (`owner/id`); path components are
/// validated so a ref can never escape the base directory.
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: String) -> Self {
        Self {
            base_path: PathBuf::from(base_path),
        }
    }

    fn resolve(&self, blob_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(blob_ref);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_))
        });
        if escapes || blob_ref.is_empty() {
            return Err(GateError::StoreUnavailable(format!(
                "invalid blob ref: {blob_ref}"
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, blob_ref: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(blob_ref)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                GateError::StoreUnavailable(format!(
                    "failed to create directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        fs::write(&path, bytes).await?;
        debug!("wrote blob {} ({} bytes)", blob_ref, bytes.len());
        Ok(())
    }

    async fn delete(&self, blob_ref: &str) -> Result<bool> {
        let path = self.resolve(blob_ref)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GateError::StoreUnavailable(format!(
                "failed to delete blob {}: {}",
                blob_ref, e
            ))),
        }
    }
}
