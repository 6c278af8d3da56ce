//! Content-addressed object storage.
//!
//! Objects live at `<root>/objects/<h[0..2]>/<h>` where `h` is the hex
//! sha256 of the bytes. Writes go to a temporary file in the same directory
//! and are renamed into place, so a reader never sees a partial object and
//! storing identical bytes twice writes nothing the second time.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Result of [`ObjectStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub content_hash: String,
    pub path: PathBuf,
    /// False when an object with the same hash was already present.
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            root: storage_root.into(),
        }
    }

    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        let prefix = content_hash.get(..2).unwrap_or("xx");
        self.root.join("objects").join(prefix).join(content_hash)
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.path_for(content_hash).is_file()
    }

    pub async fn put(&self, bytes: &[u8]) -> Result<PutOutcome> {
        let content_hash = sha256_hex(bytes);
        let path = self.path_for(&content_hash);

        if path.is_file() {
            return Ok(PutOutcome {
                content_hash,
                path,
                written: false,
            });
        }

        let dir = path
            .parent()
            .ok_or_else(|| HarvestError::WriteFailed(format!("bad object path {}", path.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| HarvestError::WriteFailed(format!("{}: {}", dir.display(), e)))?;

        let tmp = dir.join(format!("{}.tmp-{}", content_hash, uuid::Uuid::new_v4()));
        let write = async {
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(HarvestError::WriteFailed(format!("{}: {}", path.display(), e)));
        }

        Ok(PutOutcome {
            content_hash,
            path,
            written: true,
        })
    }

    /// Read an object back, checking that its bytes still hash to its name.
    pub async fn read_verified(&self, path: &Path, content_hash: &str) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| HarvestError::ExtractionFailed(format!("{}: {}", path.display(), e)))?;
        let actual = sha256_hex(&bytes);
        if actual != content_hash {
            return Err(HarvestError::IntegrityMismatch(format!(
                "{} hashes to {}, expected {}",
                path.display(),
                actual,
                content_hash
            )));
        }
        Ok(bytes)
    }
}
