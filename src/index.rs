//! Append-only JSON-lines output index.
//!
//! One [`ExtractedRecord`] per line. Each record is appended with a single
//! write followed by `sync_data`, so after a crash the file holds complete
//! records plus at most one partial trailing line; [`IndexWriter::open`]
//! cuts that line off. Ids already present on open are remembered and never
//! written twice.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{HarvestError, Result};
use crate::models::ExtractedRecord;

pub struct IndexWriter {
    path: PathBuf,
    file: tokio::fs::File,
    ids: HashSet<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    source_id: String,
}

fn write_failed(path: &Path, err: impl std::fmt::Display) -> HarvestError {
    HarvestError::WriteFailed(format!("index {}: {}", path.display(), err))
}

impl IndexWriter {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_failed(path, e))?;
        }

        let mut ids = HashSet::new();
        if path.exists() {
            let content = tokio::fs::read(path)
                .await
                .map_err(|e| write_failed(path, e))?;
            let complete = match content.iter().rposition(|&b| b == b'\n') {
                Some(pos) => pos + 1,
                None => 0,
            };
            if complete < content.len() {
                warn!(
                    path = %path.display(),
                    dropped_bytes = content.len() - complete,
                    "truncating partial trailing index line"
                );
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(path)
                    .await
                    .map_err(|e| write_failed(path, e))?;
                file.set_len(complete as u64)
                    .await
                    .map_err(|e| write_failed(path, e))?;
                file.sync_all().await.map_err(|e| write_failed(path, e))?;
            }

            for (lineno, line) in content[..complete].split(|&b| b == b'\n').enumerate() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<IdOnly>(line) {
                    Ok(rec) => {
                        ids.insert(rec.source_id);
                    }
                    Err(e) => warn!(line = lineno + 1, error = %e, "unreadable index line"),
                }
            }
            info!(path = %path.display(), records = ids.len(), "index opened");
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| write_failed(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            ids,
        })
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.ids.contains(source_id)
    }

    /// Append a record. Returns `false` (and writes nothing) when its
    /// `source_id` is already in the index.
    pub async fn append(&mut self, record: &ExtractedRecord) -> Result<bool> {
        if self.ids.contains(&record.source_id) {
            return Ok(false);
        }
        let mut line = serde_json::to_vec(record).map_err(|e| write_failed(&self.path, e))?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(|e| write_failed(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| write_failed(&self.path, e))?;

        self.ids.insert(record.source_id.clone());
        Ok(true)
    }
}

/// Load every complete record of an index file.
pub fn read_index(path: &Path) -> anyhow::Result<Vec<ExtractedRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index: {}", path.display()))?;
    let mut records = Vec::new();
    let mut lines = content.split('\n').peekable();
    let mut lineno = 0;
    while let Some(line) = lines.next() {
        lineno += 1;
        // The last piece has no terminating newline: empty or a partial write.
        if lines.peek().is_none() || line.trim().is_empty() {
            continue;
        }
        let record: ExtractedRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), lineno))?;
        records.push(record);
    }
    Ok(records)
}
