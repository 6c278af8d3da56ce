//! Core data models used throughout the harvest pipeline.
//!
//! A document moves through four shapes: a [`DocumentReference`] found by a
//! listing, a [`StoredDocument`] in content-addressed storage, an
//! [`ExtractedRecord`] written to the output index, and the
//! [`CatalogEntry`] that tracks its progress across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Lightweight pointer to a document discovered on a source listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReference {
    pub source: String,
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// Raw document bytes persisted under the storage root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub source: String,
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub storage_path: PathBuf,
    pub byte_size: u64,
    pub content_type: String,
}

/// Normalized text of one document, one line of the output index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub source_id: String,
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub ocr_confidence: Option<f64>,
    #[serde(default)]
    pub page_count: Option<u32>,
    pub content_hash: String,
    pub content_type: String,
    pub engine: String,
}

/// Persisted pipeline status of a document.
///
/// Moves forward only: `pending → fetched → extracted`, or to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Fetched,
    Extracted,
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Fetched,
        Status::Extracted,
        Status::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Fetched => "fetched",
            Status::Extracted => "extracted",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Extracted | Status::Failed)
    }

    /// Statuses from which a transition into `self` is allowed.
    ///
    /// `fetched → fetched` is permitted so a document whose stored object
    /// went missing can be downloaded again without regressing.
    pub fn predecessors(self) -> &'static [Status] {
        match self {
            Status::Pending => &[],
            Status::Fetched => &[Status::Pending, Status::Fetched],
            Status::Extracted => &[Status::Pending, Status::Fetched],
            Status::Failed => &[Status::Pending, Status::Fetched],
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "fetched" => Ok(Status::Fetched),
            "extracted" => Ok(Status::Extracted),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown catalog status '{}'", other)),
        }
    }
}

/// One row of the catalog table.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub source_id: String,
    pub source: String,
    pub url: String,
    pub title: Option<String>,
    pub status: Status,
    pub content_hash: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub byte_size: Option<u64>,
    pub content_type: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<String>,
    /// Unix seconds.
    pub discovered_at: i64,
    pub updated_at: i64,
}

impl CatalogEntry {
    /// The reference this entry was registered from.
    pub fn reference(&self) -> DocumentReference {
        DocumentReference {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            discovered_at: DateTime::from_timestamp(self.discovered_at, 0).unwrap_or_else(Utc::now),
        }
    }

    /// The stored object recorded by a completed download, if any.
    pub fn stored_document(&self) -> Option<StoredDocument> {
        Some(StoredDocument {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            content_hash: self.content_hash.clone()?,
            storage_path: self.storage_path.clone()?,
            byte_size: self.byte_size.unwrap_or(0),
            content_type: self
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        })
    }
}
