//! Pipeline error taxonomy.
//!
//! Every stage reports failures as a [`HarvestError`]. The orchestrator
//! decides what to do with an error purely from its [`ErrorClass`]:
//!
//! | Class | Kinds | Policy |
//! |-------|-------|--------|
//! | transient | `SourceUnavailable`, `DownloadFailed`, `ExtractionFailed` | retry with backoff, then mark `failed` |
//! | structural | `IntegrityMismatch`, `UnsupportedFormat` | mark `failed` immediately |
//! | fatal | `StoreCorrupt`, `WriteFailed` | abort the run |

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("source '{name}' unavailable: {message}")]
    SourceUnavailable { name: String, message: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("catalog store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Discriminant of [`HarvestError`], persisted in the catalog and used as
/// the grouping key of the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    SourceUnavailable,
    DownloadFailed,
    IntegrityMismatch,
    ExtractionFailed,
    UnsupportedFormat,
    StoreCorrupt,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Structural,
    Fatal,
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            HarvestError::DownloadFailed(_) => ErrorKind::DownloadFailed,
            HarvestError::IntegrityMismatch(_) => ErrorKind::IntegrityMismatch,
            HarvestError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            HarvestError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            HarvestError::StoreCorrupt(_) => ErrorKind::StoreCorrupt,
            HarvestError::WriteFailed(_) => ErrorKind::WriteFailed,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::SourceUnavailable
            | ErrorKind::DownloadFailed
            | ErrorKind::ExtractionFailed => ErrorClass::Transient,
            ErrorKind::IntegrityMismatch | ErrorKind::UnsupportedFormat => ErrorClass::Structural,
            ErrorKind::StoreCorrupt | ErrorKind::WriteFailed => ErrorClass::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::IntegrityMismatch => "IntegrityMismatch",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::StoreCorrupt => "StoreCorrupt",
            ErrorKind::WriteFailed => "WriteFailed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Catalog writes that fail at the storage layer leave bookkeeping in an
// unknown state, so they share the fatal WriteFailed kind.
impl From<sqlx::Error> for HarvestError {
    fn from(err: sqlx::Error) -> Self {
        HarvestError::WriteFailed(format!("catalog: {}", err))
    }
}
