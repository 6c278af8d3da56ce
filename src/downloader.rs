//! Document downloads into content-addressed storage.
//!
//! The response body is streamed with a hard size cap and compared with
//! `Content-Length` when the server sends one. A short body is requested
//! once more; a second mismatch is an [`HarvestError::IntegrityMismatch`]
//! and is not retried. The bytes are then hashed and handed to the
//! [`ObjectStore`].

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};
use crate::extract::{
    normalize_content_type, MIME_DOCX, MIME_HTML, MIME_PDF, MIME_PPTX, MIME_TEXT, MIME_XLSX,
};
use crate::models::{DocumentReference, StoredDocument};
use crate::storage::ObjectStore;

const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Declared types that say nothing about the document format.
const GENERIC_TYPES: &[&str] = &[
    MIME_OCTET_STREAM,
    "binary/octet-stream",
    "application/zip",
    "application/x-zip-compressed",
    "application/download",
    "application/force-download",
];

/// Retrieves a referenced document and persists its bytes.
#[async_trait]
pub trait Download: Send + Sync {
    async fn fetch(&self, reference: &DocumentReference) -> Result<StoredDocument>;
}

pub struct HttpDownloader {
    client: reqwest::Client,
    store: Arc<ObjectStore>,
    max_bytes: u64,
}

enum Body {
    Complete {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    Short {
        expected: u64,
        received: u64,
    },
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client, store: Arc<ObjectStore>, max_bytes: u64) -> Self {
        Self {
            client,
            store,
            max_bytes,
        }
    }

    async fn receive(&self, url: &str) -> Result<Body> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::DownloadFailed(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::DownloadFailed(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        let expected = response.content_length();
        if let Some(n) = expected {
            if n > self.max_bytes {
                return Err(HarvestError::IntegrityMismatch(format!(
                    "{} declares {} bytes, limit is {}",
                    url, n, self.max_bytes
                )));
            }
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::with_capacity(expected.unwrap_or(0).min(self.max_bytes) as usize);
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // The connection closed before Content-Length bytes arrived.
                Err(e) if expected.is_some_and(|n| (bytes.len() as u64) < n) => {
                    debug!(url, received = bytes.len(), error = %e, "body cut short");
                    break;
                }
                Err(e) => return Err(HarvestError::DownloadFailed(format!("{}: {}", url, e))),
            };
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(HarvestError::IntegrityMismatch(format!(
                    "{} exceeds the {} byte limit",
                    url, self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        match expected {
            Some(n) if n != bytes.len() as u64 => Ok(Body::Short {
                expected: n,
                received: bytes.len() as u64,
            }),
            _ => Ok(Body::Complete {
                bytes,
                content_type,
            }),
        }
    }
}

#[async_trait]
impl Download for HttpDownloader {
    async fn fetch(&self, reference: &DocumentReference) -> Result<StoredDocument> {
        let url = reference.url.as_str();
        let mut body = self.receive(url).await?;
        if let Body::Short { expected, received } = body {
            warn!(
                source_id = %reference.source_id,
                expected,
                received,
                "body shorter than Content-Length, requesting again"
            );
            body = self.receive(url).await?;
        }

        let (bytes, declared) = match body {
            Body::Complete {
                bytes,
                content_type,
            } => (bytes, content_type),
            Body::Short { expected, received } => {
                return Err(HarvestError::IntegrityMismatch(format!(
                    "{}: Content-Length {} but received {} bytes twice",
                    url, expected, received
                )))
            }
        };

        let content_type = resolve_content_type(declared.as_deref(), &bytes, url);
        let put = self.store.put(&bytes).await?;
        debug!(
            source_id = %reference.source_id,
            hash = %put.content_hash,
            bytes = bytes.len(),
            content_type = %content_type,
            new_object = put.written,
            "downloaded"
        );

        Ok(StoredDocument {
            source: reference.source.clone(),
            source_id: reference.source_id.clone(),
            url: reference.url.clone(),
            title: reference.title.clone(),
            content_hash: put.content_hash,
            storage_path: put.path,
            byte_size: bytes.len() as u64,
            content_type,
        })
    }
}

/// Declared `Content-Type` when it names a format, else a sniffed one.
pub fn resolve_content_type(declared: Option<&str>, bytes: &[u8], url: &str) -> String {
    match declared.map(normalize_content_type) {
        Some(ct) if !ct.is_empty() && !GENERIC_TYPES.contains(&ct.as_str()) => ct,
        _ => sniff_content_type(bytes, url),
    }
}

/// Guess a type from magic bytes, then from the URL extension.
pub fn sniff_content_type(bytes: &[u8], url: &str) -> String {
    let by_extension = extension_type(url);
    if bytes.starts_with(b"%PDF") {
        return MIME_PDF.to_string();
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return by_extension
            .filter(|ct| matches!(*ct, MIME_DOCX | MIME_PPTX | MIME_XLSX))
            .unwrap_or("application/zip")
            .to_string();
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return MIME_HTML.to_string();
    }
    by_extension.unwrap_or(MIME_OCTET_STREAM).to_string()
}

fn extension_type(url: &str) -> Option<&'static str> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.rfind(|s| !s.is_empty())?;
    let (_, ext) = last.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "xlsx" => Some(MIME_XLSX),
        "html" | "htm" | "aspx" | "php" => Some(MIME_HTML),
        "txt" => Some(MIME_TEXT),
        _ => None,
    }
}
