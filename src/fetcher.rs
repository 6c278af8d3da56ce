//! Source listings and the fetcher that pages through them.
//!
//! A [`Listing`] knows how to turn one page of a source (an HTML index, a
//! JSON endpoint, a saved manifest) into [`DocumentReference`]s. The
//! [`Fetcher`] drives a listing page by page, retrying each page request
//! with the pipeline's backoff policy and dropping references whose
//! `source_id` was already yielded in the same pass.
//!
//! # Source ids
//!
//! Every reference gets a stable `"<source>:<local>"` id. `<local>` is the
//! id the listing supplies (a JSON id field or an element attribute) when
//! there is one. Otherwise it is the last path segment of the document URL
//! with its extension removed, followed by `-` and 8 hex chars of the
//! sha256 of the URL's path and query, so `2023/report.pdf`,
//! `2024/report.pdf` and `report.docx` stay distinct. Both forms are
//! reduced to Arabic and ASCII letters, digits, spaces, `_` and `-`, and
//! capped at 180 characters; an explicit id that sanitizing altered gets
//! the hash suffix of its raw value. A URL with no usable segment falls
//! back to a 16 char hash of the URL itself.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Pagination, PipelineConfig, SourceConfig};
use crate::error::{HarvestError, Result};
use crate::listing_html::HtmlListing;
use crate::listing_json::JsonListing;
use crate::listing_manifest::ManifestListing;
use crate::models::DocumentReference;
use crate::retry::RetryPolicy;
use crate::storage::sha256_hex;

const MAX_LOCAL_ID_CHARS: usize = 180;
const ID_SUFFIX_CHARS: usize = 8;

/// One page of listing results.
#[derive(Debug, Default)]
pub struct Page {
    pub references: Vec<DocumentReference>,
    /// Cursor of the following page; `None` when the listing is exhausted.
    pub next_cursor: Option<u32>,
}

/// A paginated source of document references.
///
/// Implementations perform network or file reads only. Page requests that
/// can succeed on a later attempt should fail with
/// [`HarvestError::SourceUnavailable`].
#[async_trait]
pub trait Listing: Send + Sync {
    /// Configured source name, the prefix of every `source_id`.
    fn source(&self) -> &str;

    /// Cursor of the first page.
    fn first_cursor(&self) -> u32 {
        1
    }

    async fn page(&self, cursor: u32) -> Result<Page>;
}

/// Pages through a [`Listing`], one batch of fresh references per call.
pub struct Fetcher {
    listing: Box<dyn Listing>,
    retry: RetryPolicy,
    cursor: Option<u32>,
    seen: HashSet<String>,
    pages: u32,
}

impl Fetcher {
    /// Start at `resume_from` (a checkpointed cursor) or the first page.
    pub fn new(listing: Box<dyn Listing>, retry: RetryPolicy, resume_from: Option<u32>) -> Self {
        let cursor = resume_from.unwrap_or_else(|| listing.first_cursor());
        Self {
            listing,
            retry,
            cursor: Some(cursor),
            seen: HashSet::new(),
            pages: 0,
        }
    }

    /// Cursor of the page the next call to [`next_batch`](Self::next_batch)
    /// will request, or `None` when the listing is exhausted.
    pub fn cursor(&self) -> Option<u32> {
        self.cursor
    }

    pub fn pages_read(&self) -> u32 {
        self.pages
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the listing is exhausted. A page that keeps
    /// failing after the retry budget is spent becomes
    /// [`HarvestError::SourceUnavailable`]; the cursor is left on that page
    /// so a later run can resume there.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<DocumentReference>>> {
        let Some(cursor) = self.cursor else {
            return Ok(None);
        };

        let label = format!("{} page {}", self.listing.source(), cursor);
        let listing = &self.listing;
        let attempted = self.retry.run(&label, |_| listing.page(cursor)).await;

        let page = match attempted.result {
            Ok(page) => page,
            Err(err @ HarvestError::SourceUnavailable { .. }) => return Err(err),
            Err(err) => return Err(unavailable(self.listing.source(), err)),
        };

        self.pages += 1;
        let total = page.references.len();
        let fresh: Vec<DocumentReference> = page
            .references
            .into_iter()
            .filter(|r| self.seen.insert(r.source_id.clone()))
            .collect();

        debug!(
            source = self.listing.source(),
            cursor,
            total,
            fresh = fresh.len(),
            "listing page read"
        );
        if page.next_cursor.is_none() {
            info!(
                source = self.listing.source(),
                pages = self.pages,
                references = self.seen.len(),
                "listing complete"
            );
        }

        self.cursor = page.next_cursor;
        Ok(Some(fresh))
    }

    /// Drain the listing into one vector.
    pub async fn collect_all(&mut self) -> Result<Vec<DocumentReference>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }
}

/// HTTP client shared by listings and the downloader.
pub fn http_client(config: &PipelineConfig) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(config.timeout_seconds.min(30)))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

/// Build the listing for one configured source.
pub fn listing_for(name: &str, source: &SourceConfig, client: reqwest::Client) -> Box<dyn Listing> {
    match source {
        SourceConfig::Html(c) => Box::new(HtmlListing::new(name, c.clone(), client)),
        SourceConfig::Json(c) => Box::new(JsonListing::new(name, c.clone(), client)),
        SourceConfig::Manifest(c) => Box::new(ManifestListing::new(name, c.clone())),
    }
}

/// Keep Arabic and ASCII letters, digits, spaces, `_` and `-`; drop the
/// rest, trim, and cap the length.
pub fn sanitize_component(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, ' ' | '_' | '-')
                || ('\u{0600}'..='\u{06FF}').contains(c)
        })
        .collect();
    kept.trim().chars().take(MAX_LOCAL_ID_CHARS).collect()
}

/// Derive the source-local part of a `source_id`.
pub fn derive_local_id(explicit: Option<&str>, url: &str) -> String {
    if let Some(raw) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        let clean = sanitize_component(raw);
        if clean == raw {
            return clean;
        }
        if !clean.is_empty() {
            return with_suffix(&clean, raw);
        }
    }

    let parsed = url::Url::parse(url).ok();
    let stem = parsed
        .as_ref()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .map(|seg| {
            String::from_utf8_lossy(&urlencoding::decode_binary(seg.as_bytes())).into_owned()
        })
        .map(|seg| match seg.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && ext.len() <= 5 => stem.to_string(),
            _ => seg,
        })
        .map(|seg| sanitize_component(&seg))
        .unwrap_or_default();

    if stem.is_empty() {
        return sha256_hex(url.as_bytes())[..16].to_string();
    }
    let location = match &parsed {
        Some(u) => match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        },
        None => url.to_string(),
    };
    with_suffix(&stem, &location)
}

/// `<stem>-<8 hex chars of sha256(key)>`, within the length cap.
fn with_suffix(stem: &str, key: &str) -> String {
    let room = MAX_LOCAL_ID_CHARS - ID_SUFFIX_CHARS - 1;
    let stem: String = stem.chars().take(room).collect();
    format!(
        "{}-{}",
        stem.trim_end(),
        &sha256_hex(key.as_bytes())[..ID_SUFFIX_CHARS]
    )
}

pub(crate) fn unavailable(source: &str, message: impl std::fmt::Display) -> HarvestError {
    HarvestError::SourceUnavailable {
        name: source.to_string(),
        message: message.to_string(),
    }
}

/// Send a listing request and return the body, mapping every failure to
/// [`HarvestError::SourceUnavailable`].
pub(crate) async fn read_body(source: &str, request: reqwest::RequestBuilder) -> Result<String> {
    let response = request.send().await.map_err(|e| unavailable(source, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(source, format!("HTTP {}", status)));
    }
    response.text().await.map_err(|e| unavailable(source, e))
}

/// Set (or replace) the page query parameter on a listing URL.
pub(crate) fn with_page_param(url: &url::Url, param: &str, cursor: u32) -> url::Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut paged = url.clone();
    paged
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &cursor.to_string());
    paged
}

/// Cursor after `cursor`, or `None` when pagination is off, the page was
/// empty, or `max_pages` pages have been read.
pub(crate) fn next_page(pagination: Option<&Pagination>, cursor: u32, found: usize) -> Option<u32> {
    let p = pagination?;
    if found == 0 || cursor.saturating_sub(p.start) + 1 >= p.max_pages {
        return None;
    }
    Some(cursor + 1)
}

pub fn make_source_id(source: &str, explicit: Option<&str>, url: &str) -> String {
    format!("{}:{}", source, derive_local_id(explicit, url))
}
