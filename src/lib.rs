//! # doc-harvest
//!
//! A resumable acquisition pipeline for government document portals.
//!
//! Each configured source is listed page by page, new references are
//! registered in a SQLite catalog, their bytes are downloaded into a
//! content-addressed object store, text is extracted natively or through an
//! external OCR command, and every result is appended once to a JSON-lines
//! index. A second run over the same sources repeats no completed work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌───────────┐   ┌─────────┐
//! │ Listings │──▶│  Fetcher   │──▶│ Downloader  │──▶│ Extractor │──▶│  Index  │
//! │ HTML/JSON│   │ dedupe,    │   │ objects/ab/ │   │ native or │   │ JSONL   │
//! │ manifest │   │ checkpoint │   │ <sha256>    │   │ OCR cmd   │   │         │
//! └──────────┘   └─────┬──────┘   └──────┬──────┘   └─────┬─────┘   └─────────┘
//!                      └────────── Catalog (SQLite) ──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                  # create catalog and storage root
//! harvest sources               # check configured sources
//! harvest run gosi              # fetch, store, extract, index
//! harvest status --failed       # what happened
//! harvest export docx --out out # one RTL .docx per document
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | References, stored documents, records, statuses |
//! | [`error`] | Error kinds and their retry classes |
//! | [`catalog`] | Persistent per-document status |
//! | [`fetcher`] | Paged listing, dedupe within a pass, ids |
//! | [`listing_html`] / [`listing_json`] / [`listing_manifest`] | Source kinds |
//! | [`downloader`] | Streaming downloads with size checks |
//! | [`storage`] | Content-addressed object store |
//! | [`extract`] / [`ocr`] | Text extraction and OCR engines |
//! | [`index`] | Append-only extracted-text index |
//! | [`pipeline`] | Worker pool, retries, cancellation |
//! | [`export`] / [`docx`] | JSON and RTL DOCX export |
//! | [`pages`] | PDF page counts |

pub mod catalog;
pub mod config;
pub mod db;
pub mod docx;
pub mod downloader;
pub mod error;
pub mod export;
pub mod extract;
pub mod fetcher;
pub mod index;
pub mod listing_html;
pub mod listing_json;
pub mod listing_manifest;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pages;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod sources;
pub mod status;
pub mod storage;
pub mod summary;
