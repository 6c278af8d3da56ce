//! End-to-end pipeline runs against an in-process portal.
//!
//! The portal serves one HTML listing page and a handful of documents, and
//! counts every request so tests can assert which work was repeated.

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use doc_harvest::config::{parse_config, Config};
use doc_harvest::downloader::{Download, HttpDownloader};
use doc_harvest::error::{ErrorKind, HarvestError, Result as HarvestResult};
use doc_harvest::fetcher::make_source_id;
use doc_harvest::index::{read_index, IndexWriter};
use doc_harvest::models::{DocumentReference, ExtractedRecord, Status, StoredDocument};
use doc_harvest::ocr::{EngineOutput, NativeEngine, OcrEngine};
use doc_harvest::pipeline::{Pipeline, RunOptions};
use doc_harvest::storage::ObjectStore;

// ═══════════════════════════════════════════════════════════════════════
// Fixture portal
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
struct Portal {
    links: Arc<Vec<&'static str>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl Portal {
    fn new(links: &[&'static str]) -> Self {
        Self {
            links: Arc::new(links.to_vec()),
            hits: Arc::default(),
        }
    }

    fn hit(&self, path: &str) {
        *self.hits.lock().unwrap().entry(path.to_string()).or_default() += 1;
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Requests for documents, listing excluded.
    fn document_hits(&self) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.starts_with("/docs/"))
            .map(|(_, n)| n)
            .sum()
    }
}

async fn listing(State(portal): State<Portal>) -> Html<String> {
    portal.hit("/list");
    let items: String = portal
        .links
        .iter()
        .map(|name| format!("<li><a href=\"/docs/{0}\">Document {0}</a></li>", name))
        .collect();
    Html(format!(
        "<html><body><ul id=\"list\">{}</ul><a href=\"/about\">About</a></body></html>",
        items
    ))
}

fn text_body(body: impl Into<String>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

async fn document(State(portal): State<Portal>, UrlPath(name): UrlPath<String>) -> Response {
    portal.hit(&format!("/docs/{}", name));
    match name.as_str() {
        "c.txt" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream error").into_response(),
        "copy1.txt" | "copy2.txt" => text_body("the same circular published twice"),
        "big.txt" => text_body("x".repeat(4096)),
        "scan.png" => (
            [(header::CONTENT_TYPE, "image/png")],
            vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
        )
            .into_response(),
        other => match other.strip_suffix(".txt") {
            Some(stem) => text_body(format!("text of document {}", stem)),
            None => StatusCode::NOT_FOUND.into_response(),
        },
    }
}

async fn serve(portal: Portal) -> String {
    let app = Router::new()
        .route("/list", get(listing))
        .route("/docs/{name}", get(document))
        .with_state(portal);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(tmp: &TempDir, base: &str, workers: usize) -> Config {
    let toml = format!(
        r##"
[catalog]
path = "{root}/catalog.sqlite"

[index]
path = "{root}/out/index.jsonl"

[pipeline]
storage_root = "{root}/objects"
max_retries = 2
backoff_base_ms = 5
worker_count = {workers}
timeout_seconds = 10

[sources.portal]
kind = "html"
url = "{base}/list"
link_selector = "#list a"
"##,
        root = tmp.path().display(),
        base = base,
        workers = workers,
    );
    parse_config(&toml).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
// Engines
// ═══════════════════════════════════════════════════════════════════════

/// Native extraction that counts calls and can cancel the run after its
/// first document.
struct Counting {
    inner: NativeEngine,
    calls: Arc<AtomicUsize>,
    cancel_after_first: Option<CancellationToken>,
}

impl Counting {
    fn new(config: &Config, calls: Arc<AtomicUsize>) -> Self {
        let store = Arc::new(ObjectStore::new(&config.pipeline.storage_root));
        Self {
            inner: NativeEngine::new(store, HashMap::new()),
            calls,
            cancel_after_first: None,
        }
    }
}

#[async_trait]
impl OcrEngine for Counting {
    fn name(&self) -> &str {
        "native"
    }

    async fn recognize(&self, doc: &StoredDocument) -> HarvestResult<EngineOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = self.inner.recognize(doc).await;
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        output
    }
}

struct AlwaysFails {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrEngine for AlwaysFails {
    fn name(&self) -> &str {
        "broken"
    }

    async fn recognize(&self, _doc: &StoredDocument) -> HarvestResult<EngineOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HarvestError::ExtractionFailed("engine crashed".into()))
    }
}

/// HTTP downloads that cancel the run once `name` has been stored.
struct CancelAfterDownload {
    inner: HttpDownloader,
    name: &'static str,
    token: CancellationToken,
}

impl CancelAfterDownload {
    fn new(config: &Config, name: &'static str, token: CancellationToken) -> Self {
        Self {
            inner: HttpDownloader::new(
                reqwest::Client::new(),
                Arc::new(ObjectStore::new(&config.pipeline.storage_root)),
                config.pipeline.max_download_bytes,
            ),
            name,
            token,
        }
    }
}

#[async_trait]
impl Download for CancelAfterDownload {
    async fn fetch(&self, reference: &DocumentReference) -> HarvestResult<StoredDocument> {
        let doc = self.inner.fetch(reference).await?;
        if reference.url.ends_with(self.name) {
            self.token.cancel();
        }
        Ok(doc)
    }
}

async fn pipeline_with(config: &Config, engine: Arc<dyn OcrEngine>) -> Pipeline {
    Pipeline::open(config.clone())
        .await
        .unwrap()
        .with_engine(engine)
}

/// Catalog id the listing yields for `/docs/<name>`; the host plays no part.
fn doc_id(name: &str) -> String {
    make_source_id("portal", None, &format!("http://portal.test/docs/{}", name))
}

fn sorted_ids(names: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = names.iter().map(|name| doc_id(name)).collect();
    ids.sort();
    ids
}

fn index_ids(config: &Config) -> Vec<String> {
    let mut ids: Vec<String> = read_index(&config.index.path)
        .unwrap()
        .into_iter()
        .map(|r| r.source_id)
        .collect();
    ids.sort();
    ids
}

// ═══════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failing_download_does_not_stop_the_others() {
    let portal = Portal::new(&["a.txt", "b.txt", "c.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[&ErrorKind::DownloadFailed].count, 1);
    assert!(!summary.is_clean());

    // First attempt plus two retries.
    assert_eq!(portal.hits("/docs/c.txt"), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let c = pipeline.catalog().get(&doc_id("c.txt")).await.unwrap().unwrap();
    assert_eq!(c.status, Status::Failed);
    assert_eq!(c.error_kind.as_deref(), Some("DownloadFailed"));
    assert_eq!(c.attempts, 3);
    assert!(c.last_error.unwrap().contains("500"));

    assert_eq!(index_ids(&config), sorted_ids(&["a.txt", "b.txt"]));
    let records = read_index(&config.index.path).unwrap();
    let a = records.iter().find(|r| r.source_id == doc_id("a.txt")).unwrap();
    assert_eq!(a.text, "text of document a");
    assert_eq!(a.title.as_deref(), Some("Document a.txt"));
    assert_eq!(a.engine, "native");
    pipeline.close().await;
}

#[tokio::test]
async fn second_run_repeats_no_completed_work() {
    let portal = Portal::new(&["a.txt", "b.txt", "c.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let first = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    first.run(&RunOptions::default()).await.unwrap();
    first.close().await;
    let downloads = portal.document_hits();
    let ocr_calls = calls.load(Ordering::SeqCst);

    let second = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = second.run(&RunOptions::default()).await.unwrap();
    second.close().await;

    assert_eq!(portal.document_hits(), downloads);
    assert_eq!(calls.load(Ordering::SeqCst), ocr_calls);
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.extracted, 0);
    assert_eq!(portal.hits("/list"), 2);
    assert_eq!(index_ids(&config).len(), 2);

    // Without discovery not even the listing is requested.
    let third = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let options = RunOptions {
        discover: false,
        ..RunOptions::default()
    };
    third.run(&options).await.unwrap();
    third.close().await;
    assert_eq!(portal.hits("/list"), 2);
    assert_eq!(portal.document_hits(), downloads);
}

#[tokio::test]
async fn extraction_failures_are_retried_then_recorded() {
    let portal = Portal::new(&["a.txt", "b.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(
        &config,
        Arc::new(AlwaysFails {
            calls: calls.clone(),
        }),
    )
    .await;
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.errors[&ErrorKind::ExtractionFailed].count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    // Downloads are not repeated when only extraction fails.
    assert_eq!(portal.document_hits(), 2);

    for id in sorted_ids(&["a.txt", "b.txt"]) {
        let entry = pipeline.catalog().get(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Failed);
        assert_eq!(entry.error_kind.as_deref(), Some("ExtractionFailed"));
        assert!(entry.content_hash.is_some(), "bytes stay stored");
    }
    assert!(index_ids(&config).is_empty());
    pipeline.close().await;
}

#[tokio::test]
async fn unsupported_format_fails_without_retry() {
    let portal = Portal::new(&["a.txt", "scan.png"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 1);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[&ErrorKind::UnsupportedFormat].count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let scan = pipeline.catalog().get(&doc_id("scan.png")).await.unwrap().unwrap();
    assert_eq!(scan.status, Status::Failed);
    assert_eq!(scan.content_type.as_deref(), Some("image/png"));
    pipeline.close().await;
}

#[tokio::test]
async fn identical_bytes_are_stored_once() {
    let portal = Portal::new(&["copy1.txt", "copy2.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls))).await;
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.extracted, 2);

    let objects: Vec<_> = walkdir::WalkDir::new(&config.pipeline.storage_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    assert_eq!(objects.len(), 1);

    let one = pipeline.catalog().get(&doc_id("copy1.txt")).await.unwrap().unwrap();
    let two = pipeline.catalog().get(&doc_id("copy2.txt")).await.unwrap().unwrap();
    assert_eq!(one.content_hash, two.content_hash);
    assert_eq!(one.storage_path, two.storage_path);
    assert_eq!(index_ids(&config), sorted_ids(&["copy1.txt", "copy2.txt"]));
    pipeline.close().await;
}

#[tokio::test]
async fn cancelled_run_resumes_without_redoing_finished_documents() {
    let portal = Portal::new(&["a.txt", "b.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 1);
    let calls = Arc::new(AtomicUsize::new(0));

    let token = CancellationToken::new();
    let mut engine = Counting::new(&config, calls.clone());
    engine.cancel_after_first = Some(token.clone());
    let first = pipeline_with(&config, Arc::new(engine))
        .await
        .with_cancellation(token);
    let summary = first.run(&RunOptions::default()).await.unwrap();
    first.close().await;

    assert!(summary.cancelled);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.not_started, 1);
    assert_eq!(index_ids(&config), sorted_ids(&["a.txt"]));

    let second = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = second.run(&RunOptions::default()).await.unwrap();

    assert!(!summary.cancelled);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.extracted, 1);
    assert!(summary.is_clean());
    assert_eq!(portal.hits("/docs/a.txt"), 1);
    assert_eq!(portal.hits("/docs/b.txt"), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(index_ids(&config), sorted_ids(&["a.txt", "b.txt"]));
    let b = second.catalog().get(&doc_id("b.txt")).await.unwrap().unwrap();
    assert_eq!(b.status, Status::Extracted);
    second.close().await;
}

#[tokio::test]
async fn limit_leaves_the_rest_pending() {
    let portal = Portal::new(&["a.txt", "b.txt", "d.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls))).await;
    let options = RunOptions {
        limit: Some(1),
        ..RunOptions::default()
    };
    let summary = pipeline.run(&options).await.unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.not_started, 2);
    assert_eq!(pipeline.catalog().worklist(&[]).await.unwrap().len(), 2);
    pipeline.close().await;
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let portal = Portal::new(&["a.txt", "b.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let summary = pipeline.run(&options).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.discovered, 2);
    assert!(pipeline.catalog().entries().await.unwrap().is_empty());
    assert_eq!(portal.document_hits(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!config.index.path.exists());
    pipeline.close().await;
}

#[tokio::test]
async fn corrupt_catalog_refuses_to_run() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, "http://127.0.0.1:9", 1);
    std::fs::write(&config.catalog.path, b"this is not a sqlite database at all").unwrap();

    let err = Pipeline::open(config).await.err().expect("open must fail");
    assert!(
        matches!(
            err.downcast_ref::<HarvestError>(),
            Some(HarvestError::StoreCorrupt(_))
        ),
        "{:#}",
        err
    );
}

#[tokio::test]
async fn fetched_document_resumes_without_downloading_again() {
    let portal = Portal::new(&["a.txt", "b.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 1);
    let calls = Arc::new(AtomicUsize::new(0));

    // b is downloaded, then the run is cancelled before it is extracted.
    let token = CancellationToken::new();
    let first = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone())))
        .await
        .with_downloader(Arc::new(CancelAfterDownload::new(
            &config,
            "b.txt",
            token.clone(),
        )))
        .with_cancellation(token);
    let summary = first.run(&RunOptions::default()).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.interrupted, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let b = first.catalog().get(&doc_id("b.txt")).await.unwrap().unwrap();
    assert_eq!(b.status, Status::Fetched);
    assert!(b.storage_path.as_ref().unwrap().is_file());
    first.close().await;

    let second = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = second.run(&RunOptions::default()).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(portal.hits("/docs/a.txt"), 1);
    assert_eq!(portal.hits("/docs/b.txt"), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let b = second.catalog().get(&doc_id("b.txt")).await.unwrap().unwrap();
    assert_eq!(b.status, Status::Extracted);
    assert_eq!(index_ids(&config), sorted_ids(&["a.txt", "b.txt"]));
    second.close().await;
}

#[tokio::test]
async fn indexed_entry_is_marked_extracted_without_new_work() {
    let portal = Portal::new(&["a.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 1);
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let register_only = RunOptions {
        limit: Some(0),
        ..RunOptions::default()
    };
    let summary = pipeline.run(&register_only).await.unwrap();
    assert_eq!(summary.not_started, 1);

    // The record reached the index but the catalog update did not.
    let mut index = IndexWriter::open(&config.index.path).await.unwrap();
    let record = ExtractedRecord {
        source_id: doc_id("a.txt"),
        source: "portal".into(),
        url: format!("{}/docs/a.txt", base),
        title: Some("Document a.txt".into()),
        text: "text of document a".into(),
        extracted_at: chrono::Utc::now(),
        ocr_confidence: None,
        page_count: None,
        content_hash: "0".repeat(64),
        content_type: "text/plain".into(),
        engine: "native".into(),
    };
    assert!(index.append(&record).await.unwrap());
    drop(index);

    let catalog_only = RunOptions {
        discover: false,
        ..RunOptions::default()
    };
    let summary = pipeline.run(&catalog_only).await.unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(portal.document_hits(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let a = pipeline.catalog().get(&doc_id("a.txt")).await.unwrap().unwrap();
    assert_eq!(a.status, Status::Extracted);
    assert_eq!(index_ids(&config), sorted_ids(&["a.txt"]));
    pipeline.close().await;
}

#[tokio::test]
async fn storage_write_failure_stops_the_run_and_keeps_entries_pending() {
    let portal = Portal::new(&["a.txt", "b.txt", "d.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, &base, 2);
    let calls = Arc::new(AtomicUsize::new(0));
    // Objects cannot be written below a plain file.
    std::fs::write(&config.pipeline.storage_root, b"not a directory").unwrap();

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let err = pipeline.run(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, HarvestError::WriteFailed(_)), "{}", err);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    for id in sorted_ids(&["a.txt", "b.txt", "d.txt"]) {
        let entry = pipeline.catalog().get(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending, "{}", id);
        assert!(entry.error_kind.is_none());
    }
    assert!(index_ids(&config).is_empty());

    std::fs::remove_file(&config.pipeline.storage_root).unwrap();
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.extracted, 3);
    assert!(summary.is_clean());
    pipeline.close().await;
}

#[tokio::test]
async fn oversized_document_is_an_integrity_mismatch_without_retry() {
    let portal = Portal::new(&["a.txt", "big.txt"]);
    let base = serve(portal.clone()).await;
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp, &base, 1);
    config.pipeline.max_download_bytes = 1024;
    let calls = Arc::new(AtomicUsize::new(0));

    let pipeline = pipeline_with(&config, Arc::new(Counting::new(&config, calls.clone()))).await;
    let summary = pipeline.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[&ErrorKind::IntegrityMismatch].count, 1);
    assert_eq!(portal.hits("/docs/big.txt"), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let big = pipeline.catalog().get(&doc_id("big.txt")).await.unwrap().unwrap();
    assert_eq!(big.status, Status::Failed);
    assert_eq!(big.error_kind.as_deref(), Some("IntegrityMismatch"));
    assert!(big.content_hash.is_none());
    pipeline.close().await;
}
