//! Orchestrator: discovery, then a bounded pool of document workers.
//!
//! A run has two phases.
//!
//! 1. **Discovery.** Each selected source is listed page by page. New
//!    references are registered in the catalog as `pending`, and the
//!    listing cursor is checkpointed after every page so an interrupted
//!    listing resumes where it stopped.
//! 2. **Processing.** Every non-terminal catalog entry of the selected
//!    sources runs end-to-end in one task: download (skipped when a
//!    `fetched` entry's object is still on disk), extract, append to the
//!    index, mark `extracted`. At most `worker_count` tasks run at once.
//!
//! Error policy per [`ErrorClass`](crate::error::ErrorClass): transient
//! errors are retried with backoff and then recorded as `failed`,
//! structural errors are recorded at once, fatal errors stop the run.
//!
//! Cancellation stops new documents from starting. Documents already in
//! flight finish the stage they are in and keep their persisted status, so
//! the next run picks them up.

use anyhow::bail;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::downloader::{Download, HttpDownloader};
use crate::error::{HarvestError, Result};
use crate::fetcher::{http_client, listing_for, unavailable, Fetcher};
use crate::index::IndexWriter;
use crate::models::{CatalogEntry, Status, StoredDocument};
use crate::ocr::{engine_from_config, Extractor, OcrEngine};
use crate::progress::{NoProgress, ProgressEvent, ProgressMode, RunProgress};
use crate::retry::RetryPolicy;
use crate::storage::ObjectStore;
use crate::summary::RunSummary;

/// What one call to [`Pipeline::run`] should do.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Source names; empty means every configured source.
    pub sources: Vec<String>,
    /// Process at most this many worklist entries.
    pub limit: Option<usize>,
    /// List sources and report what is new without changing anything.
    pub dry_run: bool,
    /// List sources before processing. `false` only works off the catalog.
    pub discover: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            limit: None,
            dry_run: false,
            discover: true,
        }
    }
}

pub struct Pipeline {
    config: Config,
    catalog: Arc<Catalog>,
    client: reqwest::Client,
    downloader: Arc<dyn Download>,
    extractor: Extractor,
    retry: RetryPolicy,
    progress: Arc<dyn RunProgress>,
    cancel: CancellationToken,
}

enum Outcome {
    Extracted,
    Failed(HarvestError),
    /// Stopped between stages after cancellation.
    Interrupted,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Extracted => "extracted",
            Outcome::Failed(_) => "failed",
            Outcome::Interrupted => "stopped",
        }
    }
}

impl Pipeline {
    /// Open the catalog and build the default HTTP downloader and OCR
    /// engine from `config`.
    ///
    /// Fails with [`HarvestError::StoreCorrupt`] (inside the `anyhow`
    /// error) when the catalog cannot be trusted.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let catalog = Arc::new(Catalog::open(&config.catalog.path).await?);
        let store = Arc::new(ObjectStore::new(&config.pipeline.storage_root));
        let client = http_client(&config.pipeline)?;
        let downloader = Arc::new(HttpDownloader::new(
            client.clone(),
            store.clone(),
            config.pipeline.max_download_bytes,
        ));
        let extractor = Extractor::new(engine_from_config(&config, store), config.pipeline.timeout());

        Ok(Self {
            retry: RetryPolicy::from_config(&config.pipeline),
            config,
            catalog,
            client,
            downloader,
            extractor,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Download>) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.extractor = Extractor::new(engine, self.config.pipeline.timeout());
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn RunProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn close(&self) {
        self.catalog.close().await;
    }

    /// Run discovery and processing once.
    ///
    /// Per-document failures end up in the summary. `Err` is returned only
    /// for fatal errors, after in-flight documents have finished.
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.config.pipeline.summary_error_limit, options.dry_run);
        let sources: Vec<String> = if options.sources.is_empty() {
            self.config.sources.keys().cloned().collect()
        } else {
            options.sources.clone()
        };
        info!(
            run_id = %summary.run_id,
            sources = %sources.join(","),
            engine = self.extractor.engine_name(),
            dry_run = options.dry_run,
            "run started"
        );

        if options.discover {
            for source in &sources {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.discover(source, options.dry_run, &mut summary).await?;
            }
        }

        if !options.dry_run {
            let mut worklist = self.catalog.worklist(&sources).await?;
            if let Some(limit) = options.limit {
                if worklist.len() > limit {
                    summary.not_started += worklist.len() - limit;
                    worklist.truncate(limit);
                }
            }
            self.process(worklist, &mut summary).await?;
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.finish();
        info!(
            run_id = %summary.run_id,
            extracted = summary.extracted,
            failed = summary.failed,
            not_started = summary.not_started + summary.interrupted,
            "run finished"
        );
        Ok(summary)
    }

    async fn discover(&self, source: &str, dry_run: bool, summary: &mut RunSummary) -> Result<()> {
        let Some(source_config) = self.config.sources.get(source) else {
            let err = unavailable(source, "not configured");
            summary.record_source_error(source, &err);
            return Ok(());
        };
        self.progress.report(ProgressEvent::Discovering {
            source: source.to_string(),
        });

        let resume = if dry_run {
            None
        } else {
            self.catalog.get_checkpoint(source).await?
        };
        if let Some(page) = resume {
            info!(source, page, "resuming unfinished listing");
        }
        let listing = listing_for(source, source_config, self.client.clone());
        let mut fetcher = Fetcher::new(listing, self.retry, resume);

        while !self.cancel.is_cancelled() {
            let page = fetcher.cursor().unwrap_or_default();
            let batch = match fetcher.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(source, page, error = %e, "listing abandoned");
                    summary.record_source_error(source, &e);
                    break;
                }
            };

            let mut new = 0;
            for reference in &batch {
                if dry_run {
                    match self.catalog.get(&reference.source_id).await? {
                        None => {
                            new += 1;
                            debug!(source_id = %reference.source_id, url = %reference.url, "would register");
                        }
                        Some(entry) if entry.status.is_terminal() => summary.skipped += 1,
                        Some(_) => {}
                    }
                } else if self.catalog.register(reference).await? {
                    new += 1;
                } else if self.catalog.has(&reference.source_id).await? {
                    summary.skipped += 1;
                }
            }
            summary.discovered += new;
            self.progress.report(ProgressEvent::Listed {
                source: source.to_string(),
                page,
                found: batch.len() as u64,
                new: new as u64,
            });

            if !dry_run {
                match fetcher.cursor() {
                    Some(next) => self.catalog.set_checkpoint(source, next).await?,
                    None => self.catalog.clear_checkpoint(source).await?,
                }
            }
        }
        Ok(())
    }

    async fn process(&self, worklist: Vec<CatalogEntry>, summary: &mut RunSummary) -> Result<()> {
        let total = worklist.len() as u64;
        if total == 0 {
            return Ok(());
        }

        let index = IndexWriter::open(&self.config.index.path).await?;
        let worker = Arc::new(Worker {
            catalog: self.catalog.clone(),
            downloader: self.downloader.clone(),
            extractor: self.extractor.clone(),
            index: Mutex::new(index),
            retry: self.retry,
            cancel: self.cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.worker_count));
        let mut tasks: JoinSet<(String, Result<Outcome>)> = JoinSet::new();
        let mut tally = Tally {
            done: 0,
            total,
            fatal: None,
        };

        let mut queue = worklist.into_iter();
        loop {
            while let Some(joined) = tasks.try_join_next() {
                self.settle(joined, summary, &mut tally);
            }
            if tally.fatal.is_some() || self.cancel.is_cancelled() {
                break;
            }
            let Some(entry) = queue.next() else {
                break;
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.not_started += 1;
                break;
            };

            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let source_id = entry.source_id.clone();
                let outcome = worker.run(entry).await;
                (source_id, outcome)
            });
        }

        let remaining = queue.len();
        if remaining > 0 {
            info!(remaining, "not starting remaining documents");
            summary.not_started += remaining;
        }
        while let Some(joined) = tasks.join_next().await {
            self.settle(joined, summary, &mut tally);
        }

        match tally.fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn settle(
        &self,
        joined: std::result::Result<(String, Result<Outcome>), JoinError>,
        summary: &mut RunSummary,
        tally: &mut Tally,
    ) {
        let (source_id, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "document task panicked");
                summary.interrupted += 1;
                return;
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(source_id = %source_id, error = %e, "fatal error, stopping run");
                summary.interrupted += 1;
                if tally.fatal.is_none() {
                    tally.fatal = Some(e);
                }
                return;
            }
        };

        tally.done += 1;
        self.progress.report(ProgressEvent::Processed {
            source_id: source_id.clone(),
            outcome: outcome.label(),
            n: tally.done,
            total: tally.total,
        });
        match outcome {
            Outcome::Extracted => summary.extracted += 1,
            Outcome::Failed(e) => summary.record_failure(&source_id, &e),
            Outcome::Interrupted => summary.interrupted += 1,
        }
    }
}

struct Tally {
    done: u64,
    total: u64,
    fatal: Option<HarvestError>,
}

/// State shared by document tasks.
struct Worker {
    catalog: Arc<Catalog>,
    downloader: Arc<dyn Download>,
    extractor: Extractor,
    index: Mutex<IndexWriter>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Worker {
    /// Drive one entry as far as it goes. `Err` means a fatal error.
    async fn run(&self, entry: CatalogEntry) -> Result<Outcome> {
        let source_id = entry.source_id.clone();

        // A crash between the index append and the catalog update leaves
        // the record written but the entry behind.
        if self.index.lock().await.contains(&source_id) {
            self.catalog.mark_extracted(&source_id, 0).await?;
            return Ok(Outcome::Extracted);
        }

        let doc = match self.stored_object(&entry) {
            Some(doc) => {
                debug!(source_id = %source_id, "object already stored, skipping download");
                doc
            }
            None => {
                let reference = entry.reference();
                let label = format!("download {}", source_id);
                let attempted = self
                    .retry
                    .run(&label, |_| self.downloader.fetch(&reference))
                    .await;
                match attempted.result {
                    Ok(doc) => {
                        self.catalog.mark_fetched(&doc, attempted.attempts).await?;
                        doc
                    }
                    Err(e) => return self.fail(&source_id, e, attempted.attempts).await,
                }
            }
        };

        if self.cancel.is_cancelled() {
            return Ok(Outcome::Interrupted);
        }

        let label = format!("extract {}", source_id);
        let attempted = self
            .retry
            .run(&label, |_| self.extractor.extract(&doc))
            .await;
        let record = match attempted.result {
            Ok(record) => record,
            Err(e) => return self.fail(&source_id, e, attempted.attempts).await,
        };

        self.index.lock().await.append(&record).await?;
        self.catalog
            .mark_extracted(&source_id, attempted.attempts)
            .await?;
        info!(
            source_id = %source_id,
            chars = record.text.chars().count(),
            pages = record.page_count.unwrap_or_default(),
            engine = %record.engine,
            "extracted"
        );
        Ok(Outcome::Extracted)
    }

    /// The stored object of a `fetched` entry, if it is still on disk.
    fn stored_object(&self, entry: &CatalogEntry) -> Option<StoredDocument> {
        if entry.status != Status::Fetched {
            return None;
        }
        entry
            .stored_document()
            .filter(|doc| doc.storage_path.is_file())
    }

    async fn fail(&self, source_id: &str, err: HarvestError, attempts: u32) -> Result<Outcome> {
        if err.is_fatal() {
            return Err(err);
        }
        warn!(
            source_id,
            kind = %err.kind(),
            attempts,
            error = %err,
            "document failed"
        );
        self.catalog.mark_failed(source_id, &err, attempts).await?;
        Ok(Outcome::Failed(err))
    }
}

/// `harvest run`: resolve sources, wire Ctrl-C to cancellation, print the
/// summary.
pub async fn run_harvest(
    config: &Config,
    selector: &str,
    options: RunOptions,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let sources = config.select_sources(selector)?;
    if sources.is_empty() {
        bail!("No sources configured. Add a [sources.<name>] table to the config.");
    }

    let pipeline = Pipeline::open(config.clone())
        .await?
        .with_progress(progress.reporter());

    let token = pipeline.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight documents");
            token.cancel();
        }
    });

    let result = pipeline
        .run(&RunOptions {
            sources,
            ..options
        })
        .await;
    interrupt.abort();
    pipeline.close().await;

    match result {
        Ok(summary) => {
            summary.print();
            Ok(())
        }
        Err(e) => bail!("run aborted: {}", e),
    }
}
