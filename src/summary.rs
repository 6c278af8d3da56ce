//! End-of-run summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ErrorKind, HarvestError};

/// Failures of one error kind: total count and the first few messages.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct KindErrors {
    pub count: usize,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// References registered for the first time by this run.
    pub discovered: usize,
    /// Listed references that were already extracted or failed.
    pub skipped: usize,
    pub extracted: usize,
    pub failed: usize,
    /// Worklist entries left untouched (cancellation or `--limit`).
    pub not_started: usize,
    /// Entries that finished a stage but stopped before the next one.
    pub interrupted: usize,
    pub cancelled: bool,
    pub errors: BTreeMap<ErrorKind, KindErrors>,
    /// Sources whose listing failed; their pending entries still ran.
    pub source_errors: BTreeMap<String, String>,
    #[serde(skip)]
    error_limit: usize,
}

impl RunSummary {
    pub fn new(error_limit: usize, dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            discovered: 0,
            skipped: 0,
            extracted: 0,
            failed: 0,
            not_started: 0,
            interrupted: 0,
            cancelled: false,
            errors: BTreeMap::new(),
            source_errors: BTreeMap::new(),
            error_limit,
        }
    }

    fn record_error(&mut self, source_id: &str, err: &HarvestError) {
        let limit = self.error_limit;
        let entry = self.errors.entry(err.kind()).or_default();
        entry.count += 1;
        if entry.messages.len() < limit {
            entry.messages.push(format!("{}: {}", source_id, err));
        }
    }

    /// A document ended `failed`.
    pub fn record_failure(&mut self, source_id: &str, err: &HarvestError) {
        self.failed += 1;
        self.record_error(source_id, err);
    }

    /// A listing gave up; the run continues with other sources.
    pub fn record_source_error(&mut self, source: &str, err: &HarvestError) {
        self.source_errors.insert(source.to_string(), err.to_string());
        self.record_error(source, err);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when nothing failed and every worklist entry ran.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
            && self.source_errors.is_empty()
            && self.not_started == 0
            && self.interrupted == 0
    }

    pub fn print(&self) {
        let elapsed = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();

        println!(
            "run {}{}",
            self.run_id,
            if self.dry_run { " (dry run)" } else { "" }
        );
        println!("  discovered:  {}", self.discovered);
        println!("  skipped:     {}", self.skipped);
        println!("  extracted:   {}", self.extracted);
        println!("  failed:      {}", self.failed);
        println!("  not started: {}", self.not_started + self.interrupted);
        if self.cancelled {
            println!("  cancelled:   yes");
        }
        println!("  elapsed:     {:.1}s", elapsed);

        if !self.errors.is_empty() {
            println!();
            println!("  errors:");
            for (kind, errors) in &self.errors {
                println!("    {} ({})", kind, errors.count);
                for message in &errors.messages {
                    println!("      - {}", message);
                }
                if errors.count > errors.messages.len() {
                    println!("      ... {} more", errors.count - errors.messages.len());
                }
            }
        }
        println!(
            "{}",
            if self.is_clean() { "ok" } else { "done with errors" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_first_messages_per_kind() {
        let mut summary = RunSummary::new(2, false);
        for i in 0..4 {
            summary.record_failure(
                &format!("s:{}", i),
                &HarvestError::DownloadFailed("HTTP 500".into()),
            );
        }
        summary.record_failure("s:x", &HarvestError::UnsupportedFormat("image/png".into()));

        assert_eq!(summary.failed, 5);
        let downloads = &summary.errors[&ErrorKind::DownloadFailed];
        assert_eq!(downloads.count, 4);
        assert_eq!(
            downloads.messages,
            vec!["s:0: download failed: HTTP 500", "s:1: download failed: HTTP 500"]
        );
        assert_eq!(summary.errors[&ErrorKind::UnsupportedFormat].count, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn source_errors_do_not_count_as_document_failures() {
        let mut summary = RunSummary::new(5, false);
        summary.record_source_error(
            "gosi",
            &HarvestError::SourceUnavailable {
                name: "gosi".into(),
                message: "HTTP 503".into(),
            },
        );
        assert_eq!(summary.failed, 0);
        assert!(summary.source_errors.contains_key("gosi"));
        assert!(!summary.is_clean());
    }
}
