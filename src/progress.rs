//! Run progress reporting.
//!
//! Progress goes to **stderr** so the run summary on stdout stays
//! parseable. Three renderings: human lines, one JSON object per line, or
//! nothing.

use std::io::Write;
use std::sync::Arc;

/// A single progress event of `harvest run`.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Listing for this source has started (total unknown).
    Discovering { source: String },
    /// One listing page was read.
    Listed {
        source: String,
        page: u32,
        found: u64,
        new: u64,
    },
    /// A document finished its run: `n` of `total` done.
    Processed {
        source_id: String,
        outcome: &'static str,
        n: u64,
        total: u64,
    },
}

pub trait RunProgress: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// `harvest gosi  page 3  12 found, 4 new`
pub struct StderrProgress;

impl RunProgress for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { source } => format!("harvest {}  discovering...\n", source),
            ProgressEvent::Listed {
                source,
                page,
                found,
                new,
            } => format!(
                "harvest {}  page {}  {} found, {} new\n",
                source,
                page,
                format_number(*found),
                format_number(*new)
            ),
            ProgressEvent::Processed {
                source_id,
                outcome,
                n,
                total,
            } => format!(
                "harvest  {} / {}  {:<9}  {}\n",
                format_number(*n),
                format_number(*total),
                outcome,
                source_id
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

pub struct JsonProgress;

impl RunProgress for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "source": source,
            }),
            ProgressEvent::Listed {
                source,
                page,
                found,
                new,
            } => serde_json::json!({
                "event": "progress",
                "phase": "listing",
                "source": source,
                "page": page,
                "found": found,
                "new": new,
            }),
            ProgressEvent::Processed {
                source_id,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "source_id": source_id,
                "outcome": outcome,
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl RunProgress for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Arc<dyn RunProgress> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
