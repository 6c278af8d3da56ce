//! Export the extracted-text index.
//!
//! `json` writes every record as one pretty-printed array, to a file or to
//! stdout for piping. `docx` writes one right-to-left Word document per
//! record, named after the document title.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::docx;
use crate::fetcher::sanitize_component;
use crate::index::read_index;
use crate::models::ExtractedRecord;

#[derive(Serialize)]
struct ExportData<'a> {
    exported_at: chrono::DateTime<chrono::Utc>,
    count: usize,
    records: &'a [ExtractedRecord],
}

/// Export the index as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout.
pub async fn run_export_json(config: &Config, output: Option<&Path>) -> Result<()> {
    let records = read_index(&config.index.path)?;
    let data = ExportData {
        exported_at: chrono::Utc::now(),
        count: records.len(),
        records: &records,
    };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} records to {}", records.len(), path.display());
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}

/// File stem for a record: title (or local id) with path separators
/// turned into dashes and Latin colons into Arabic commas.
pub fn docx_file_stem(record: &ExtractedRecord) -> String {
    let raw = record.title.as_deref().unwrap_or_else(|| {
        record
            .source_id
            .split_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&record.source_id)
    });
    let stem = sanitize_component(&raw.replace('/', "-").replace(':', "،"));
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

fn unique_path(out_dir: &Path, stem: &str, taken: &mut HashSet<String>) -> PathBuf {
    let mut name = stem.to_string();
    let mut n = 2;
    while taken.contains(&name) || out_dir.join(format!("{}.docx", name)).exists() {
        name = format!("{} ({})", stem, n);
        n += 1;
    }
    taken.insert(name.clone());
    out_dir.join(format!("{}.docx", name))
}

/// Write one RTL `.docx` per index record into `out_dir`.
pub async fn run_export_docx(config: &Config, out_dir: &Path) -> Result<()> {
    let records = read_index(&config.index.path)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut taken = HashSet::new();
    let mut written = 0usize;
    for record in &records {
        let stem = docx_file_stem(record);
        let path = unique_path(out_dir, &stem, &mut taken);
        let title = record.title.as_deref().unwrap_or(&stem);
        match docx::write_rtl_docx(&path, title, &record.text) {
            Ok(()) => {
                written += 1;
                tracing::debug!(source_id = %record.source_id, path = %path.display(), "docx written");
            }
            Err(e) => eprintln!("{}: ERROR ({:#})", record.source_id, e),
        }
    }

    println!(
        "Exported {} of {} records to {}",
        written,
        records.len(),
        out_dir.display()
    );
    Ok(())
}
