//! Catalog overview for `harvest status`.
//!
//! Counts per source and status, unfinished listings, and optionally the
//! recorded error of every failed entry.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::catalog::{Catalog, StatusCount};
use crate::config::Config;
use crate::models::Status;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SourceRow {
    pending: i64,
    fetched: i64,
    extracted: i64,
    failed: i64,
}

fn rows_by_source(counts: &[StatusCount]) -> BTreeMap<String, SourceRow> {
    let mut rows: BTreeMap<String, SourceRow> = BTreeMap::new();
    for c in counts {
        let row = rows.entry(c.source.clone()).or_default();
        match c.status {
            Status::Pending => row.pending += c.count,
            Status::Fetched => row.fetched += c.count,
            Status::Extracted => row.extracted += c.count,
            Status::Failed => row.failed += c.count,
        }
    }
    rows
}

pub async fn run_status(config: &Config, show_failed: bool) -> Result<()> {
    let catalog = Catalog::open(&config.catalog.path).await?;
    let counts = catalog.counts().await?;
    let checkpoints = catalog.checkpoints().await?;

    let catalog_size = std::fs::metadata(&config.catalog.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let index_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("doc-harvest status");
    println!("==================");
    println!();
    println!(
        "  Catalog:  {} ({})",
        config.catalog.path.display(),
        format_bytes(catalog_size)
    );
    println!(
        "  Index:    {} ({})",
        config.index.path.display(),
        format_bytes(index_size)
    );
    println!("  Objects:  {}", config.pipeline.storage_root.display());

    let rows = rows_by_source(&counts);
    if rows.is_empty() {
        println!();
        println!("  Catalog is empty. Run `harvest run` to discover documents.");
    } else {
        println!();
        println!(
            "  {:<20} {:>8} {:>8} {:>10} {:>7}   {}",
            "SOURCE", "PENDING", "FETCHED", "EXTRACTED", "FAILED", "LISTING"
        );
        println!("  {}", "-".repeat(78));
        let mut total = SourceRow::default();
        for (source, row) in &rows {
            let listing = checkpoints
                .iter()
                .find(|(s, _, _)| s == source)
                .map(|(_, page, ts)| format!("paused at page {} ({})", page, format_ts_relative(*ts)))
                .unwrap_or_else(|| "complete".to_string());
            println!(
                "  {:<20} {:>8} {:>8} {:>10} {:>7}   {}",
                source, row.pending, row.fetched, row.extracted, row.failed, listing
            );
            total.pending += row.pending;
            total.fetched += row.fetched;
            total.extracted += row.extracted;
            total.failed += row.failed;
        }
        println!("  {}", "-".repeat(78));
        println!(
            "  {:<20} {:>8} {:>8} {:>10} {:>7}",
            "total", total.pending, total.fetched, total.extracted, total.failed
        );
    }

    if show_failed {
        let failed: Vec<_> = catalog
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.status == Status::Failed)
            .collect();
        println!();
        println!("  Failed entries: {}", failed.len());
        for entry in failed {
            println!(
                "    {}  [{}] after {} attempt{}, {}",
                entry.source_id,
                entry.error_kind.as_deref().unwrap_or("unknown"),
                entry.attempts,
                if entry.attempts == 1 { "" } else { "s" },
                format_ts_relative(entry.updated_at)
            );
            if let Some(err) = &entry.last_error {
                println!("      {}", err);
            }
        }
    }
    println!();

    catalog.close().await;
    Ok(())
}

/// `harvest requeue`: drop failed entries so the next run rediscovers them.
pub async fn run_requeue(config: &Config, selector: &str) -> Result<()> {
    let sources = if selector == "all" {
        Vec::new()
    } else {
        config.select_sources(selector)?
    };
    let catalog = Catalog::open(&config.catalog.path).await?;
    let removed = catalog.requeue_failed(&sources).await?;
    catalog.close().await;
    println!(
        "requeued {} failed entr{}",
        removed,
        if removed == 1 { "y" } else { "ies" }
    );
    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago", or a date once it is more than a month old.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let (n, unit) = match delta {
        d if d < 0 => return format_ts_iso(ts),
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d if d < 86400 * 30 => (d / 86400, "day"),
        _ => return format_ts_iso(ts),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
