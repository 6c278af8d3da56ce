//! `harvest pages`: page counts for the PDFs in a folder.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::pdf_page_count;

#[derive(Debug)]
pub struct PageCount {
    /// Path relative to the scanned folder.
    pub path: PathBuf,
    pub pages: Result<u32, String>,
}

fn pdf_matcher() -> Result<GlobMatcher> {
    Ok(GlobBuilder::new("*.pdf")
        .case_insensitive(true)
        .build()?
        .compile_matcher())
}

/// Count pages of every `*.pdf` under `root`, sorted by path.
/// Only the top level is scanned unless `recursive` is set.
pub fn count_pages(root: &Path, recursive: bool) -> Result<Vec<PageCount>> {
    if !root.exists() {
        bail!("Folder '{}' does not exist.", root.display());
    }
    if !root.is_dir() {
        bail!("'{}' is not a folder.", root.display());
    }

    let mut walker = WalkDir::new(root).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let matcher = pdf_matcher()?;
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && matcher.is_match(e.file_name()))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .map(|path| {
            let pages = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| pdf_page_count(&bytes).map_err(|e| e.to_string()));
            let rel = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or(path);
            PageCount { path: rel, pages }
        })
        .collect())
}

pub fn run_pages(folder: &Path, recursive: bool) -> Result<()> {
    let counts = count_pages(folder, recursive)?;
    if counts.is_empty() {
        eprintln!("No PDF files found.");
        return Ok(());
    }

    let mut total = 0u64;
    for count in &counts {
        match &count.pages {
            Ok(n) => {
                println!("{}: {}", count.path.display(), n);
                total += u64::from(*n);
            }
            Err(e) => eprintln!("{}: ERROR ({})", count.path.display(), e),
        }
    }
    println!("Total pages: {}", total);
    Ok(())
}
