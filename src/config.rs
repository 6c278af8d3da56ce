use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_summary_error_limit")]
    pub summary_error_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
            worker_count: default_worker_count(),
            storage_root: default_storage_root(),
            backoff_base_ms: default_backoff_base_ms(),
            max_download_bytes: default_max_download_bytes(),
            user_agent: default_user_agent(),
            summary_error_limit: default_summary_error_limit(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_worker_count() -> usize {
    4
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_download_bytes() -> u64 {
    200 * 1024 * 1024
}
fn default_user_agent() -> String {
    format!("doc-harvest/{}", env!("CARGO_PKG_VERSION"))
}
fn default_summary_error_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `native`, `command`, or `auto` (native with command fallback).
    #[serde(default = "default_engine")]
    pub engine: String,
    /// External OCR argv; `{input}` is replaced with the stored object path.
    #[serde(default)]
    pub command: Vec<String>,
    /// `text` (stdout is the text) or `json` (`{"text": .., "confidence": ..}`).
    #[serde(default = "default_ocr_output")]
    pub output: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            command: Vec::new(),
            output: default_ocr_output(),
        }
    }
}

fn default_engine() -> String {
    "native".to_string()
}
fn default_ocr_output() -> String {
    "text".to_string()
}

/// One `[sources.<name>]` table.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Html(HtmlSourceConfig),
    Json(JsonSourceConfig),
    Manifest(ManifestSourceConfig),
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Html(_) => "html",
            SourceConfig::Json(_) => "json",
            SourceConfig::Manifest(_) => "manifest",
        }
    }

    pub fn html_rules(&self) -> &HtmlRules {
        match self {
            SourceConfig::Html(c) => &c.html,
            SourceConfig::Json(c) => &c.html,
            SourceConfig::Manifest(c) => &c.html,
        }
    }

    /// URL or file path the listing reads from, for display.
    pub fn location(&self) -> String {
        match self {
            SourceConfig::Html(c) => c.url.clone(),
            SourceConfig::Json(c) => c.url.clone(),
            SourceConfig::Manifest(c) => c.path.display().to_string(),
        }
    }
}

/// Listing page(s) scraped for document links.
#[derive(Debug, Deserialize, Clone)]
pub struct HtmlSourceConfig {
    pub url: String,
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    /// Element attribute holding a stable document id (falls back to the URL).
    #[serde(default)]
    pub id_attribute: Option<String>,
    /// Link texts that are navigation rather than documents.
    #[serde(default)]
    pub exclude_titles: Vec<String>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub html: HtmlRules,
}

fn default_link_selector() -> String {
    "a[href$='.pdf'], a[href$='.docx']".to_string()
}

/// JSON listing endpoint (e.g. a WordPress `admin-ajax.php` action).
#[derive(Debug, Deserialize, Clone)]
pub struct JsonSourceConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Form fields sent as `application/x-www-form-urlencoded` on POST.
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    /// JSON pointer to the array of items in the response.
    #[serde(default = "default_items_pointer")]
    pub items_pointer: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_url_field")]
    pub url_field: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub html: HtmlRules,
}

fn default_items_pointer() -> String {
    "/data".to_string()
}
fn default_id_field() -> String {
    "id".to_string()
}
fn default_url_field() -> String {
    "url".to_string()
}
fn default_title_field() -> String {
    "title".to_string()
}

/// Local JSON file of `{id, name, url}` entries saved by an earlier crawl.
#[derive(Debug, Deserialize, Clone)]
pub struct ManifestSourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub html: HtmlRules,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Page-number pagination driven by a query (GET) or form (POST) parameter.
#[derive(Debug, Deserialize, Clone)]
pub struct Pagination {
    pub param: String,
    #[serde(default = "default_start_page")]
    pub start: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_start_page() -> u32 {
    1
}
fn default_max_pages() -> u32 {
    50
}

/// How to reduce a downloaded HTML page to its document text.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HtmlRules {
    /// Container holding the document body; the whole `<body>` when unset.
    #[serde(default)]
    pub content_selector: Option<String>,
    /// Element whose text becomes the record title.
    #[serde(default)]
    pub title_selector: Option<String>,
    /// Elements removed from the content before text is collected.
    #[serde(default)]
    pub strip_selectors: Vec<String>,
}

impl PipelineConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Resolve a source specifier (`all` or a configured name).
    pub fn select_sources(&self, selector: &str) -> Result<Vec<String>> {
        if selector == "all" {
            return Ok(self.sources.keys().cloned().collect());
        }
        if self.sources.contains_key(selector) {
            return Ok(vec![selector.to_string()]);
        }
        let available: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        bail!(
            "Unknown source: '{}'. Available: all, {}",
            selector,
            available.join(", ")
        )
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate pipeline
    if config.pipeline.worker_count == 0 {
        bail!("pipeline.worker_count must be >= 1");
    }
    if config.pipeline.timeout_seconds == 0 {
        bail!("pipeline.timeout_seconds must be >= 1");
    }
    if config.pipeline.max_download_bytes == 0 {
        bail!("pipeline.max_download_bytes must be > 0");
    }

    // Validate OCR
    match config.ocr.engine.as_str() {
        "native" | "auto" => {}
        "command" => {
            if config.ocr.command.is_empty() {
                bail!("ocr.command must be specified when engine is 'command'");
            }
        }
        other => bail!(
            "Unknown OCR engine: '{}'. Must be native, command, or auto.",
            other
        ),
    }
    match config.ocr.output.as_str() {
        "text" | "json" => {}
        other => bail!("Unknown ocr.output: '{}'. Must be text or json.", other),
    }

    // Validate sources
    for (name, source) in &config.sources {
        if name.is_empty() || name.contains(':') {
            bail!("source name '{}' must be non-empty and contain no ':'", name);
        }
        match source {
            SourceConfig::Html(c) => {
                check_url(name, &c.url)?;
                check_selector(name, "link_selector", &c.link_selector)?;
                check_pagination(name, c.pagination.as_ref())?;
            }
            SourceConfig::Json(c) => {
                check_url(name, &c.url)?;
                if !c.items_pointer.is_empty() && !c.items_pointer.starts_with('/') {
                    bail!(
                        "sources.{}.items_pointer must be a JSON pointer starting with '/'",
                        name
                    );
                }
                check_pagination(name, c.pagination.as_ref())?;
            }
            SourceConfig::Manifest(_) => {}
        }
        let rules = source.html_rules();
        if let Some(sel) = &rules.content_selector {
            check_selector(name, "html.content_selector", sel)?;
        }
        if let Some(sel) = &rules.title_selector {
            check_selector(name, "html.title_selector", sel)?;
        }
        for sel in &rules.strip_selectors {
            check_selector(name, "html.strip_selectors", sel)?;
        }
    }

    Ok(config)
}

fn check_url(name: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .with_context(|| format!("sources.{}.url is not a valid URL: {}", name, raw))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("sources.{}.url must be http or https", name);
    }
    Ok(())
}

fn check_selector(name: &str, field: &str, selector: &str) -> Result<()> {
    if scraper::Selector::parse(selector).is_err() {
        bail!("sources.{}.{} is not a valid CSS selector: {}", name, field, selector);
    }
    Ok(())
}

fn check_pagination(name: &str, pagination: Option<&Pagination>) -> Result<()> {
    if let Some(p) = pagination {
        if p.param.is_empty() {
            bail!("sources.{}.pagination.param must not be empty", name);
        }
        if p.max_pages == 0 {
            bail!("sources.{}.pagination.max_pages must be >= 1", name);
        }
    }
    Ok(())
}
