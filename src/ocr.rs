//! OCR / extraction adapter.
//!
//! Maps a [`StoredDocument`] to an engine call and the engine's output to an
//! [`ExtractedRecord`]. Engines sit behind the [`OcrEngine`] trait:
//!
//! | `ocr.engine` | Engine |
//! |--------------|--------|
//! | `native` | [`NativeEngine`]: text layer of PDF/Office/HTML/plain text |
//! | `command` | [`CommandEngine`]: external executable, e.g. `tesseract {input} stdout` |
//! | `auto` | [`AutoEngine`]: native, then the command for scans and unknown formats |
//!
//! Every invocation runs under the pipeline timeout; an engine that does not
//! answer in time is an [`HarvestError::ExtractionFailed`].

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, HtmlRules, OcrConfig};
use crate::error::{HarvestError, Result};
use crate::extract::{extract_text, is_supported};
use crate::models::{ExtractedRecord, StoredDocument};
use crate::storage::ObjectStore;

/// Raw engine result before it becomes a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    pub confidence: Option<f64>,
    pub page_count: Option<u32>,
    pub title: Option<String>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine label stored in each record.
    fn name(&self) -> &str;

    async fn recognize(&self, doc: &StoredDocument) -> Result<EngineOutput>;
}

// ═══════════════════════════════════════════════════════════════════════
// Native text-layer engine
// ═══════════════════════════════════════════════════════════════════════

pub struct NativeEngine {
    store: Arc<ObjectStore>,
    rules: HashMap<String, HtmlRules>,
}

impl NativeEngine {
    /// `rules` maps a source name to its HTML reduction rules.
    pub fn new(store: Arc<ObjectStore>, rules: HashMap<String, HtmlRules>) -> Self {
        Self { store, rules }
    }
}

#[async_trait]
impl OcrEngine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    async fn recognize(&self, doc: &StoredDocument) -> Result<EngineOutput> {
        let bytes = self
            .store
            .read_verified(&doc.storage_path, &doc.content_hash)
            .await?;
        let content_type = doc.content_type.clone();
        let rules = self.rules.get(&doc.source).cloned().unwrap_or_default();

        let extracted = tokio::task::spawn_blocking(move || {
            extract_text(&bytes, &content_type, &rules)
        })
        .await
        .map_err(|e| HarvestError::ExtractionFailed(format!("native extractor crashed: {}", e)))??;

        Ok(EngineOutput {
            text: extracted.text,
            confidence: None,
            page_count: extracted.page_count,
            title: extracted.title,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// External command engine
// ═══════════════════════════════════════════════════════════════════════

/// How to read the command's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutput {
    Text,
    Json,
}

#[derive(Deserialize)]
struct JsonOcrOutput {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    page_count: Option<u32>,
}

/// Runs an OCR executable once per document.
///
/// `{input}` in any argument is replaced by the stored object path; when no
/// argument contains it, the path is appended. The process is killed if the
/// adapter's timeout drops the call.
pub struct CommandEngine {
    argv: Vec<String>,
    output: CommandOutput,
}

impl CommandEngine {
    pub fn new(argv: Vec<String>, output: CommandOutput) -> Self {
        Self { argv, output }
    }

    fn command_line(&self, input: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .argv
            .iter()
            .map(|a| a.replace("{input}", input))
            .collect();
        if !self.argv.iter().any(|a| a.contains("{input}")) {
            args.push(input.to_string());
        }
        args
    }
}

#[async_trait]
impl OcrEngine for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    async fn recognize(&self, doc: &StoredDocument) -> Result<EngineOutput> {
        let input = doc.storage_path.to_string_lossy();
        let args = self.command_line(&input);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| HarvestError::ExtractionFailed("ocr.command is empty".to_string()))?;

        let output = tokio::process::Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HarvestError::ExtractionFailed(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarvestError::ExtractionFailed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match self.output {
            CommandOutput::Text => Ok(EngineOutput {
                text: stdout.trim().to_string(),
                ..Default::default()
            }),
            CommandOutput::Json => {
                let parsed: JsonOcrOutput = serde_json::from_str(stdout.trim()).map_err(|e| {
                    HarvestError::ExtractionFailed(format!("{} printed invalid JSON: {}", program, e))
                })?;
                Ok(EngineOutput {
                    text: parsed.text.trim().to_string(),
                    confidence: parsed.confidence,
                    page_count: parsed.page_count,
                    title: None,
                })
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Native with command fallback
// ═══════════════════════════════════════════════════════════════════════

pub struct AutoEngine {
    native: NativeEngine,
    fallback: Option<CommandEngine>,
}

impl AutoEngine {
    pub fn new(native: NativeEngine, fallback: Option<CommandEngine>) -> Self {
        Self { native, fallback }
    }
}

#[async_trait]
impl OcrEngine for AutoEngine {
    fn name(&self) -> &str {
        "auto"
    }

    async fn recognize(&self, doc: &StoredDocument) -> Result<EngineOutput> {
        let Some(fallback) = &self.fallback else {
            return self.native.recognize(doc).await;
        };
        if !is_supported(&doc.content_type) {
            debug!(source_id = %doc.source_id, content_type = %doc.content_type, "no native extractor, running OCR command");
            return fallback.recognize(doc).await;
        }

        match self.native.recognize(doc).await {
            Ok(out) if !out.text.trim().is_empty() => Ok(out),
            Ok(native) => {
                debug!(source_id = %doc.source_id, "empty text layer, running OCR command");
                let ocr = fallback.recognize(doc).await?;
                Ok(EngineOutput {
                    page_count: ocr.page_count.or(native.page_count),
                    title: native.title,
                    ..ocr
                })
            }
            Err(HarvestError::UnsupportedFormat(ct)) => {
                debug!(source_id = %doc.source_id, content_type = %ct, "native extractor rejected the document, running OCR command");
                fallback.recognize(doc).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the engine named by `[ocr]`.
pub fn engine_from_config(config: &Config, store: Arc<ObjectStore>) -> Arc<dyn OcrEngine> {
    let rules: HashMap<String, HtmlRules> = config
        .sources
        .iter()
        .map(|(name, source)| (name.clone(), source.html_rules().clone()))
        .collect();
    let native = NativeEngine::new(store, rules);
    let command = command_engine(&config.ocr);

    match config.ocr.engine.as_str() {
        "command" => match command {
            Some(cmd) => Arc::new(cmd),
            None => Arc::new(native),
        },
        "auto" => Arc::new(AutoEngine::new(native, command)),
        _ => Arc::new(native),
    }
}

fn command_engine(config: &OcrConfig) -> Option<CommandEngine> {
    if config.command.is_empty() {
        return None;
    }
    let output = if config.output == "json" {
        CommandOutput::Json
    } else {
        CommandOutput::Text
    };
    Some(CommandEngine::new(config.command.clone(), output))
}

// ═══════════════════════════════════════════════════════════════════════
// Adapter
// ═══════════════════════════════════════════════════════════════════════

/// Runs an engine under a timeout and builds the record.
#[derive(Clone)]
pub struct Extractor {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
}

impl Extractor {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn extract(&self, doc: &StoredDocument) -> Result<ExtractedRecord> {
        let output = tokio::time::timeout(self.timeout, self.engine.recognize(doc))
            .await
            .map_err(|_| {
                HarvestError::ExtractionFailed(format!(
                    "{} engine timed out after {}s",
                    self.engine.name(),
                    self.timeout.as_secs()
                ))
            })??;

        Ok(ExtractedRecord {
            source_id: doc.source_id.clone(),
            source: doc.source.clone(),
            url: doc.url.clone(),
            title: doc.title.clone().or(output.title),
            text: output.text,
            extracted_at: chrono::Utc::now(),
            ocr_confidence: output.confidence,
            page_count: output.page_count,
            content_hash: doc.content_hash.clone(),
            content_type: doc.content_type.clone(),
            engine: self.engine.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn stored(store: &ObjectStore, bytes: &[u8], content_type: &str) -> StoredDocument {
        let put = store.put(bytes).await.unwrap();
        StoredDocument {
            source: "nezams".into(),
            source_id: "nezams:1".into(),
            url: "https://nezams.test/1/".into(),
            title: None,
            content_hash: put.content_hash,
            storage_path: put.path,
            byte_size: bytes.len() as u64,
            content_type: content_type.into(),
        }
    }

    struct Stalls;

    #[async_trait]
    impl OcrEngine for Stalls {
        fn name(&self) -> &str {
            "stalls"
        }

        async fn recognize(&self, _doc: &StoredDocument) -> Result<EngineOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(EngineOutput::default())
        }
    }

    #[tokio::test]
    async fn native_engine_applies_source_rules() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ObjectStore::new(tmp.path()));
        let doc = stored(
            &store,
            "<html><body><h1>نظام</h1><div id=\"c\"><p>نص</p><span class=\"x\">drop</span></div></body></html>".as_bytes(),
            "text/html",
        )
        .await;

        let mut rules = HashMap::new();
        rules.insert(
            "nezams".to_string(),
            HtmlRules {
                content_selector: Some("#c".into()),
                title_selector: Some("h1".into()),
                strip_selectors: vec!["span.x".into()],
            },
        );
        let extractor = Extractor::new(
            Arc::new(NativeEngine::new(store.clone(), rules)),
            Duration::from_secs(5),
        );
        let record = extractor.extract(&doc).await.unwrap();
        assert_eq!(record.text, "نص");
        assert_eq!(record.title.as_deref(), Some("نظام"));
        assert_eq!(record.engine, "native");
        assert_eq!(record.content_hash, doc.content_hash);
    }

    #[tokio::test]
    async fn unknown_formats_are_unsupported() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ObjectStore::new(tmp.path()));
        let doc = stored(&store, b"II*\x00", "image/tiff").await;
        let engine = NativeEngine::new(store, HashMap::new());
        let err = engine.recognize(&doc).await.unwrap_err();
        assert!(matches!(err, HarvestError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn slow_engines_time_out() {
        let extractor = Extractor::new(Arc::new(Stalls), Duration::from_millis(20));
        let doc = StoredDocument {
            source: "s".into(),
            source_id: "s:1".into(),
            url: "https://x.test/1".into(),
            title: None,
            content_hash: "0".repeat(64),
            storage_path: PathBuf::from("/nonexistent"),
            byte_size: 0,
            content_type: "application/pdf".into(),
        };
        let err = extractor.extract(&doc).await.unwrap_err();
        assert!(matches!(err, HarvestError::ExtractionFailed(_)));
    }

    #[test]
    fn input_placeholder_is_substituted_or_appended() {
        let with = CommandEngine::new(
            vec!["tesseract".into(), "{input}".into(), "stdout".into()],
            CommandOutput::Text,
        );
        assert_eq!(with.command_line("/o/ab/abc"), vec!["tesseract", "/o/ab/abc", "stdout"]);

        let without = CommandEngine::new(vec!["ocrmypdf-text".into()], CommandOutput::Text);
        assert_eq!(without.command_line("/o/x"), vec!["ocrmypdf-text", "/o/x"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn auto_engine_falls_back_for_unsupported_formats() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ObjectStore::new(tmp.path()));
        let doc = stored(&store, b"II*\x00 scanned", "image/tiff").await;

        let fallback = CommandEngine::new(
            vec![
                "sh".into(),
                "-c".into(),
                r#"printf '{"text": "recognized", "confidence": 0.87}'"#.into(),
                "{input}".into(),
            ],
            CommandOutput::Json,
        );
        let engine = AutoEngine::new(NativeEngine::new(store, HashMap::new()), Some(fallback));
        let record = Extractor::new(Arc::new(engine), Duration::from_secs(10))
            .extract(&doc)
            .await
            .unwrap();
        assert_eq!(record.text, "recognized");
        assert_eq!(record.ocr_confidence, Some(0.87));
        assert_eq!(record.engine, "auto");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_extraction_failed() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ObjectStore::new(tmp.path()));
        let doc = stored(&store, b"%PDF-1.4", "application/pdf").await;
        let engine = CommandEngine::new(
            vec!["sh".into(), "-c".into(), "echo boom >&2; exit 3".into()],
            CommandOutput::Text,
        );
        let err = engine.recognize(&doc).await.unwrap_err();
        assert!(matches!(err, HarvestError::ExtractionFailed(ref m) if m.contains("boom")));
    }
}
