//! Text-layer extraction for downloaded documents.
//!
//! Handles the formats government portals publish: PDF (text layer via
//! `pdf-extract`, page count via `lopdf`), Office Open XML (DOCX, PPTX,
//! XLSX read straight from the ZIP container), HTML pages reduced with
//! per-source CSS rules, and plain text. Scanned PDFs come back with an
//! empty text layer; the OCR adapter decides what to do with those.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::io::Read;

use quick_xml::events::Event;

use crate::config::HtmlRules;
use crate::error::HarvestError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_HTML: &str = "text/html";
pub const MIME_TEXT: &str = "text/plain";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Decompressed size cap for a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Ooxml(String),
    Html(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "no native extractor for content-type {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML: {}", e),
            ExtractError::Html(e) => write!(f, "HTML: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<ExtractError> for HarvestError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedContentType(ct) => HarvestError::UnsupportedFormat(ct),
            other => HarvestError::ExtractionFailed(other.to_string()),
        }
    }
}

/// Text and metadata recovered from one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub text: String,
    /// Title found inside the document (HTML `title_selector` or `<title>`).
    pub title: Option<String>,
    pub page_count: Option<u32>,
}

/// Lowercased MIME type without parameters (`text/html; charset=utf-8` →
/// `text/html`).
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_supported(content_type: &str) -> bool {
    matches!(
        normalize_content_type(content_type).as_str(),
        MIME_PDF | MIME_DOCX | MIME_PPTX | MIME_XLSX | MIME_HTML | MIME_TEXT
    )
}

pub fn extract_text(
    bytes: &[u8],
    content_type: &str,
    rules: &HtmlRules,
) -> Result<Extracted, ExtractError> {
    let extracted = match normalize_content_type(content_type).as_str() {
        MIME_PDF => Extracted {
            text: extract_pdf(bytes)?,
            title: None,
            page_count: pdf_page_count(bytes).ok(),
        },
        MIME_DOCX => Extracted {
            text: extract_docx(bytes)?,
            ..Default::default()
        },
        MIME_PPTX => {
            let (text, slides) = extract_pptx(bytes)?;
            Extracted {
                text,
                title: None,
                page_count: Some(slides),
            }
        }
        MIME_XLSX => Extracted {
            text: extract_xlsx(bytes)?,
            ..Default::default()
        },
        MIME_HTML => extract_html(&String::from_utf8_lossy(bytes), rules)?,
        MIME_TEXT => Extracted {
            text: String::from_utf8_lossy(bytes).into_owned(),
            ..Default::default()
        },
        other => return Err(ExtractError::UnsupportedContentType(other.to_string())),
    };
    Ok(Extracted {
        text: normalize_text(&extracted.text),
        ..extracted
    })
}

/// Trim every line and squeeze runs of blank lines down to one.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Number of pages in the PDF's page tree.
pub fn pdf_page_count(bytes: &[u8]) -> Result<u32, ExtractError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(document.get_pages().len() as u32)
}

// ═══════════════════════════════════════════════════════════════════════
// Office Open XML
// ═══════════════════════════════════════════════════════════════════════

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds {} bytes",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered parts (`ppt/slides/slide3.xml`) in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    paragraph_text(&xml)
}

/// Slide text, one block per slide, and the slide count.
fn extract_pptx(bytes: &[u8]) -> Result<(String, u32), ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_parts(&archive, "ppt/slides/slide");
    let mut blocks = Vec::with_capacity(slides.len());
    for name in &slides {
        let xml = read_entry(&mut archive, name)?;
        blocks.push(paragraph_text(&xml)?);
    }
    Ok((blocks.join("\n\n"), slides.len() as u32))
}

/// Text of `<*:t>` runs with a newline after every `<*:p>` paragraph.
///
/// WordprocessingML and DrawingML share this shape (`w:p/w:r/w:t` and
/// `a:p/a:r/a:t`), so the namespace prefix is ignored.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        sheets.push(sheet_rows(&xml, &shared)?);
    }
    Ok(sheets.join("\n\n"))
}

/// Each `<si>` entry of the shared string table, runs concatenated.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Non-empty rows of one worksheet, cells separated by tabs.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<Vec<u8>> = None;
    let mut in_value = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned());
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_type = None,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                let cell = match cell_type.as_deref() {
                    _ if value.is_empty() => None,
                    Some(b"s") => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned(),
                    _ => Some(value.to_string()),
                };
                if let Some(cell) = cell {
                    row.push(cell);
                    cells += 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

// ═══════════════════════════════════════════════════════════════════════
// HTML
// ═══════════════════════════════════════════════════════════════════════

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Html(format!("invalid selector '{}': {:?}", css, e)))
}

/// Reduce an HTML page to text: take the content container, drop stripped
/// elements and scripts, and emit one line per text node.
pub fn extract_html(body: &str, rules: &HtmlRules) -> Result<Extracted, ExtractError> {
    let document = Html::parse_document(body);

    let title = match &rules.title_selector {
        Some(css) => document.select(&selector(css)?).next(),
        None => document.select(&selector("title")?).next(),
    }
    .map(|el| el.text().collect::<Vec<_>>().join(" "))
    .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
    .filter(|t| !t.is_empty());

    let root: ElementRef<'_> = match &rules.content_selector {
        Some(css) => document.select(&selector(css)?).next().ok_or_else(|| {
            ExtractError::Html(format!("content selector '{}' matched nothing", css))
        })?,
        None => document
            .select(&selector("body")?)
            .next()
            .unwrap_or_else(|| document.root_element()),
    };

    let mut stripped = HashSet::new();
    for css in &rules.strip_selectors {
        let sel = selector(css)?;
        stripped.extend(root.select(&sel).map(|el| el.id()));
    }

    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            stripped.contains(&a.id())
                || a.value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
                    .unwrap_or(false)
        });
        let line = text.trim();
        if !hidden && !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    Ok(Extracted {
        text: lines.join("\n"),
        title,
        page_count: None,
    })
}
