//! Minimal right-to-left DOCX writer.
//!
//! Produces a WordprocessingML package with a title paragraph followed by
//! one paragraph per body line. Every paragraph carries `w:bidi` and right
//! alignment, runs carry `w:rtl` and Arial 14pt, and the section is marked
//! right-to-left so Arabic text renders correctly in Word and LibreOffice.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// Half-points: 28 = 14pt.
const FONT_SIZE: u32 = 28;

/// XML 1.0 forbids most control characters even when escaped.
fn xml_text(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|&c| c == '\t' || c >= ' ')
        .collect();
    quick_xml::escape::escape(cleaned.as_str()).into_owned()
}

fn paragraph(text: &str, bold: bool) -> String {
    format!(
        concat!(
            "<w:p><w:pPr><w:bidi/><w:jc w:val=\"right\"/></w:pPr>",
            "<w:r><w:rPr><w:rFonts w:ascii=\"Arial\" w:hAnsi=\"Arial\" w:cs=\"Arial\" w:eastAsia=\"Arial\"/>",
            "{}<w:rtl/><w:sz w:val=\"{}\"/><w:szCs w:val=\"{}\"/></w:rPr>",
            "<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>"
        ),
        if bold { "<w:b/><w:bCs/>" } else { "" },
        FONT_SIZE,
        FONT_SIZE,
        xml_text(text)
    )
}

fn document_xml(title: &str, body: &str) -> String {
    let mut xml = String::with_capacity(body.len() * 2 + 1024);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#);
    xml.push_str(&paragraph(title, true));
    for line in body.lines() {
        xml.push_str(&paragraph(line, false));
    }
    xml.push_str("<w:sectPr><w:bidi/></w:sectPr></w:body></w:document>");
    xml
}

/// Build the DOCX package in memory.
pub fn build_rtl_docx(title: &str, body: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = SimpleFileOptions::default();
        for (name, content) in [
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("word/document.xml", document_xml(title, body)),
        ] {
            zip.start_file(name, options)
                .with_context(|| format!("failed to add {} to docx", name))?;
            zip.write_all(content.as_bytes())?;
        }
        zip.finish().context("failed to finish docx archive")?;
    }
    Ok(buf)
}

pub fn write_rtl_docx(path: &Path, title: &str, body: &str) -> Result<()> {
    let bytes = build_rtl_docx(title, body)?;
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
