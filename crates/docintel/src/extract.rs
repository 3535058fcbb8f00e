//! Page-level text extraction for plain text, PDF, and DOCX documents.
//!
//! Extraction sits in front of the pipeline: a [`TextExtractor`] turns raw
//! bytes into numbered [`Page`]s and flags documents that would need OCR.
//! Nothing here panics on malformed input; errors are returned and the
//! ingestion aborts before any chunk is written.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use docintel_core::models::Page;

/// Form feed, the page separator emitted by PDF text extraction.
const PAGE_BREAK: char = '\x0c';

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Pages of text plus a flag for scanned documents with no text layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub pages: Vec<Page>,
    pub needs_ocr: bool,
}

impl Extraction {
    /// Build from raw page texts, numbering from 1.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(i, t)| Page::new(i as u32 + 1, t))
            .collect();
        Self {
            pages,
            needs_ocr: false,
        }
    }

    pub fn has_text(&self) -> bool {
        self.pages.iter().any(|p| !p.text.trim().is_empty())
    }

    /// Pages joined with blank lines, as stored in `Document::full_text`.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Turns document bytes into pages.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError>;
}

/// UTF-8 text; form feeds separate pages.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Encoding(e.to_string()))?;
        Ok(Extraction::from_texts(text.split(PAGE_BREAK)))
    }
}

/// PDF text layer via `pdf-extract`.
///
/// A PDF whose text layer is empty is reported with `needs_ocr = true`.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let mut texts: Vec<&str> = text.split(PAGE_BREAK).collect();
        // pdf-extract terminates the last page with a form feed too.
        if texts.len() > 1 && texts.last().is_some_and(|t| t.trim().is_empty()) {
            texts.pop();
        }
        let mut extraction = Extraction::from_texts(texts);
        extraction.needs_ocr = !extraction.has_text();
        Ok(extraction)
    }
}

/// Word documents. Explicit page breaks (`<w:br w:type="page"/>`) split pages;
/// paragraphs become lines.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn name(&self) -> &str {
        "docx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
        let pages = docx_pages(&xml)?;
        Ok(Extraction::from_texts(pages))
    }
}

fn docx_pages(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut pages = vec![String::new()];
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(page) = pages.last_mut() {
                        page.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => {
                let is_page_break = e.attributes().flatten().any(|a| {
                    a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
                });
                if is_page_break {
                    pages.push(String::new());
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                if let Some(page) = pages.last_mut() {
                    page.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(pages.into_iter().map(|p| p.trim().to_string()).collect())
}

/// Pick an extractor from a file extension.
pub fn extractor_for_path(path: &Path) -> Result<Box<dyn TextExtractor>, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "text" => Ok(Box::new(PlainTextExtractor)),
        "pdf" => Ok(Box::new(PdfExtractor)),
        "docx" => Ok(Box::new(DocxExtractor)),
        other => Err(ExtractError::Unsupported(if other.is_empty() {
            path.display().to_string()
        } else {
            format!(".{}", other)
        })),
    }
}

/// True if [`extractor_for_path`] can handle this file.
pub fn is_supported(path: &Path) -> bool {
    extractor_for_path(path).is_ok()
}
