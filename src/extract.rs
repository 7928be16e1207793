//! Text extraction for uploaded documents (PDF, DOCX, plain text, Markdown).
//!
//! Extraction turns raw upload bytes plus a declared [`DocumentType`] into a
//! single UTF-8 string. A document with no extractable text yields `""`;
//! rejecting it is the ingestion pipeline's job.

use std::io::Read;

use ragthread_core::models::DocumentType;
use ragthread_core::{RagError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from a document.
///
/// - `Txt` / `Md`: decoded as UTF-8 and returned unchanged.
/// - `Pdf`: text of every page, each followed by `\n`, in page order.
/// - `Docx`: paragraph texts joined with `\n`, in document order.
///
/// # Errors
///
/// [`RagError::ExtractionFailed`] when the bytes cannot be decoded or parsed.
pub fn extract_text(bytes: &[u8], doc_type: DocumentType) -> Result<String> {
    match doc_type {
        DocumentType::Txt | DocumentType::Md => extract_utf8(bytes),
        DocumentType::Pdf => extract_pdf(bytes),
        DocumentType::Docx => extract_docx(bytes),
    }
}

/// Extract text given the collaborator's type token (`pdf`, `txt`, `docx`, `md`).
///
/// # Errors
///
/// [`RagError::UnsupportedFormat`] for any other token, otherwise as
/// [`extract_text`].
pub fn extract_declared(bytes: &[u8], declared_type: &str) -> Result<String> {
    extract_text(bytes, declared_type.parse()?)
}

fn extract_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RagError::ExtractionFailed(format!("invalid UTF-8: {}", e)))
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::ExtractionFailed(format!("PDF: {}", e)))?;
    let mut out = String::new();
    for page in pages {
        out.push_str(&page);
        out.push('\n');
    }
    Ok(out)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ooxml_err(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ooxml_err(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml_err(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let paragraphs = docx_paragraphs(&doc_xml)?;
    Ok(paragraphs.join("\n"))
}

/// Collect the text of every `w:p`, in order.
///
/// Text comes from `w:t` runs; `w:tab` and `w:br` inside a run become a tab
/// and a newline.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut run_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"r" => run_depth += 1,
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" if run_depth > 0 => current.push('\t'),
                b"br" | b"cr" if run_depth > 0 => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ooxml_err(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => run_depth = run_depth.saturating_sub(1),
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn ooxml_err(msg: String) -> RagError {
    RagError::ExtractionFailed(format!("DOCX: {}", msg))
}
