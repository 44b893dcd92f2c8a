//! Per-format plain-text extraction for downloaded documents.
//!
//! The document format is determined from the URL path suffix, not from the
//! response content-type. Supported: PDF, DOCX/DOC, and plain text. PDF pages
//! and DOCX paragraphs are concatenated; plain text is decoded by trying a
//! fixed ordered list of character encodings.

use std::io::Read;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Encodings tried in order when decoding plain-text documents.
const TEXT_ENCODINGS: [&'static Encoding; 2] = [UTF_8, WINDOWS_1252];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to extract text from PDF: {0}")]
    Pdf(String),
    #[error("Failed to extract text from DOCX: {0}")]
    Docx(String),
    #[error("Could not decode text file with any supported encoding")]
    Undecodable,
}

/// Document format derived from a URL's path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Determine the format from a URL path's file extension.
    pub fn from_url_path(path: &str) -> Result<Self, ExtractError> {
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" | "doc" => Ok(DocumentFormat::Docx),
            "txt" | "text" => Ok(DocumentFormat::Txt),
            other => Err(ExtractError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Extract plain text from document bytes according to the format.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Txt => extract_txt(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map(|text| text.trim().to_string())
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    extract_paragraph_runs(&doc_xml)
}

/// Walk the DOCX body XML, collecting `w:t` text runs and joining paragraphs
/// (`w:p`) with newlines.
fn extract_paragraph_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn extract_txt(bytes: &[u8]) -> Result<String, ExtractError> {
    for encoding in TEXT_ENCODINGS {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return Ok(text.into_owned());
        }
    }
    Err(ExtractError::Undecodable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect::<String>();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn format_from_url_path() {
        assert_eq!(
            DocumentFormat::from_url_path("/files/report.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_url_path("/a/b/notes.docx").unwrap(),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::from_url_path("/plain.text").unwrap(),
            DocumentFormat::Txt
        );
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = DocumentFormat::from_url_path("/data/table.csv").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(ext) if ext == "csv"));
    }

    #[test]
    fn missing_extension_is_rejected() {
        assert!(DocumentFormat::from_url_path("/no-extension").is_err());
    }

    #[test]
    fn txt_utf8_decodes() {
        let text = extract_text("héllo wörld".as_bytes(), DocumentFormat::Txt).unwrap();
        assert_eq!(text, "héllo wörld");
    }

    #[test]
    fn txt_falls_back_to_windows_1252() {
        // 0xE9 is 'é' in Windows-1252 but invalid as a lone UTF-8 byte.
        let bytes = b"caf\xe9";
        let text = extract_text(bytes, DocumentFormat::Txt).unwrap();
        assert_eq!(text, "café");
    }

    #[test]
    fn docx_paragraphs_joined_with_newlines() {
        let bytes = minimal_docx(&["First paragraph.", "Second paragraph."]);
        let text = extract_text(&bytes, DocumentFormat::Docx).unwrap();
        assert_eq!(text, "First paragraph.\nSecond paragraph.");
    }

    #[test]
    fn invalid_zip_returns_docx_error() {
        let err = extract_text(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn invalid_pdf_returns_pdf_error() {
        let err = extract_text(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
