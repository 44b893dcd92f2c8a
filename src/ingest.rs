//! Document ingestion: download, hash, extract, chunk.
//!
//! Given a document URL this module produces the ordered chunk list and the
//! content hash that the rest of the pipeline keys on. The hash is computed
//! over the raw downloaded bytes, not the extracted text, so byte-identical
//! documents always hash identically regardless of extraction quirks.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::chunk::split_text;
use crate::config::Config;
use crate::extract::{extract_text, DocumentFormat, ExtractError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to download document: {0}")]
    Download(String),
    #[error("File too large: {size} bytes. Maximum allowed: {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("No text content found in document")]
    NoContent,
    #[error("Failed to create text chunks from document")]
    NoChunks,
}

/// Result of a successful ingest: ordered chunks plus the content hash.
#[derive(Debug)]
pub struct IngestedDocument {
    pub chunks: Vec<String>,
    pub document_hash: String,
}

/// Download and process a document into text chunks.
///
/// Steps: fetch with a bounded timeout, reject oversized bodies before any
/// processing, hash the raw bytes, extract text per format, chunk. Fails if
/// the extracted text is empty after trimming or chunking yields nothing.
pub async fn process_document(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<IngestedDocument, IngestError> {
    let (bytes, format) = download_document(http, config, url).await?;

    let document_hash = content_hash(&bytes);

    let text = extract_text(&bytes, format)?;
    if text.trim().is_empty() {
        return Err(IngestError::NoContent);
    }

    let chunks = split_text(
        &text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    if chunks.is_empty() {
        return Err(IngestError::NoChunks);
    }

    Ok(IngestedDocument {
        chunks,
        document_hash,
    })
}

/// Fetch the document bytes and determine the format from the URL path.
async fn download_document(
    http: &reqwest::Client,
    config: &Config,
    url: &str,
) -> Result<(Vec<u8>, DocumentFormat), IngestError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| IngestError::Download(e.to_string()))?;
    let format = DocumentFormat::from_url_path(parsed.path())?;

    let response = http
        .get(parsed)
        .timeout(std::time::Duration::from_secs(
            config.document.download_timeout_secs,
        ))
        .send()
        .await
        .map_err(|e| IngestError::Download(e.to_string()))?
        .error_for_status()
        .map_err(|e| IngestError::Download(e.to_string()))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::Download(e.to_string()))?;

    let max = config.max_file_size_bytes();
    if bytes.len() as u64 > max {
        return Err(IngestError::TooLarge {
            size: bytes.len() as u64,
            max,
        });
    }

    Ok((bytes.to_vec(), format))
}

/// SHA-256 digest of the raw document bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
