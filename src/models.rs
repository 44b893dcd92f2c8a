//! Core data models used throughout docqa.
//!
//! These types represent the chunks, vectors, and answers that flow through
//! the ingestion and question-answering pipeline.

use serde::Serialize;

/// An embedded chunk ready to be written to the vector index.
///
/// The id is `{document_hash}_{chunk_index}`, so re-upserting the same
/// document overwrites in place rather than accumulating duplicates.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub text: String,
    pub document_url: String,
    pub document_hash: String,
    pub chunk_index: usize,
}

impl EmbeddingRecord {
    pub fn chunk_id(document_hash: &str, chunk_index: usize) -> String {
        format!("{}_{}", document_hash, chunk_index)
    }
}

/// A chunk returned from a similarity query, ordered by descending score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The vector id as the index reported it.
    pub id: String,
    pub text: String,
    pub score: f32,
    pub chunk_index: usize,
    pub document_url: String,
}

/// A cache row for a previously ingested document.
#[derive(Debug, Clone)]
pub struct CachedDocument {
    pub document_hash: String,
    pub chunk_count: i64,
}

/// The answer produced for a single question.
#[derive(Debug, Clone, Serialize)]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

/// Aggregate result of one document/questions request.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub document_url: String,
    pub answers: Vec<AnsweredQuestion>,
    pub processing_time_ms: i64,
}

/// Vector index statistics, with failure reported as data rather than as an
/// error: stats are advisory and must never fail the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndexStats {
    Ready {
        total_vectors: u64,
        dimension: usize,
        index_fullness: f64,
    },
    Unavailable {
        error: String,
    },
}
