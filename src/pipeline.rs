//! Request orchestration: cache gate, ingest + index, then the per-question
//! retrieve-and-generate loop.
//!
//! One call to [`Pipeline::run`] serves one document/questions request. The
//! flow is sequential: a cache hit skips ingestion and indexing entirely; a
//! miss runs download → extract → chunk → embed → upsert and then writes the
//! cache record. Questions are answered one after another, each appending a
//! log row to a single transaction that commits once at the end, so any
//! failure mid-loop rolls back all pending log rows along with the request.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::answer::{answer_with_sources, AnswerModel};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{index_chunks, query_context, VectorIndex};
use crate::ingest::process_document;
use crate::models::{AnsweredQuestion, CachedDocument, RunOutcome};

/// Answer synthesized when retrieval returns nothing; the model is not called.
pub const NO_RELEVANT_CONTEXT_ANSWER: &str =
    "I cannot find relevant information in the document to answer this question.";

/// The question-answering pipeline with its injected collaborators.
///
/// Clients are passed in explicitly so tests can substitute fakes for the
/// embedding, index, and model backends.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub http: reqwest::Client,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub model: Arc<dyn AnswerModel>,
}

impl Pipeline {
    /// Process one request: ensure the document is ingested and indexed,
    /// then answer each question from retrieved context.
    pub async fn run(&self, document_url: &str, questions: &[String]) -> Result<RunOutcome> {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id, document_url);
        self.run_inner(document_url, questions).instrument(span).await
    }

    async fn run_inner(&self, document_url: &str, questions: &[String]) -> Result<RunOutcome> {
        let started = Instant::now();

        let document_hash = match self.lookup_cached(document_url).await? {
            Some(cached) => {
                info!(
                    document_hash = %cached.document_hash,
                    chunk_count = cached.chunk_count,
                    "using cached document"
                );
                cached.document_hash
            }
            None => self.ingest_and_index(document_url).await?,
        };

        // All log rows commit together at the end; an abort anywhere in the
        // question loop rolls them back with the request.
        let mut tx = self.pool.begin().await?;
        let mut answers = Vec::with_capacity(questions.len());

        for question in questions {
            let relevant = query_context(
                self.embedder.as_ref(),
                self.index.as_ref(),
                question,
                &document_hash,
                self.config.retrieval.top_k,
            )
            .await?;

            let answered = if relevant.is_empty() {
                AnsweredQuestion {
                    question: question.clone(),
                    answer: NO_RELEVANT_CONTEXT_ANSWER.to_string(),
                    sources: Vec::new(),
                    confidence: 0.0,
                }
            } else {
                let context_texts: Vec<String> =
                    relevant.into_iter().map(|c| c.text).collect();
                let generated =
                    answer_with_sources(self.model.as_ref(), question, &context_texts).await;
                AnsweredQuestion {
                    question: question.clone(),
                    answer: generated.answer,
                    sources: generated.sources,
                    confidence: generated.confidence,
                }
            };

            let elapsed_ms = started.elapsed().as_millis() as i64;
            log_query(&mut tx, document_url, &answered, elapsed_ms).await?;

            answers.push(answered);
        }

        tx.commit().await?;

        Ok(RunOutcome {
            document_url: document_url.to_string(),
            answers,
            processing_time_ms: started.elapsed().as_millis() as i64,
        })
    }

    async fn lookup_cached(&self, document_url: &str) -> Result<Option<CachedDocument>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT document_hash, chunk_count FROM document_cache WHERE document_url = ? LIMIT 1",
        )
        .bind(document_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(document_hash, chunk_count)| CachedDocument {
            document_hash,
            chunk_count,
        }))
    }

    /// The cache-miss path: ingest, index, then persist the cache record.
    /// Any failure aborts before the cache row is written.
    async fn ingest_and_index(&self, document_url: &str) -> Result<String> {
        let ingested = process_document(&self.http, &self.config, document_url)
            .await
            .context("Document processing failed")?;

        info!(
            document_hash = %ingested.document_hash,
            chunks = ingested.chunks.len(),
            "document processed"
        );

        let chunk_count = index_chunks(
            self.embedder.as_ref(),
            self.index.as_ref(),
            &ingested.chunks,
            document_url,
            &ingested.document_hash,
        )
        .await?;

        info!(chunk_count, "chunks embedded and indexed");

        // Two concurrent first-ingests of the same document race here; ids
        // in the index are deterministic, so the loser's conflict is benign.
        sqlx::query(
            r#"
            INSERT INTO document_cache (document_url, document_hash, processed_at, chunk_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_hash) DO NOTHING
            "#,
        )
        .bind(document_url)
        .bind(&ingested.document_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(chunk_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(ingested.document_hash)
    }
}

async fn log_query(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_url: &str,
    answered: &AnsweredQuestion,
    elapsed_ms: i64,
) -> Result<()> {
    let sources_json = serde_json::to_string(&answered.sources)?;
    // Confidence is stored stringified; a zero score is logged as NULL.
    let confidence = if answered.confidence > 0.0 {
        Some(answered.confidence.to_string())
    } else {
        None
    };

    sqlx::query(
        r#"
        INSERT INTO query_log
            (document_url, question, answer, sources, processing_time_ms, confidence_score, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(document_url)
    .bind(&answered.question)
    .bind(&answered.answer)
    .bind(sources_json)
    .bind(elapsed_ms)
    .bind(confidence)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;

    Ok(())
}
