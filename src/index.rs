//! Remote vector index abstraction and the Pinecone implementation.
//!
//! The pipeline talks to the index through the [`VectorIndex`] trait so tests
//! can substitute an in-memory fake. [`PineconeIndex`] implements it over the
//! Pinecone REST API: upserts batched to respect payload limits, similarity
//! queries filtered by document hash, and two advisory operations (delete,
//! stats) that report failure as data instead of raising.
//!
//! Index creation is idempotent: on startup the named index is created only
//! if absent, and a creation failure is logged as a warning rather than
//! raised, since an index created concurrently by another instance is an
//! acceptable success state.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::PineconeConfig;
use crate::embedding::{Embedder, TaskType};
use crate::models::{EmbeddingRecord, IndexStats, ScoredChunk};

const PINECONE_CONTROL_BASE: &str = "https://api.pinecone.io";

/// Upper bound on vectors fetched when collecting ids for a delete.
const DELETE_SCAN_TOP_K: usize = 10_000;

/// Remote similarity index over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write records to the index. Re-upserting an existing id overwrites.
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()>;

    /// Similarity-search the index, restricted to vectors whose metadata
    /// hash equals `document_hash`, ordered by descending score.
    async fn query(
        &self,
        vector: &[f32],
        document_hash: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Best-effort removal of all vectors tagged with `document_hash`.
    /// Returns `false` on failure; never raises.
    async fn delete_document(&self, document_hash: &str) -> bool;

    /// Advisory index statistics; failure is reported as data.
    async fn stats(&self) -> IndexStats;
}

/// Pinecone-backed [`VectorIndex`].
pub struct PineconeIndex {
    client: reqwest::Client,
    data_url: String,
    dims: usize,
    upsert_batch_size: usize,
}

impl PineconeIndex {
    /// Connect to Pinecone: ensure the named index exists (warning-only on
    /// failure) and resolve its data-plane host.
    pub async fn connect(config: &PineconeConfig, dims: usize) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let mut headers = reqwest::header::HeaderMap::new();
        let mut key_value = reqwest::header::HeaderValue::from_str(&api_key)
            .context("Pinecone API key is not a valid header value")?;
        key_value.set_sensitive(true);
        headers.insert("Api-Key", key_value);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        ensure_index_exists(&client, config, dims).await;

        let host = describe_index_host(&client, &config.index_name)
            .await
            .with_context(|| format!("Failed to resolve index host for {}", config.index_name))?;

        Ok(Self {
            client,
            data_url: format!("https://{}", host),
            dims,
            upsert_batch_size: config.upsert_batch_size,
        })
    }
}

/// Create the index if it is not listed. Failures (including creation races
/// with a concurrent instance) are downgraded to warnings.
async fn ensure_index_exists(client: &reqwest::Client, config: &PineconeConfig, dims: usize) {
    let result: Result<()> = async {
        let response = client
            .get(format!("{}/indexes", PINECONE_CONTROL_BASE))
            .send()
            .await?
            .error_for_status()?;
        let json: serde_json::Value = response.json().await?;

        let exists = json
            .get("indexes")
            .and_then(|v| v.as_array())
            .map(|indexes| {
                indexes
                    .iter()
                    .any(|i| i.get("name").and_then(|n| n.as_str()) == Some(&config.index_name))
            })
            .unwrap_or(false);

        if !exists {
            let body = serde_json::json!({
                "name": config.index_name,
                "dimension": dims,
                "metric": "cosine",
                "spec": {
                    "serverless": {
                        "cloud": config.cloud,
                        "region": config.region,
                    }
                }
            });
            client
                .post(format!("{}/indexes", PINECONE_CONTROL_BASE))
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(index = %config.index_name, error = %e, "could not ensure index exists");
    }
}

async fn describe_index_host(client: &reqwest::Client, index_name: &str) -> Result<String> {
    let response = client
        .get(format!("{}/indexes/{}", PINECONE_CONTROL_BASE, index_name))
        .send()
        .await?
        .error_for_status()?;
    let json: serde_json::Value = response.json().await?;

    json.get("host")
        .and_then(|h| h.as_str())
        .map(|h| h.to_string())
        .ok_or_else(|| anyhow::anyhow!("Index description missing host"))
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        for batch in records.chunks(self.upsert_batch_size) {
            let vectors: Vec<serde_json::Value> = batch
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "values": r.values,
                        "metadata": {
                            "text": r.text,
                            "document_url": r.document_url,
                            "document_hash": r.document_hash,
                            "chunk_index": r.chunk_index,
                        }
                    })
                })
                .collect();

            let response = self
                .client
                .post(format!("{}/vectors/upsert", self.data_url))
                .json(&serde_json::json!({ "vectors": vectors }))
                .send()
                .await
                .context("Failed to upsert vectors")?;

            let status = response.status();
            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                bail!("Pinecone upsert error {}: {}", status, body_text);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        document_hash: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeValues": false,
            "includeMetadata": true,
            "filter": { "document_hash": { "$eq": document_hash } },
        });

        let response = self
            .client
            .post(format!("{}/query", self.data_url))
            .json(&body)
            .send()
            .await
            .context("Failed to query index")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Pinecone query error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(parse_query_matches(&json))
    }

    async fn delete_document(&self, document_hash: &str) -> bool {
        let result: Result<()> = async {
            // Pinecone has no delete-by-filter on serverless indexes, so
            // scan for matching ids with a zero query vector first.
            let zero = vec![0.0f32; self.dims];
            let matches = self.query(&zero, document_hash, DELETE_SCAN_TOP_K).await?;

            let ids: Vec<String> = matches
                .into_iter()
                .map(|m| m.id)
                .filter(|id| !id.is_empty())
                .collect();

            if ids.is_empty() {
                return Ok(());
            }

            self.client
                .post(format!("{}/vectors/delete", self.data_url))
                .json(&serde_json::json!({ "ids": ids }))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(document_hash, error = %e, "failed to delete document vectors");
                false
            }
        }
    }

    async fn stats(&self) -> IndexStats {
        let result: Result<IndexStats> = async {
            let response = self
                .client
                .post(format!("{}/describe_index_stats", self.data_url))
                .json(&serde_json::json!({}))
                .send()
                .await?
                .error_for_status()?;
            let json: serde_json::Value = response.json().await?;

            Ok(IndexStats::Ready {
                total_vectors: json
                    .get("totalVectorCount")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                dimension: json
                    .get("dimension")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(self.dims as u64) as usize,
                index_fullness: json
                    .get("indexFullness")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
            })
        }
        .await;

        result.unwrap_or_else(|e| IndexStats::Unavailable {
            error: e.to_string(),
        })
    }
}

/// Extract scored chunks from a Pinecone query response.
fn parse_query_matches(json: &serde_json::Value) -> Vec<ScoredChunk> {
    let Some(matches) = json.get("matches").and_then(|m| m.as_array()) else {
        return Vec::new();
    };

    matches
        .iter()
        .map(|m| {
            let metadata = m.get("metadata").cloned().unwrap_or_default();
            ScoredChunk {
                id: m
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string(),
                text: metadata
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                chunk_index: metadata
                    .get("chunk_index")
                    .and_then(|i| i.as_u64())
                    .unwrap_or(0) as usize,
                document_url: metadata
                    .get("document_url")
                    .and_then(|u| u.as_str())
                    .unwrap_or_default()
                    .to_string(),
            }
        })
        .collect()
}

/// Embed every chunk as a document embedding and upsert the records in
/// batches. Returns the number of chunks indexed. A failure of any embedding
/// call or batch write aborts the whole operation; batches already written
/// are not rolled back.
pub async fn index_chunks(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    chunks: &[String],
    document_url: &str,
    document_hash: &str,
) -> Result<usize> {
    let mut records = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let values = embedder
            .embed(chunk, TaskType::Document)
            .await
            .with_context(|| format!("Failed to embed chunk {}", i))?;

        records.push(EmbeddingRecord {
            id: EmbeddingRecord::chunk_id(document_hash, i),
            values,
            text: chunk.clone(),
            document_url: document_url.to_string(),
            document_hash: document_hash.to_string(),
            chunk_index: i,
        });
    }

    index
        .upsert(&records)
        .await
        .context("Failed to embed and upsert chunks")?;

    Ok(records.len())
}

/// Embed the question as a query embedding and return the top-k chunks for
/// the given document, in the order the index ranked them.
pub async fn query_context(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    question: &str,
    document_hash: &str,
    top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    let vector = embedder
        .embed(question, TaskType::Query)
        .await
        .context("Failed to embed query")?;

    index.query(&vector, document_hash, top_k).await
}
