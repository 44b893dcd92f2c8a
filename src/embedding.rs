//! Embedding client abstraction and the Gemini implementation.
//!
//! Defines the [`Embedder`] trait used by the pipeline, plus
//! [`GeminiEmbedder`], which calls the Gemini `embedContent` endpoint with
//! retry and exponential backoff.
//!
//! Embeddings are tagged with a [`TaskType`]: the model biases the vector
//! differently for document storage and query lookup, so the two sides of a
//! similarity search must use matching task types.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GeminiConfig;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Usage intent for an embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Embedding a document chunk for storage in the index.
    Document,
    /// Embedding a question for similarity lookup.
    Query,
}

impl TaskType {
    fn as_api_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>>;

    /// Vector dimensionality produced by this embedder.
    fn dims(&self) -> usize;
}

/// Embedding client for the Gemini `embedContent` API.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl GeminiEmbedder {
    /// Create an embedder from configuration, reading the API key from the
    /// configured environment variable.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.embedding_model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn embed_once(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let url = format!("{}/models/{}:embedContent", GEMINI_API_BASE, self.model);
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [ { "text": text } ] },
            "taskType": task.as_api_str(),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json, self.dims);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        self.embed_once(text, task).await
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Parse the `embedContent` response JSON, checking the vector dimension.
fn parse_embedding_response(json: &serde_json::Value, expected_dims: usize) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embedding values"))?;

    let vec: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vec.len() != expected_dims {
        bail!(
            "Unexpected embedding dimension: got {}, expected {}",
            vec.len(),
            expected_dims
        );
    }

    Ok(vec)
}
