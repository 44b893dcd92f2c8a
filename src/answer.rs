//! Context-constrained answer generation.
//!
//! Builds a prompt that restricts the model to the supplied context chunks,
//! invokes the generative model through the [`AnswerModel`] trait, and
//! post-processes the raw answer into answer text, cited source snippets,
//! and a heuristic confidence score.
//!
//! Generation failures are absorbed here: a failed or empty model response
//! degrades to a canned zero-confidence answer instead of propagating, so a
//! model outage for one question never aborts the whole request.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::config::GeminiConfig;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum characters of a chunk included in a source snippet.
const SOURCE_SNIPPET_CHARS: usize = 200;

/// Shared words required before a chunk counts as a used source.
const SOURCE_OVERLAP_THRESHOLD: usize = 3;

const NO_CONTEXT_ANSWER: &str =
    "I cannot answer this question as no relevant context was found.";
const EMPTY_RESPONSE_ANSWER: &str =
    "I apologize, but I couldn't generate a response. Please try rephrasing your question.";

/// Phrases whose presence lowers the confidence score.
const UNCERTAINTY_PHRASES: [&str; 7] = [
    "cannot answer",
    "not clear",
    "unclear",
    "insufficient information",
    "not enough context",
    "don't know",
    "unsure",
];

/// Phrases indicating the answer references the supplied context.
const ATTRIBUTION_PHRASES: [&str; 3] = ["according to", "the document states", "based on"];

/// Generative model producing free text from a prompt.
///
/// Returns `Ok(None)` when the model call succeeded but produced no text.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Option<String>>;
}

/// The post-processed result for one question.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

impl GeneratedAnswer {
    fn degraded(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Gemini `generateContent` client with fixed low-temperature sampling, so
/// answers are reproducible-ish and bounded in cost.
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiModel {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.generation_model.clone(),
        })
    }
}

#[async_trait]
impl AnswerModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<Option<String>> {
        let url = format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model);
        let body = serde_json::json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ],
            "generationConfig": {
                "temperature": 0.1,
                "topP": 0.8,
                "topK": 40,
                "maxOutputTokens": 1024,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(extract_candidate_text(&json))
    }
}

/// Pull the concatenated text parts out of the first candidate, if any.
fn extract_candidate_text(json: &serde_json::Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build the context-constrained prompt: rules, enumerated context chunks,
/// then the question.
pub fn build_prompt(question: &str, context_chunks: &[String]) -> String {
    let context_text = context_chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("Context {}:\n{}", i + 1, chunk))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an expert document analyst. Your task is to answer questions based STRICTLY on the provided context. Follow these rules:\n\n\
        1. ONLY use information that is explicitly stated in the provided context\n\
        2. If the context doesn't contain enough information to answer the question, say \"I cannot answer this question based on the provided context.\"\n\
        3. Do not use any external knowledge or make assumptions\n\
        4. Be precise and cite specific parts of the context when possible\n\
        5. Keep your answer concise but comprehensive\n\
        6. If multiple contexts are relevant, synthesize the information clearly\n\n\
        CONTEXT:\n{}\n\n\
        QUESTION: {}\n\n\
        ANSWER: Based on the provided context,",
        context_text, question
    )
}

/// Generate an answer for the question from the context chunks.
///
/// With empty context this short-circuits to a fixed refusal without calling
/// the model. Model failures and empty responses degrade to canned answers
/// with confidence 0.0; source attribution still runs against the context,
/// so degraded answers carry the fallback snippets rather than nothing.
pub async fn answer_with_sources(
    model: &dyn AnswerModel,
    question: &str,
    context_chunks: &[String],
) -> GeneratedAnswer {
    if context_chunks.is_empty() {
        return GeneratedAnswer::degraded(NO_CONTEXT_ANSWER);
    }

    let prompt = build_prompt(question, context_chunks);

    let answer = match model.generate(&prompt).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            return GeneratedAnswer {
                answer: EMPTY_RESPONSE_ANSWER.to_string(),
                sources: attribute_sources(EMPTY_RESPONSE_ANSWER, context_chunks),
                confidence: 0.0,
            }
        }
        Err(e) => {
            let answer = format!("An error occurred while generating the answer: {}", e);
            let sources = attribute_sources(&answer, context_chunks);
            return GeneratedAnswer {
                answer,
                sources,
                confidence: 0.0,
            };
        }
    };

    let confidence = confidence_score(&answer, context_chunks);
    let sources = attribute_sources(&answer, context_chunks);

    GeneratedAnswer {
        answer,
        sources,
        confidence,
    }
}

/// Heuristic confidence in [0.0, 1.0].
///
/// Starts at 0.5; an uncertainty phrase subtracts 0.3 (floored at 0.1); a
/// long answer quoting a full chunk verbatim adds 0.2; an attribution phrase
/// adds 0.1; the result is clamped.
pub fn confidence_score(answer: &str, context_chunks: &[String]) -> f64 {
    let mut confidence = 0.5f64;
    let answer_lower = answer.to_lowercase();

    if UNCERTAINTY_PHRASES
        .iter()
        .any(|p| answer_lower.contains(p))
    {
        confidence = (confidence - 0.3).max(0.1);
    }

    if answer.chars().count() > 100
        && context_chunks
            .iter()
            .any(|chunk| answer_lower.contains(&chunk.to_lowercase()))
    {
        confidence = (confidence + 0.2).min(1.0);
    }

    if ATTRIBUTION_PHRASES
        .iter()
        .any(|p| answer_lower.contains(p))
    {
        confidence = (confidence + 0.1).min(1.0);
    }

    confidence.clamp(0.0, 1.0)
}

/// Pick the context chunks most likely used by the answer.
///
/// A chunk qualifies when its lowercased word set shares more than three
/// words with the answer's. If nothing qualifies, the first two chunks are
/// returned as a fallback so the response always carries some provenance.
pub fn attribute_sources(answer: &str, context_chunks: &[String]) -> Vec<String> {
    let answer_lower = answer.to_lowercase();
    let answer_words: HashSet<&str> = answer_lower.split_whitespace().collect();

    let mut sources: Vec<String> = Vec::new();
    for chunk in context_chunks {
        let chunk_lower = chunk.to_lowercase();
        let chunk_words: HashSet<&str> = chunk_lower.split_whitespace().collect();

        let overlap = chunk_words.intersection(&answer_words).count();
        if overlap > SOURCE_OVERLAP_THRESHOLD {
            sources.push(truncate_snippet(chunk));
        }
    }

    if sources.is_empty() {
        sources = context_chunks
            .iter()
            .take(2)
            .map(|c| truncate_snippet(c))
            .collect();
    }

    sources
}

fn truncate_snippet(chunk: &str) -> String {
    if chunk.chars().count() > SOURCE_SNIPPET_CHARS {
        let truncated: String = chunk.chars().take(SOURCE_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        chunk.to_string()
    }
}
