use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use httpmock::prelude::*;
use tempfile::TempDir;

use docqa::answer::AnswerModel;
use docqa::config::{
    ChunkingConfig, Config, DbConfig, DocumentConfig, GeminiConfig, PineconeConfig,
    RetrievalConfig, ServerConfig,
};
use docqa::embedding::{Embedder, TaskType};
use docqa::models::{EmbeddingRecord, IndexStats, ScoredChunk};
use docqa::pipeline::{Pipeline, NO_RELEVANT_CONTEXT_ANSWER};
use docqa::{db, index::VectorIndex, migrate};

// ============ Test doubles ============

/// Deterministic embedder that counts calls per task type.
struct FakeEmbedder {
    document_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            document_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        match task {
            TaskType::Document => self.document_calls.fetch_add(1, Ordering::SeqCst),
            TaskType::Query => self.query_calls.fetch_add(1, Ordering::SeqCst),
        };
        Ok(vec![text.len() as f32; 4])
    }

    fn dims(&self) -> usize {
        4
    }
}

/// In-memory index keyed by record id, filtered by document hash on query.
#[derive(Default)]
struct FakeIndex {
    records: Mutex<Vec<EmbeddingRecord>>,
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.retain(|r| r.id != record.id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        document_hash: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.records.lock().unwrap();
        let mut matches: Vec<ScoredChunk> = stored
            .iter()
            .filter(|r| r.document_hash == document_hash)
            .map(|r| ScoredChunk {
                id: r.id.clone(),
                text: r.text.clone(),
                score: 1.0 - r.chunk_index as f32 * 0.01,
                chunk_index: r.chunk_index,
                document_url: r.document_url.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_document(&self, document_hash: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .retain(|r| r.document_hash != document_hash);
        true
    }

    async fn stats(&self) -> IndexStats {
        IndexStats::Ready {
            total_vectors: self.records.lock().unwrap().len() as u64,
            dimension: 4,
            index_fullness: 0.0,
        }
    }
}

/// Index that accepts writes but never returns matches.
struct EmptyIndex;

#[async_trait]
impl VectorIndex for EmptyIndex {
    async fn upsert(&self, _records: &[EmbeddingRecord]) -> Result<()> {
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _document_hash: &str,
        _top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        Ok(Vec::new())
    }

    async fn delete_document(&self, _document_hash: &str) -> bool {
        true
    }

    async fn stats(&self) -> IndexStats {
        IndexStats::Unavailable {
            error: "empty".to_string(),
        }
    }
}

/// Model that returns a fixed reply and records every prompt it receives.
struct ScriptedModel {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(Some(self.reply.clone()))
    }
}

struct FailingModel;

#[async_trait]
impl AnswerModel for FailingModel {
    async fn generate(&self, _prompt: &str) -> Result<Option<String>> {
        anyhow::bail!("model backend unreachable")
    }
}

// ============ Setup helpers ============

fn test_config(db_path: &Path) -> Config {
    Config {
        db: DbConfig {
            path: db_path.to_path_buf(),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            bearer_token_env: "BEARER_TOKEN".to_string(),
        },
        document: DocumentConfig::default(),
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        gemini: GeminiConfig::default(),
        pinecone: PineconeConfig::default(),
    }
}

struct TestHarness {
    _tmp: TempDir,
    pipeline: Pipeline,
    embedder: Arc<FakeEmbedder>,
    index: Arc<FakeIndex>,
    model: Arc<ScriptedModel>,
}

async fn setup(reply: &str) -> TestHarness {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("docqa.db");
    let config = test_config(&db_path);

    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let embedder = Arc::new(FakeEmbedder::new());
    let index = Arc::new(FakeIndex::default());
    let model = Arc::new(ScriptedModel::new(reply));

    let pipeline = Pipeline {
        config: Arc::new(config),
        pool,
        http: reqwest::Client::new(),
        embedder: embedder.clone(),
        index: index.clone(),
        model: model.clone(),
    };

    TestHarness {
        _tmp: tmp,
        pipeline,
        embedder,
        index,
        model,
    }
}

async fn cache_rows(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM document_cache")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn log_rows(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM query_log")
        .fetch_one(pool)
        .await
        .unwrap()
}

const DOC_BODY: &str = "Alpha is the first letter of the Greek alphabet.\n\n\
    Beta is the second letter and gamma is the third.";

// ============ Tests ============

#[tokio::test]
async fn answers_question_from_ingested_document() {
    let server = MockServer::start_async().await;
    let doc = server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let h = setup("Based on the document, alpha is the first letter of the Greek alphabet.").await;
    let url = server.url("/doc.txt");
    let questions = vec!["What is alpha?".to_string()];

    let outcome = h.pipeline.run(&url, &questions).await.unwrap();

    assert_eq!(outcome.document_url, url);
    assert_eq!(outcome.answers.len(), 1);

    let answered = &outcome.answers[0];
    assert_eq!(answered.question, "What is alpha?");
    assert!(answered.answer.contains("first letter"));
    // Base 0.5 plus the attribution bonus for "based on".
    assert!((answered.confidence - 0.6).abs() < 1e-9);
    assert!(!answered.sources.is_empty());

    // The prompt handed to the model carries the retrieved chunk text.
    let prompts = h.model.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Alpha is the first letter"));
    assert!(prompts[0].contains("What is alpha?"));

    // One cache row, one log row, and the chunks landed in the index.
    assert_eq!(cache_rows(&h.pipeline.pool).await, 1);
    assert_eq!(log_rows(&h.pipeline.pool).await, 1);
    assert!(!h.index.records.lock().unwrap().is_empty());

    doc.assert_async().await;
}

#[tokio::test]
async fn each_question_gets_an_answer_and_a_log_row() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let h = setup("According to the text, it is a Greek letter.").await;
    let questions = vec![
        "What is alpha?".to_string(),
        "What is beta?".to_string(),
        "What is gamma?".to_string(),
    ];

    let outcome = h
        .pipeline
        .run(&server.url("/doc.txt"), &questions)
        .await
        .unwrap();

    assert_eq!(outcome.answers.len(), 3);
    assert_eq!(h.model.calls(), 3);
    assert_eq!(log_rows(&h.pipeline.pool).await, 3);
    assert!(outcome.processing_time_ms >= 0);
}

#[tokio::test]
async fn cache_hit_skips_download_and_indexing() {
    let server = MockServer::start_async().await;
    let doc = server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let h = setup("Alpha.").await;
    let url = server.url("/doc.txt");
    let questions = vec!["What is alpha?".to_string()];

    h.pipeline.run(&url, &questions).await.unwrap();
    let document_embeds_after_first = h.embedder.document_calls.load(Ordering::SeqCst);

    h.pipeline.run(&url, &questions).await.unwrap();

    // Second request reuses the cache: no second fetch, no re-embedding of
    // document chunks, still a single cache row.
    assert_eq!(doc.hits_async().await, 1);
    assert_eq!(
        h.embedder.document_calls.load(Ordering::SeqCst),
        document_embeds_after_first
    );
    assert_eq!(cache_rows(&h.pipeline.pool).await, 1);
    assert_eq!(log_rows(&h.pipeline.pool).await, 2);
}

#[tokio::test]
async fn concurrent_first_requests_leave_a_single_cache_row() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let h = setup("Alpha.").await;
    let url = server.url("/doc.txt");
    let questions = vec!["What is alpha?".to_string()];

    let (a, b) = tokio::join!(
        h.pipeline.run(&url, &questions),
        h.pipeline.run(&url, &questions)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(cache_rows(&h.pipeline.pool).await, 1);
}

#[tokio::test]
async fn unsupported_extension_fails_before_fetch_and_leaves_no_rows() {
    let server = MockServer::start_async().await;
    let doc = server
        .mock_async(|when, then| {
            when.method(GET).path("/data.csv");
            then.status(200).body("a,b,c");
        })
        .await;

    let h = setup("irrelevant").await;
    let err = h
        .pipeline
        .run(&server.url("/data.csv"), &["What is this?".to_string()])
        .await
        .unwrap_err();

    assert!(err
        .chain()
        .any(|c| c.to_string().contains("Unsupported file type")));
    assert_eq!(doc.hits_async().await, 0);
    assert_eq!(cache_rows(&h.pipeline.pool).await, 0);
    assert_eq!(log_rows(&h.pipeline.pool).await, 0);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn oversized_document_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/big.txt");
            then.status(200).body("a".repeat(2 * 1024 * 1024));
        })
        .await;

    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("docqa.db");
    let mut config = test_config(&db_path);
    config.document.max_file_size_mb = 1;

    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let pipeline = Pipeline {
        config: Arc::new(config),
        pool: pool.clone(),
        http: reqwest::Client::new(),
        embedder: Arc::new(FakeEmbedder::new()),
        index: Arc::new(FakeIndex::default()),
        model: Arc::new(ScriptedModel::new("irrelevant")),
    };

    let err = pipeline
        .run(&server.url("/big.txt"), &["What is this?".to_string()])
        .await
        .unwrap_err();

    assert!(err.chain().any(|c| c.to_string().contains("File too large")));
    assert_eq!(cache_rows(&pool).await, 0);
    assert_eq!(log_rows(&pool).await, 0);
}

#[tokio::test]
async fn empty_retrieval_answers_without_calling_the_model() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("docqa.db");
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let model = Arc::new(ScriptedModel::new("should never be used"));
    let pipeline = Pipeline {
        config: Arc::new(test_config(&db_path)),
        pool: pool.clone(),
        http: reqwest::Client::new(),
        embedder: Arc::new(FakeEmbedder::new()),
        index: Arc::new(EmptyIndex),
        model: model.clone(),
    };

    let outcome = pipeline
        .run(&server.url("/doc.txt"), &["What is alpha?".to_string()])
        .await
        .unwrap();

    assert_eq!(outcome.answers[0].answer, NO_RELEVANT_CONTEXT_ANSWER);
    assert_eq!(outcome.answers[0].confidence, 0.0);
    assert!(outcome.answers[0].sources.is_empty());
    assert_eq!(model.calls(), 0);

    // Zero confidence is logged as NULL.
    let stored: Option<String> = sqlx::query_scalar("SELECT confidence_score FROM query_log")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn generation_failure_degrades_the_answer_but_not_the_request() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc.txt");
            then.status(200).body(DOC_BODY);
        })
        .await;

    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("docqa.db");
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let pipeline = Pipeline {
        config: Arc::new(test_config(&db_path)),
        pool: pool.clone(),
        http: reqwest::Client::new(),
        embedder: Arc::new(FakeEmbedder::new()),
        index: Arc::new(FakeIndex::default()),
        model: Arc::new(FailingModel),
    };

    let outcome = pipeline
        .run(&server.url("/doc.txt"), &["What is alpha?".to_string()])
        .await
        .unwrap();

    assert!(outcome.answers[0]
        .answer
        .contains("An error occurred while generating the answer"));
    assert_eq!(outcome.answers[0].confidence, 0.0);
    // Even degraded answers carry fallback source snippets.
    assert!(!outcome.answers[0].sources.is_empty());
    assert_eq!(log_rows(&pool).await, 1);
}

#[tokio::test]
async fn retrieval_is_scoped_to_the_requested_document() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/first.txt");
            then.status(200).body("The first document is about sailing ships.");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/second.txt");
            then.status(200).body("The second document is about steam engines.");
        })
        .await;

    let h = setup("It concerns engines.").await;
    let questions = vec!["What is it about?".to_string()];

    h.pipeline
        .run(&server.url("/first.txt"), &questions)
        .await
        .unwrap();
    h.pipeline
        .run(&server.url("/second.txt"), &questions)
        .await
        .unwrap();

    // The second request's prompt must contain only the second document.
    let prompts = h.model.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("steam engines"));
    assert!(!prompts[1].contains("sailing ships"));

    assert_eq!(cache_rows(&h.pipeline.pool).await, 2);
}

#[tokio::test]
async fn download_failure_surfaces_as_processing_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gone.txt");
            then.status(404);
        })
        .await;

    let h = setup("irrelevant").await;
    let err = h
        .pipeline
        .run(&server.url("/gone.txt"), &["What is this?".to_string()])
        .await
        .unwrap_err();

    assert!(err
        .chain()
        .any(|c| c.to_string().contains("Failed to download document")));
    assert_eq!(cache_rows(&h.pipeline.pool).await, 0);
    assert_eq!(log_rows(&h.pipeline.pool).await, 0);
}
