//! HTTP API server.
//!
//! Exposes the question-answering pipeline over JSON HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/api/v1/ask` | bearer | Ingest a document and answer questions |
//! | `GET`  | `/api/v1/health` | none | Health check (service name + version) |
//! | `GET`  | `/api/v1/stats` | bearer | Vector index statistics |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "success": false, "error": "Internal server error", "details": "..." }
//! ```
//!
//! Authentication failures are rejected with 401 before any processing,
//! validation failures with 400, and pipeline failures with 500. The raw
//! error message is always included in `details`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::models::{AnsweredQuestion, IndexStats};
use crate::pipeline::Pipeline;

const MAX_QUESTIONS: usize = 10;
const MAX_QUESTION_CHARS: usize = 1000;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    /// The bearer token secret requests must present.
    bearer_token: Arc<String>,
}

/// Start the HTTP server. Runs until the process is terminated.
pub async fn run_server(pipeline: Pipeline, bearer_token: String) -> anyhow::Result<()> {
    let bind_addr = pipeline.config.server.bind.clone();

    let state = AppState {
        pipeline,
        bearer_token: Arc::new(bearer_token),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/ask", post(handle_ask))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/stats", get(handle_stats))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error envelope shared by all failure responses.
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        error: "Invalid authentication credentials".to_string(),
        details: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        error: "Validation error".to_string(),
        details: Some(message.into()),
    }
}

fn internal_error(details: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        error: "Internal server error".to_string(),
        details: Some(details.into()),
    }
}

/// Check the `Authorization: Bearer <token>` header against the configured
/// secret. Rejected requests never reach the pipeline.
fn check_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(unauthorized()),
    }
}

// ============ POST /api/v1/ask ============

#[derive(Debug, Deserialize)]
struct QuestionItem {
    question: String,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    document_url: String,
    questions: Vec<QuestionItem>,
}

#[derive(Serialize)]
struct AskResponse {
    success: bool,
    document_url: String,
    answers: Vec<AnsweredQuestion>,
    processing_time_ms: i64,
}

/// Validate the request shape before any processing: the URL must parse and
/// the question list must hold 1–10 questions of 1–1000 characters each.
fn validate_ask_request(request: &AskRequest) -> Result<Vec<String>, String> {
    reqwest::Url::parse(&request.document_url)
        .map_err(|e| format!("document_url is not a valid URL: {}", e))?;

    if request.questions.is_empty() {
        return Err("questions must contain at least 1 item".to_string());
    }
    if request.questions.len() > MAX_QUESTIONS {
        return Err(format!(
            "questions must contain at most {} items",
            MAX_QUESTIONS
        ));
    }

    let mut questions = Vec::with_capacity(request.questions.len());
    for (i, item) in request.questions.iter().enumerate() {
        let trimmed = item.question.trim();
        if trimmed.is_empty() {
            return Err(format!("questions[{}] must not be empty", i));
        }
        if trimmed.chars().count() > MAX_QUESTION_CHARS {
            return Err(format!(
                "questions[{}] exceeds {} characters",
                i, MAX_QUESTION_CHARS
            ));
        }
        questions.push(trimmed.to_string());
    }

    Ok(questions)
}

async fn handle_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    check_bearer(&headers, &state.bearer_token)?;

    let questions = validate_ask_request(&request).map_err(bad_request)?;

    let outcome = state
        .pipeline
        .run(&request.document_url, &questions)
        .await
        .map_err(|e| {
            error!(error = ?e, "request failed");
            internal_error(e.to_string())
        })?;

    Ok(Json(AskResponse {
        success: true,
        document_url: outcome.document_url,
        answers: outcome.answers,
        processing_time_ms: outcome.processing_time_ms,
    }))
}

// ============ GET /api/v1/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "docqa".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/v1/stats ============

#[derive(Serialize)]
struct StatsResponse {
    vector_store: IndexStats,
    status: String,
}

async fn handle_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    check_bearer(&headers, &state.bearer_token)?;

    let stats = state.pipeline.index.stats().await;
    let status = match &stats {
        IndexStats::Ready { .. } => "operational",
        IndexStats::Unavailable { .. } => "error",
    };

    Ok(Json(StatsResponse {
        vector_store: stats,
        status: status.to_string(),
    }))
}
