use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::jobs::{JobKind, JobRecord};
use crate::state::AppState;
use crate::vector_store::StoredChunk;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/process/documents", post(process_documents))
        .route("/process/website", post(process_website))
        .route("/process/all", post(process_all))
        .route("/process/jobs", get(list_jobs))
        .route("/process/jobs/:job_id", get(get_job))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind `bind_address` and serve until the process exits
pub async fn serve(state: Arc<AppState>, bind_address: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "RAG Customer Support Chatbot API" }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "pipeline_ready": state.pipeline_ready(),
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<StoredChunk>,
    confidence: &'static str,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".into()));
    }

    let pipeline = state.pipeline().await?;
    let result = pipeline
        .answer_question(&request.question)
        .await
        .map_err(|e| ApiError::internal(format!("{:#}", e)))?;

    let confidence = if result.sources.is_empty() {
        "low"
    } else {
        "high"
    };
    Ok(Json(ChatResponse {
        answer: result.answer,
        sources: result.sources,
        confidence,
    }))
}

#[derive(Debug, Deserialize)]
struct ProcessDocumentsRequest {
    pdf_directory: PathBuf,
    output_directory: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ScrapeWebsiteRequest {
    base_url: String,
    output_directory: PathBuf,
}

async fn process_documents(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessDocumentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = JobKind::Documents {
        pdf_directory: request.pdf_directory,
        output_directory: request.output_directory,
    };
    accept(&state, kind, "Document processing started in background").await
}

async fn process_website(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScrapeWebsiteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = JobKind::Website {
        base_url: request.base_url,
        output_directory: request.output_directory,
    };
    accept(&state, kind, "Website scraping started in background").await
}

async fn process_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    accept(
        &state,
        JobKind::All,
        "Processing all documents and websites started in background",
    )
    .await
}

async fn accept(
    state: &AppState,
    kind: JobKind,
    message: &str,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.jobs.submit(kind).await.map_err(ApiError::internal)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": message,
            "job_id": record.id,
            "status": record.status,
        })),
    ))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.jobs.list().await)
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .jobs
        .get(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}
