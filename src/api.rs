//! HTTP surface for the ingestion pipeline.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /documents` – Ingest one object from the source bucket; returns
//!   `{document_id, ingestion_id, status}`.
//! - `GET /ingestions/:id` – Report the status of an ingestion attempt,
//!   polling the backend job once when the attempt is still in flight.
//! - `GET /documents/:id` – Return the persisted metadata record for a
//!   document.
//! - `DELETE /documents/:id` – Remove every indexed record of a document.
//! - `POST /query` – Similarity search over the indexed chunks.
//! - `GET /metrics` – Observe ingestion and query counters.
//!
//! The HTTP surface shares the pipeline with the `bulk-ingest` CLI, so
//! behavior is identical across interfaces.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::object_store::ObjectStoreError;
use crate::pipeline::{
    DocumentRecord, IngestApi, IngestError, IngestReceipt, IngestionStatusReport,
    MetadataLookupError, QueryError, StatusError,
};
use crate::store::{QueryHit, StoreError};

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: IngestApi + 'static,
{
    Router::new()
        .route("/documents", post(ingest::<S>))
        .route(
            "/documents/:id",
            get(document_metadata::<S>).delete(remove_document::<S>),
        )
        .route("/ingestions/:id", get(ingestion_status::<S>))
        .route("/query", post(run_query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for the `POST /documents` endpoint.
#[derive(Deserialize)]
struct IngestRequest {
    /// Bucket holding the source object.
    bucket: String,
    /// Key of the source object.
    object_key: String,
    /// Optional metadata attached to every chunk of the document.
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Ingest one object from the source bucket.
async fn ingest<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestReceipt>, AppError>
where
    S: IngestApi,
{
    let IngestRequest {
        bucket,
        object_key,
        metadata,
    } = request;
    let receipt = service
        .ingest_document(&bucket, &object_key, metadata)
        .await?;
    tracing::info!(
        document_id = %receipt.document_id,
        ingestion_id = %receipt.ingestion_id,
        status = ?receipt.status,
        "Ingest request completed"
    );
    Ok(Json(receipt))
}

/// Report the status of an ingestion attempt.
async fn ingestion_status<S>(
    State(service): State<Arc<S>>,
    Path(ingestion_id): Path<String>,
) -> Result<Json<IngestionStatusReport>, AppError>
where
    S: IngestApi,
{
    let report = service.get_ingestion_status(&ingestion_id).await?;
    Ok(Json(report))
}

/// Return the persisted metadata record for a document.
async fn document_metadata<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentRecord>, AppError>
where
    S: IngestApi,
{
    let record = service.get_document_metadata(&document_id).await?;
    Ok(Json(record))
}

/// Response body for `DELETE /documents/:id`.
#[derive(Serialize)]
struct DeleteResponse {
    /// Whether any indexed record was removed.
    deleted: bool,
}

/// Remove every indexed record of a document.
async fn remove_document<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError>
where
    S: IngestApi,
{
    let deleted = service.delete_document(&document_id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// Request body for the `POST /query` endpoint.
#[derive(Deserialize)]
struct QueryRequest {
    /// Natural language query text.
    query: String,
    /// Maximum number of hits to return.
    #[serde(default = "default_top_k")]
    top_k: usize,
    /// Exact-match filters applied to chunk metadata.
    #[serde(default)]
    filters: Map<String, Value>,
}

fn default_top_k() -> usize {
    5
}

/// Response body for `POST /query`.
#[derive(Serialize)]
struct QueryResponse {
    results: Vec<QueryHit>,
}

/// Run a similarity search over the indexed chunks.
async fn run_query<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: IngestApi,
{
    let QueryRequest {
        query,
        top_k,
        filters,
    } = request;
    let results = service.query_similar(&query, top_k, filters).await?;
    Ok(Json(QueryResponse { results }))
}

/// Return the current ingestion and query counters.
async fn get_metrics<S>(
    State(service): State<Arc<S>>,
) -> Json<crate::metrics::MetricsSnapshot>
where
    S: IngestApi,
{
    Json(service.metrics_snapshot())
}

enum AppError {
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match &error {
            IngestError::Source(ObjectStoreError::NotFound { .. }) => {
                Self::NotFound(error.to_string())
            }
            _ => Self::Internal(error.to_string()),
        }
    }
}

impl From<StatusError> for AppError {
    fn from(error: StatusError) -> Self {
        match &error {
            StatusError::UnknownIngestion(_) => Self::NotFound(error.to_string()),
            _ => Self::Internal(error.to_string()),
        }
    }
}

impl From<MetadataLookupError> for AppError {
    fn from(error: MetadataLookupError) -> Self {
        match &error {
            MetadataLookupError::UnknownDocument(_) => Self::NotFound(error.to_string()),
            _ => Self::Internal(error.to_string()),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}
