//! Core data types and error definitions for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::metadata::MetadataError;
use crate::object_store::ObjectStoreError;
use crate::store::StoreError;

/// Caller-facing state of an ingestion attempt.
///
/// These four values are the only status vocabulary callers branch on;
/// backend-internal detail passes through separately as `job_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// The backend accepted the records and is indexing asynchronously.
    IngestionStarted,
    /// Every record of the attempt is indexed and searchable.
    Completed,
    /// The attempt failed; the report carries the reason.
    Failed,
    /// Polling gave up before the backend reached a terminal state.
    TimedOut,
}

impl IngestionStatus {
    /// Whether the status can never change again.
    ///
    /// `TimedOut` is deliberately non-terminal: the backend job may still
    /// finish, so a later status check polls it again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Receipt returned when a document is submitted for ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    /// Deterministic identity of the ingested document.
    pub document_id: String,
    /// Fresh identifier for this ingestion attempt.
    pub ingestion_id: String,
    /// Status reported by the backend at submission time.
    pub status: IngestionStatus,
}

/// Point-in-time view of an ingestion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionStatusReport {
    /// Ingestion attempt being reported on.
    pub ingestion_id: String,
    /// Caller-facing status.
    pub status: IngestionStatus,
    /// Backend-internal state string, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
    /// Failure detail when the attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record describing the latest ingestion of a document.
///
/// Keyed by `document_id` in the metadata store and overwritten whole on
/// every re-ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Deterministic identity of the document.
    pub document_id: String,
    /// Bucket the source object lives in.
    pub bucket: String,
    /// Key of the source object.
    pub object_key: String,
    /// Content version token, present when content versioning is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Caller-supplied metadata attached to every chunk.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Most recent ingestion attempt for this document.
    pub last_ingestion_id: String,
    /// RFC3339 timestamp of the most recent submission.
    pub ingested_at: String,
}

/// Durable record tracking one ingestion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJobRecord {
    /// Identifier of this attempt.
    pub ingestion_id: String,
    /// Document the attempt belongs to.
    pub document_id: String,
    /// Registry name of the backend that received the records.
    pub backend: String,
    /// Backend job id, absent for synchronous backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Caller-facing status of the attempt.
    pub status: IngestionStatus,
    /// Last backend-internal state string observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
    /// RFC3339 timestamp of the submission.
    pub submitted_at: String,
    /// RFC3339 timestamp of the first observed terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Failure detail when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors emitted while ingesting a document.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source object could not be fetched.
    #[error("Failed to fetch source object: {0}")]
    Source(#[from] ObjectStoreError),
    /// Embedding generation failed; nothing was written.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The backend rejected or failed the write.
    #[error("Vector store request failed: {0}")]
    Store(#[from] StoreError),
    /// Bookkeeping records could not be written.
    #[error("Metadata store request failed: {0}")]
    Metadata(#[from] MetadataError),
}

/// Errors emitted while reporting the status of an ingestion attempt.
#[derive(Debug, Error)]
pub enum StatusError {
    /// No ingestion attempt is recorded under the id.
    #[error("Unknown ingestion id: {0}")]
    UnknownIngestion(String),
    /// Bookkeeping records could not be read or written.
    #[error("Metadata store request failed: {0}")]
    Metadata(#[from] MetadataError),
    /// The backend job lookup failed.
    #[error("Vector store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors emitted while looking up document metadata.
#[derive(Debug, Error)]
pub enum MetadataLookupError {
    /// No document record exists under the id.
    #[error("Unknown document id: {0}")]
    UnknownDocument(String),
    /// Bookkeeping records could not be read.
    #[error("Metadata store request failed: {0}")]
    Metadata(#[from] MetadataError),
}

/// Errors emitted while orchestrating similarity searches.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding the query text failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The backend search request failed.
    #[error("Vector store request failed: {0}")]
    Store(#[from] StoreError),
    /// The embedding response carried no vector for the query.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
}
