//! Vector store abstraction, registry, and backend adapters.
//!
//! Backends are interchangeable behind [`VectorStore`]; they differ in
//! consistency model. Job-based backends acknowledge writes with a pending
//! job that is polled to completion, synchronous backends index inline and
//! report completion immediately. The orchestrator never branches on a
//! backend's name; capabilities are expressed on the trait.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod knowledge_base;
mod opensearch;
mod registry;

pub use knowledge_base::KnowledgeBaseStore;
pub use opensearch::OpenSearchStore;
pub use registry::{BackendConstructor, BackendRegistry};

/// One chunk prepared for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Stable identifier, deterministic per document and chunk position.
    pub record_id: String,
    /// Identity of the owning document.
    pub document_id: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Client-side embedding; `None` when the backend embeds on write.
    pub vector: Option<Vec<f32>>,
    /// Chunk text.
    pub text: String,
    /// Caller metadata propagated to search hits.
    pub metadata: Map<String, Value>,
}

/// Search request resolved by the orchestrator before dispatch.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Raw query text, used by backends that embed server-side.
    pub text: String,
    /// Query vector, present when the backend needs client-side embeddings.
    pub vector: Option<Vec<f32>>,
    /// Maximum number of hits to return.
    pub top_k: usize,
    /// Exact-match metadata constraints.
    pub filters: Map<String, Value>,
}

/// One scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    /// Backend similarity score; higher is closer.
    pub score: f32,
    /// Chunk text, returned for provenance.
    pub text: String,
    /// Identity of the document the chunk belongs to.
    pub document_id: String,
    /// Position of the chunk within its document, when the backend reports it.
    pub chunk_index: Option<usize>,
    /// Caller metadata stored with the record.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Lifecycle of a backend indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Accepted but not yet picked up.
    Pending,
    /// Indexing in progress.
    Running,
    /// All records indexed.
    Completed,
    /// The backend gave up on the job.
    Failed,
}

impl JobState {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of submitting records to a backend.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Backend job identifier; `None` for synchronous backends.
    pub job_id: Option<String>,
    /// State reported at submission.
    pub state: JobState,
}

/// Point-in-time view of a backend indexing job.
#[derive(Debug, Clone)]
pub struct BackendJob {
    /// Mapped lifecycle state.
    pub state: JobState,
    /// Raw backend status or failure detail, passed through opaquely.
    pub detail: Option<String>,
}

/// Errors surfaced by vector store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected a write.
    #[error("{backend} rejected the write: {reason}")]
    WriteRejected {
        /// Backend that refused.
        backend: &'static str,
        /// Reason reported by the backend.
        reason: String,
    },
    /// The backend answered with a status the adapter does not handle.
    #[error("{backend} returned {status}: {body}")]
    UnexpectedStatus {
        /// Backend that answered.
        backend: &'static str,
        /// HTTP status received.
        status: StatusCode,
        /// Response body, truncated for logging.
        body: String,
    },
    /// An ingestion job id is not known to the backend.
    #[error("{backend} does not know ingestion job {job_id}")]
    UnknownJob {
        /// Backend that was asked.
        backend: &'static str,
        /// Job id that was looked up.
        job_id: String,
    },
    /// The store's backing resources have not been provisioned yet.
    #[error("{backend} is not provisioned; call ensure_ready first")]
    NotProvisioned {
        /// Backend missing its resources.
        backend: &'static str,
    },
    /// A write or query reached a vector-requiring backend without one.
    #[error("{backend} requires client-side vectors but {what} has none")]
    MissingVector {
        /// Backend that needs vectors.
        backend: &'static str,
        /// What lacked the vector (a record id or the query).
        what: String,
    },
    /// Transport-level failure.
    #[error("Vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Uniform interface over interchangeable vector-search backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Registry name of the backend.
    fn backend_name(&self) -> &'static str;

    /// Whether the backend embeds text server-side on write and query.
    ///
    /// When true, the pipeline skips client-side embedding entirely and
    /// submits raw text.
    fn embeds_on_write(&self) -> bool;

    /// Provision backing resources (index, knowledge base) when absent.
    async fn ensure_ready(&self) -> Result<(), StoreError>;

    /// Submit records for indexing.
    ///
    /// Job-based backends return a pending handle carrying the job id;
    /// synchronous backends return `Completed` with no id.
    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<JobHandle, StoreError>;

    /// Report the current state of an indexing job.
    async fn job_status(&self, job_id: &str) -> Result<BackendJob, StoreError>;

    /// Rank stored chunks against the query.
    ///
    /// An empty or missing index answers with an empty list, never an error.
    async fn similarity_search(&self, request: &SearchRequest)
    -> Result<Vec<QueryHit>, StoreError>;

    /// Remove every record belonging to `document_id`.
    ///
    /// Returns `true` when anything was removed.
    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError>;
}

impl std::fmt::Debug for dyn VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("backend", &self.backend_name())
            .finish()
    }
}
