//! Ingestion service coordinating fetch, chunking, embedding, and backend writes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::chunking::TextChunker;
use crate::config::{ConfigError, PipelineConfig, PollingSettings};
use crate::embedding::EmbeddingClient;
use crate::identity::{
    content_version, current_timestamp_rfc3339, derive_document_id, generate_ingestion_id,
    record_id,
};
use crate::metadata::MetadataStore;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::object_store::ObjectStore;
use crate::pipeline::types::{
    DocumentRecord, IngestError, IngestReceipt, IngestionJobRecord, IngestionStatus,
    IngestionStatusReport, MetadataLookupError, QueryError, StatusError,
};
use crate::store::{
    BackendRegistry, JobState, QueryHit, SearchRequest, StoreError, VectorRecord, VectorStore,
};

/// Coordinates the full ingestion pipeline: source fetch, chunking, embedding,
/// backend writes, and job bookkeeping.
///
/// The service owns long-lived handles to the vector store, the object store,
/// and the embedding client so that the HTTP surface and the batch CLI reuse
/// the same components. Construct it once near process start and share it
/// through an `Arc`.
pub struct IngestionService {
    store: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    embedding_client: Box<dyn EmbeddingClient>,
    metadata: MetadataStore,
    chunker: TextChunker,
    polling: PollingSettings,
    content_versioning: bool,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the ingestion pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Fetch, chunk, embed, and index one object from the source bucket.
    async fn ingest_document(
        &self,
        bucket: &str,
        object_key: &str,
        metadata: Map<String, Value>,
    ) -> Result<IngestReceipt, IngestError>;

    /// Report the current status of an ingestion attempt.
    async fn get_ingestion_status(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError>;

    /// Look up the persisted metadata record for a document.
    async fn get_document_metadata(
        &self,
        document_id: &str,
    ) -> Result<DocumentRecord, MetadataLookupError>;

    /// Remove every record of a document from the backend.
    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError>;

    /// Run a similarity search over the indexed chunks.
    async fn query_similar(
        &self,
        query_text: &str,
        top_k: usize,
        filters: Map<String, Value>,
    ) -> Result<Vec<QueryHit>, QueryError>;

    /// Poll an ingestion attempt until it is terminal or the budget runs out.
    async fn wait_for_completion(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

fn status_from_job_state(state: JobState) -> IngestionStatus {
    match state {
        JobState::Completed => IngestionStatus::Completed,
        JobState::Failed => IngestionStatus::Failed,
        JobState::Pending | JobState::Running => IngestionStatus::IngestionStarted,
    }
}

fn report_from(record: &IngestionJobRecord) -> IngestionStatusReport {
    IngestionStatusReport {
        ingestion_id: record.ingestion_id.clone(),
        status: record.status,
        job_status: record.job_status.clone(),
        error: record.error.clone(),
    }
}

impl IngestionService {
    /// Build the service from explicit collaborators.
    pub fn new(
        store: Arc<dyn VectorStore>,
        objects: Arc<dyn ObjectStore>,
        embedding_client: Box<dyn EmbeddingClient>,
        metadata: MetadataStore,
        chunker: TextChunker,
        polling: PollingSettings,
        content_versioning: bool,
    ) -> Self {
        Self {
            store,
            objects,
            embedding_client,
            metadata,
            chunker,
            polling,
            content_versioning,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Assemble the pipeline from configuration.
    ///
    /// Resolving the backend constructor through the registry is the first
    /// step, so an unregistered backend name fails here, before any network
    /// call is made.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &BackendRegistry,
        objects: Arc<dyn ObjectStore>,
        embedding_client: Box<dyn EmbeddingClient>,
    ) -> Result<Self, ConfigError> {
        let store = registry.create(&config.backend, config)?;
        let chunker = TextChunker::from_settings(&config.chunking)?;
        let metadata = MetadataStore::new(objects.clone(), &config.metadata_bucket);
        Ok(Self::new(
            store,
            objects,
            embedding_client,
            metadata,
            chunker,
            config.polling.clone(),
            config.content_versioning,
        ))
    }

    /// Provision the backend when needed (create the search index or the
    /// knowledge base). Called once at process start by the binaries.
    pub async fn ensure_backend_ready(&self) -> Result<(), StoreError> {
        self.store.ensure_ready().await
    }

    /// Fetch, chunk, embed, and index one object from the source bucket.
    pub async fn ingest_document(
        &self,
        bucket: &str,
        object_key: &str,
        metadata: Map<String, Value>,
    ) -> Result<IngestReceipt, IngestError> {
        match self.ingest_inner(bucket, object_key, metadata).await {
            Ok(receipt) => Ok(receipt),
            Err(error) => {
                self.metrics.record_failure();
                Err(error)
            }
        }
    }

    async fn ingest_inner(
        &self,
        bucket: &str,
        object_key: &str,
        metadata: Map<String, Value>,
    ) -> Result<IngestReceipt, IngestError> {
        let backend = self.store.backend_name();
        tracing::info!(bucket, key = object_key, backend, "Ingesting document");

        let content = self.objects.get_object(bucket, object_key).await?;
        let version = self.content_versioning.then(|| content_version(&content));
        let document_id = derive_document_id(bucket, object_key, version.as_deref());
        let ingestion_id = generate_ingestion_id();
        let text = String::from_utf8_lossy(&content).into_owned();

        let chunks = self.chunker.split(&text);
        let chunk_count = chunks.len();
        let (job_id, status) = if chunks.is_empty() {
            tracing::info!(document_id = %document_id, "Document produced no chunks; nothing to index");
            (None, IngestionStatus::Completed)
        } else {
            let vectors = if self.store.embeds_on_write() {
                vec![None; chunk_count]
            } else {
                let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
                let embedded = self.embedding_client.embed(&texts).await?;
                debug_assert_eq!(embedded.len(), chunk_count);
                embedded.into_iter().map(Some).collect()
            };

            let records: Vec<VectorRecord> = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| VectorRecord {
                    record_id: record_id(&document_id, chunk.index),
                    document_id: document_id.clone(),
                    chunk_index: chunk.index,
                    vector,
                    text: chunk.text,
                    metadata: metadata.clone(),
                })
                .collect();

            let handle = self.store.add_documents(records).await?;
            (handle.job_id, status_from_job_state(handle.state))
        };

        let submitted_at = current_timestamp_rfc3339();
        self.metadata
            .put_job(&IngestionJobRecord {
                ingestion_id: ingestion_id.clone(),
                document_id: document_id.clone(),
                backend: backend.to_string(),
                job_id,
                status,
                job_status: None,
                submitted_at: submitted_at.clone(),
                completed_at: status.is_terminal().then(|| submitted_at.clone()),
                error: None,
            })
            .await?;
        self.metadata
            .put_document(&DocumentRecord {
                document_id: document_id.clone(),
                bucket: bucket.to_string(),
                object_key: object_key.to_string(),
                version,
                metadata,
                last_ingestion_id: ingestion_id.clone(),
                ingested_at: submitted_at,
            })
            .await?;

        self.metrics.record_document(chunk_count as u64);
        tracing::info!(
            document_id = %document_id,
            ingestion_id = %ingestion_id,
            chunks = chunk_count,
            status = ?status,
            "Document submitted"
        );

        Ok(IngestReceipt {
            document_id,
            ingestion_id,
            status,
        })
    }

    /// Report the current status of an ingestion attempt.
    ///
    /// Terminal attempts are answered from the metadata store alone. For an
    /// attempt still in flight the backend job is polled once and the
    /// observed transition is persisted; a persisted terminal status is never
    /// overwritten by a non-terminal one.
    pub async fn get_ingestion_status(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError> {
        let Some(record) = self.metadata.get_job(ingestion_id).await? else {
            return Err(StatusError::UnknownIngestion(ingestion_id.to_string()));
        };
        if record.status.is_terminal() {
            return Ok(report_from(&record));
        }
        let Some(job_id) = record.job_id.clone() else {
            return Ok(report_from(&record));
        };

        let job = self.store.job_status(&job_id).await?;
        let status = status_from_job_state(job.state);
        tracing::debug!(
            ingestion_id,
            job_id = %job_id,
            state = ?job.state,
            "Polled backend job"
        );

        let mut updated = record;
        updated.status = status;
        updated.job_status = job.detail.clone();
        if status == IngestionStatus::Failed {
            updated.error = job.detail;
        }
        if status.is_terminal() && updated.completed_at.is_none() {
            updated.completed_at = Some(current_timestamp_rfc3339());
        }
        self.metadata.put_job(&updated).await?;
        Ok(report_from(&updated))
    }

    /// Look up the persisted metadata record for a document.
    pub async fn get_document_metadata(
        &self,
        document_id: &str,
    ) -> Result<DocumentRecord, MetadataLookupError> {
        self.metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| MetadataLookupError::UnknownDocument(document_id.to_string()))
    }

    /// Remove every record of a document from the backend.
    ///
    /// The metadata records stay behind as provenance of past attempts.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete_document(document_id).await?;
        tracing::info!(document_id, removed, "Document delete requested");
        Ok(removed)
    }

    /// Run a similarity search over the indexed chunks.
    ///
    /// The query text is embedded client-side only when the backend lacks
    /// server-side embedding. Hits come back ordered by descending score with
    /// ties broken by ascending document id; an empty store answers with an
    /// empty list.
    pub async fn query_similar(
        &self,
        query_text: &str,
        top_k: usize,
        filters: Map<String, Value>,
    ) -> Result<Vec<QueryHit>, QueryError> {
        let vector = if self.store.embeds_on_write() {
            None
        } else {
            let mut vectors = self
                .embedding_client
                .embed(&[query_text.to_string()])
                .await?;
            Some(vectors.pop().ok_or(QueryError::EmptyEmbedding)?)
        };

        let request = SearchRequest {
            text: query_text.to_string(),
            vector,
            top_k,
            filters,
        };
        let mut hits = self.store.similarity_search(&request).await?;
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        self.metrics.record_query();
        tracing::debug!(top_k, hits = hits.len(), "Similarity query answered");
        Ok(hits)
    }

    /// Poll an ingestion attempt to a terminal state, bounded by the polling
    /// settings.
    ///
    /// Checks the status every `retry_delay`, up to `max_retries` times. When
    /// the budget runs out the attempt is marked `timed_out` and reported
    /// without raising; the job stays re-checkable. Dropping the returned
    /// future abandons the wait with no backend side effects.
    pub async fn wait_for_completion(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError> {
        let delay = self.polling.retry_delay();
        for attempt in 0..self.polling.max_retries {
            let report = self.get_ingestion_status(ingestion_id).await?;
            if report.status.is_terminal() {
                return Ok(report);
            }
            tracing::debug!(ingestion_id, attempt, status = ?report.status, "Ingestion still in flight");
            if attempt + 1 < self.polling.max_retries {
                tokio::time::sleep(delay).await;
            }
        }

        let Some(mut record) = self.metadata.get_job(ingestion_id).await? else {
            return Err(StatusError::UnknownIngestion(ingestion_id.to_string()));
        };
        // The job may have finished between the last poll and this read.
        if !record.status.is_terminal() {
            record.status = IngestionStatus::TimedOut;
            self.metadata.put_job(&record).await?;
            tracing::warn!(
                ingestion_id,
                polls = self.polling.max_retries,
                "Polling budget exhausted before the backend finished"
            );
        }
        Ok(report_from(&record))
    }

    /// Return the current ingestion metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl IngestApi for IngestionService {
    async fn ingest_document(
        &self,
        bucket: &str,
        object_key: &str,
        metadata: Map<String, Value>,
    ) -> Result<IngestReceipt, IngestError> {
        IngestionService::ingest_document(self, bucket, object_key, metadata).await
    }

    async fn get_ingestion_status(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError> {
        IngestionService::get_ingestion_status(self, ingestion_id).await
    }

    async fn get_document_metadata(
        &self,
        document_id: &str,
    ) -> Result<DocumentRecord, MetadataLookupError> {
        IngestionService::get_document_metadata(self, document_id).await
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        IngestionService::delete_document(self, document_id).await
    }

    async fn query_similar(
        &self,
        query_text: &str,
        top_k: usize,
        filters: Map<String, Value>,
    ) -> Result<Vec<QueryHit>, QueryError> {
        IngestionService::query_similar(self, query_text, top_k, filters).await
    }

    async fn wait_for_completion(
        &self,
        ingestion_id: &str,
    ) -> Result<IngestionStatusReport, StatusError> {
        IngestionService::wait_for_completion(self, ingestion_id).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        IngestionService::metrics_snapshot(self)
    }
}
