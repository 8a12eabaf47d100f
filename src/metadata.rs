//! Durable bookkeeping records kept in the metadata bucket.
//!
//! Document and ingestion records are stored as JSON under deterministic
//! keys, so every write is a whole-record overwrite and re-ingesting a
//! document never duplicates its entry. Any durable key-value medium
//! satisfies the interface; the shipped implementation rides on the
//! object store.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::pipeline::{DocumentRecord, IngestionJobRecord};

/// Errors raised while reading or writing bookkeeping records.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A record could not be encoded, or a stored record was not valid JSON.
    #[error("Metadata record is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The metadata bucket rejected a read or write.
    #[error("Metadata storage failed: {0}")]
    Storage(#[from] ObjectStoreError),
}

/// Keyed JSON persistence for document and ingestion records.
pub struct MetadataStore {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl MetadataStore {
    /// Bind the store to a bucket on the given object store.
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
        }
    }

    fn document_key(document_id: &str) -> String {
        format!("documents/{document_id}.json")
    }

    fn ingestion_key(ingestion_id: &str) -> String {
        format!("ingestions/{ingestion_id}.json")
    }

    async fn write_record<T: Serialize>(&self, key: &str, record: &T) -> Result<(), MetadataError> {
        let body = serde_json::to_vec(record)?;
        self.objects
            .put_object(&self.bucket, key, body, "application/json")
            .await?;
        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, MetadataError> {
        match self.objects.get_object_opt(&self.bucket, key).await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    /// Overwrite the document record keyed by its identity.
    pub async fn put_document(&self, record: &DocumentRecord) -> Result<(), MetadataError> {
        self.write_record(&Self::document_key(&record.document_id), record)
            .await
    }

    /// Read a document record, if the document was ever ingested.
    pub async fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, MetadataError> {
        self.read_record(&Self::document_key(document_id)).await
    }

    /// Overwrite the ingestion record keyed by its attempt id.
    pub async fn put_job(&self, record: &IngestionJobRecord) -> Result<(), MetadataError> {
        self.write_record(&Self::ingestion_key(&record.ingestion_id), record)
            .await
    }

    /// Read an ingestion record, if the attempt exists.
    pub async fn get_job(
        &self,
        ingestion_id: &str,
    ) -> Result<Option<IngestionJobRecord>, MetadataError> {
        self.read_record(&Self::ingestion_key(ingestion_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IngestionStatus;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryObjectStore {
        objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), ObjectStoreError> {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), body);
            Ok(())
        }
    }

    fn document(document_id: &str, last_ingestion_id: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: document_id.to_string(),
            bucket: "raw-docs".to_string(),
            object_key: "guides/onboarding.md".to_string(),
            version: None,
            metadata: Map::new(),
            last_ingestion_id: last_ingestion_id.to_string(),
            ingested_at: "2024-06-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn documents_round_trip_and_overwrite_in_place() {
        let objects = Arc::new(MemoryObjectStore::default());
        let store = MetadataStore::new(objects.clone(), "meta");

        store.put_document(&document("doc-1", "ing-1")).await.unwrap();
        store.put_document(&document("doc-1", "ing-2")).await.unwrap();

        let record = store.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(record.last_ingestion_id, "ing-2");
        assert_eq!(objects.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_records_read_as_none() {
        let store = MetadataStore::new(Arc::new(MemoryObjectStore::default()), "meta");
        assert!(store.get_document("absent").await.unwrap().is_none());
        assert!(store.get_job("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ingestion_records_keep_their_status() {
        let store = MetadataStore::new(Arc::new(MemoryObjectStore::default()), "meta");
        let record = IngestionJobRecord {
            ingestion_id: "ing-1".to_string(),
            document_id: "doc-1".to_string(),
            backend: "knowledge-base".to_string(),
            job_id: Some("job-9".to_string()),
            status: IngestionStatus::IngestionStarted,
            job_status: Some("IN_PROGRESS".to_string()),
            submitted_at: "2024-06-01T00:00:00Z".to_string(),
            completed_at: None,
            error: None,
        };
        store.put_job(&record).await.unwrap();

        let read = store.get_job("ing-1").await.unwrap().unwrap();
        assert_eq!(read.status, IngestionStatus::IngestionStarted);
        assert_eq!(read.job_id.as_deref(), Some("job-9"));
        assert!(read.completed_at.is_none());
    }
}
