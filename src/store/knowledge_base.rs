//! Job-based knowledge-base backend adapter.
//!
//! Writes are acknowledged with an ingestion job that indexes in the
//! background; callers poll the job to completion. Text is embedded
//! server-side, so records are submitted without vectors and queries are
//! answered from raw text. When no knowledge base id is configured,
//! `ensure_ready` provisions one and remembers the returned id.

use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{ConfigError, KnowledgeBaseSettings, PipelineConfig};
use crate::store::{
    BackendJob, JobHandle, JobState, QueryHit, SearchRequest, StoreError, VectorRecord, VectorStore,
};

/// Provisioning inputs held until `ensure_ready` creates the knowledge base.
#[derive(Debug)]
struct ProvisionSpec {
    name: String,
    role_arn: String,
}

/// REST adapter for a managed knowledge-base service.
#[derive(Debug)]
pub struct KnowledgeBaseStore {
    client: Client,
    base_url: String,
    /// Resolved id; preset from config or filled in by provisioning.
    kb_id: OnceLock<String>,
    provisioning: Option<ProvisionSpec>,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    knowledge_base_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    failure_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    results: Vec<RetrieveHit>,
}

#[derive(Debug, Deserialize)]
struct RetrieveHit {
    score: f32,
    text: String,
    document_id: String,
    #[serde(default)]
    chunk_index: Option<usize>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl KnowledgeBaseStore {
    /// Registry name of this backend.
    pub const BACKEND_NAME: &'static str = "knowledge-base";

    /// Build the adapter from the top-level configuration document.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let settings = config
            .knowledge_base
            .as_ref()
            .ok_or(ConfigError::MissingSection("knowledge_base"))?;
        Self::from_settings(settings)
    }

    /// Build the adapter from its settings section.
    ///
    /// Without a configured `kb_id`, provisioning inputs (`kb_name` and
    /// `role_arn`) are required so `ensure_ready` can create the knowledge
    /// base.
    pub fn from_settings(settings: &KnowledgeBaseSettings) -> Result<Self, ConfigError> {
        let kb_id = OnceLock::new();
        let provisioning = match &settings.kb_id {
            Some(id) => {
                let _ = kb_id.set(id.clone());
                None
            }
            None => {
                let name = settings
                    .kb_name
                    .clone()
                    .ok_or(ConfigError::MissingField("knowledge_base.kb_name"))?;
                let role_arn = settings
                    .role_arn
                    .clone()
                    .ok_or(ConfigError::MissingField("knowledge_base.role_arn"))?;
                Some(ProvisionSpec { name, role_arn })
            }
        };

        Ok(Self {
            client: Client::new(),
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            kb_id,
            provisioning,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let path = path.trim_start_matches('/');
        self.client
            .request(method, format!("{}/{path}", self.base_url))
    }

    fn resolved_kb_id(&self) -> Result<&str, StoreError> {
        self.kb_id
            .get()
            .map(String::as_str)
            .ok_or(StoreError::NotProvisioned {
                backend: Self::BACKEND_NAME,
            })
    }

    async fn unexpected(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::UnexpectedStatus {
            backend: Self::BACKEND_NAME,
            status,
            body: body.chars().take(500).collect(),
        }
    }
}

/// Map a backend status string onto the job lifecycle.
///
/// Unknown intermediate strings stay `Running` so a vocabulary drift on the
/// backend never flips a job to failed spuriously.
fn map_job_state(status: &str) -> JobState {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "STARTING" | "QUEUED" => JobState::Pending,
        "RUNNING" | "IN_PROGRESS" => JobState::Running,
        "COMPLETE" | "COMPLETED" => JobState::Completed,
        "FAILED" => JobState::Failed,
        other => {
            tracing::warn!(status = other, "Unrecognized ingestion job status");
            JobState::Running
        }
    }
}

#[async_trait]
impl VectorStore for KnowledgeBaseStore {
    fn backend_name(&self) -> &'static str {
        Self::BACKEND_NAME
    }

    fn embeds_on_write(&self) -> bool {
        true
    }

    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.kb_id.get().is_some() {
            return Ok(());
        }
        let Some(spec) = &self.provisioning else {
            return Err(StoreError::NotProvisioned {
                backend: Self::BACKEND_NAME,
            });
        };

        let response = self
            .request(Method::POST, "knowledge-bases")
            .json(&json!({ "name": spec.name, "role_arn": spec.role_arn }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }
        let payload: ProvisionResponse = response.json().await?;
        tracing::info!(
            kb_id = %payload.knowledge_base_id,
            name = %spec.name,
            "Provisioned knowledge base"
        );
        let _ = self.kb_id.set(payload.knowledge_base_id);
        Ok(())
    }

    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<JobHandle, StoreError> {
        let kb_id = self.resolved_kb_id()?;
        let documents: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "record_id": record.record_id,
                    "document_id": record.document_id,
                    "chunk_index": record.chunk_index,
                    "text": record.text,
                    "metadata": record.metadata,
                })
            })
            .collect();
        let count = documents.len();

        let response = self
            .request(
                Method::POST,
                &format!("knowledge-bases/{kb_id}/ingestion-jobs"),
            )
            .json(&json!({ "documents": documents }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::WriteRejected {
                backend: Self::BACKEND_NAME,
                reason: format!("{status}: {}", body.chars().take(500).collect::<String>()),
            });
        }

        let payload: SubmitResponse = response.json().await?;
        let state = payload.status.as_deref().map_or(JobState::Pending, map_job_state);
        tracing::debug!(job_id = %payload.job_id, records = count, "Submitted ingestion job");
        Ok(JobHandle {
            job_id: Some(payload.job_id),
            state,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<BackendJob, StoreError> {
        let kb_id = self.resolved_kb_id()?;
        let response = self
            .request(
                Method::GET,
                &format!("knowledge-bases/{kb_id}/ingestion-jobs/{job_id}"),
            )
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::UnknownJob {
                backend: Self::BACKEND_NAME,
                job_id: job_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }

        let payload: JobStatusResponse = response.json().await?;
        let state = map_job_state(&payload.status);
        let detail = if payload.failure_reasons.is_empty() {
            Some(payload.status)
        } else {
            Some(format!(
                "{}: {}",
                payload.status,
                payload.failure_reasons.join("; ")
            ))
        };
        Ok(BackendJob { state, detail })
    }

    async fn similarity_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let kb_id = self.resolved_kb_id()?;
        let mut body = json!({
            "query": request.text,
            "top_k": request.top_k,
        });
        if !request.filters.is_empty() {
            body.as_object_mut()
                .expect("retrieve body should remain an object")
                .insert("filters".into(), Value::Object(request.filters.clone()));
        }

        let response = self
            .request(Method::POST, &format!("knowledge-bases/{kb_id}/retrieve"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }

        let payload: RetrieveResponse = response.json().await?;
        Ok(payload
            .results
            .into_iter()
            .map(|hit| QueryHit {
                score: hit.score,
                text: hit.text,
                document_id: hit.document_id,
                chunk_index: hit.chunk_index,
                metadata: hit.metadata,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let kb_id = self.resolved_kb_id()?;
        let response = self
            .request(
                Method::DELETE,
                &format!("knowledge-bases/{kb_id}/documents/{document_id}"),
            )
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::unexpected(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(endpoint: &str, kb_id: Option<&str>) -> KnowledgeBaseSettings {
        KnowledgeBaseSettings {
            endpoint: endpoint.to_string(),
            kb_id: kb_id.map(str::to_string),
            kb_name: Some("ragline-kb".to_string()),
            role_arn: Some("arn:aws:iam::123456789012:role/ragline-ingest".to_string()),
        }
    }

    fn record(document_id: &str, chunk_index: usize, text: &str) -> VectorRecord {
        VectorRecord {
            record_id: format!("{document_id}:{chunk_index}"),
            document_id: document_id.to_string(),
            chunk_index,
            vector: None,
            text: text.to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn submit_returns_pending_handle() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/knowledge-bases/kb-7/ingestion-jobs")
                    .json_body(json!({
                        "documents": [{
                            "record_id": "doc-1:0",
                            "document_id": "doc-1",
                            "chunk_index": 0,
                            "text": "hello world",
                            "metadata": {}
                        }]
                    }));
                then.status(202)
                    .json_body(json!({"job_id": "job-41", "status": "PENDING"}));
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        let handle = store
            .add_documents(vec![record("doc-1", 0, "hello world")])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(handle.job_id.as_deref(), Some("job-41"));
        assert_eq!(handle.state, JobState::Pending);
    }

    #[tokio::test]
    async fn rejected_writes_surface_the_backend_reason() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/knowledge-bases/kb-7/ingestion-jobs");
                then.status(422).body("document too large");
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        let error = store
            .add_documents(vec![record("doc-1", 0, "hello")])
            .await
            .unwrap_err();

        match error {
            StoreError::WriteRejected { backend, reason } => {
                assert_eq!(backend, "knowledge-base");
                assert!(reason.contains("document too large"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn job_status_maps_lifecycle_states() {
        let server = MockServer::start_async().await;
        for (job_id, status) in [
            ("job-p", "PENDING"),
            ("job-r", "IN_PROGRESS"),
            ("job-c", "COMPLETE"),
        ] {
            server
                .mock_async(move |when, then| {
                    when.method(GET)
                        .path(format!("/knowledge-bases/kb-7/ingestion-jobs/{job_id}"));
                    then.status(200).json_body(json!({"status": status}));
                })
                .await;
        }
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/knowledge-bases/kb-7/ingestion-jobs/job-f");
                then.status(200).json_body(json!({
                    "status": "FAILED",
                    "failure_reasons": ["embedding quota exceeded"]
                }));
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();

        assert_eq!(store.job_status("job-p").await.unwrap().state, JobState::Pending);
        assert_eq!(store.job_status("job-r").await.unwrap().state, JobState::Running);
        assert_eq!(store.job_status("job-c").await.unwrap().state, JobState::Completed);

        let failed = store.job_status("job-f").await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.detail.unwrap().contains("embedding quota exceeded"));
    }

    #[tokio::test]
    async fn unknown_status_strings_stay_running() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/knowledge-bases/kb-7/ingestion-jobs/job-x");
                then.status(200).json_body(json!({"status": "REBALANCING"}));
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        let job = store.job_status("job-x").await.unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.detail.as_deref(), Some("REBALANCING"));
    }

    #[tokio::test]
    async fn missing_job_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/knowledge-bases/kb-7/ingestion-jobs/job-missing");
                then.status(404);
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        let error = store.job_status("job-missing").await.unwrap_err();
        assert!(matches!(error, StoreError::UnknownJob { .. }));
    }

    #[tokio::test]
    async fn retrieve_sends_filters_and_maps_hits() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/knowledge-bases/kb-7/retrieve")
                    .json_body(json!({
                        "query": "rotation policy",
                        "top_k": 2,
                        "filters": {"team": "sre"}
                    }));
                then.status(200).json_body(json!({
                    "results": [
                        {
                            "score": 0.91,
                            "text": "rotate keys quarterly",
                            "document_id": "doc-9",
                            "chunk_index": 3,
                            "metadata": {"team": "sre"}
                        }
                    ]
                }));
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        let mut filters = Map::new();
        filters.insert("team".to_string(), Value::String("sre".to_string()));
        let hits = store
            .similarity_search(&SearchRequest {
                text: "rotation policy".to_string(),
                vector: None,
                top_k: 2,
                filters,
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc-9");
        assert_eq!(hits[0].chunk_index, Some(3));
        assert!((hits[0].score - 0.91).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn delete_reports_removed_or_absent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/knowledge-bases/kb-7/documents/doc-present");
                then.status(200).json_body(json!({"deleted": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/knowledge-bases/kb-7/documents/doc-absent");
                then.status(404);
            })
            .await;

        let store = KnowledgeBaseStore::from_settings(&settings(&server.base_url(), Some("kb-7")))
            .unwrap();
        assert!(store.delete_document("doc-present").await.unwrap());
        assert!(!store.delete_document("doc-absent").await.unwrap());
    }

    #[tokio::test]
    async fn provisioning_runs_once_and_caches_the_id() {
        let server = MockServer::start_async().await;
        let provision = server
            .mock_async(|when, then| {
                when.method(POST).path("/knowledge-bases").json_body(json!({
                    "name": "ragline-kb",
                    "role_arn": "arn:aws:iam::123456789012:role/ragline-ingest"
                }));
                then.status(201)
                    .json_body(json!({"knowledge_base_id": "kb-new"}));
            })
            .await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST).path("/knowledge-bases/kb-new/ingestion-jobs");
                then.status(202).json_body(json!({"job_id": "job-1"}));
            })
            .await;

        let store =
            KnowledgeBaseStore::from_settings(&settings(&server.base_url(), None)).unwrap();
        store.ensure_ready().await.unwrap();
        store.ensure_ready().await.unwrap();
        provision.assert_hits(1);

        let handle = store
            .add_documents(vec![record("doc-1", 0, "hello")])
            .await
            .unwrap();
        submit.assert();
        assert_eq!(handle.job_id.as_deref(), Some("job-1"));
        assert_eq!(handle.state, JobState::Pending);
    }

    #[tokio::test]
    async fn unprovisioned_store_refuses_writes() {
        let store = KnowledgeBaseStore::from_settings(&settings("http://127.0.0.1:1", None))
            .unwrap();
        let error = store
            .add_documents(vec![record("doc-1", 0, "hello")])
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotProvisioned { .. }));
    }

    #[test]
    fn constructor_requires_provisioning_inputs() {
        let mut incomplete = settings("http://127.0.0.1:1", None);
        incomplete.role_arn = None;
        let error = KnowledgeBaseStore::from_settings(&incomplete).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::MissingField("knowledge_base.role_arn")
        ));
    }
}
