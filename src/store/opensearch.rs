//! Synchronous search-index backend adapter.
//!
//! Records are written inline through the `_bulk` API keyed by record id, so
//! a successful submission is already fully indexed and no job polling ever
//! happens. Vectors are produced client-side; queries run as k-NN searches
//! with optional exact-match filters on caller metadata.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{ConfigError, OpenSearchSettings, PipelineConfig};
use crate::store::{
    BackendJob, JobHandle, JobState, QueryHit, SearchRequest, StoreError, VectorRecord, VectorStore,
};

/// Index used when the configuration names none.
const DEFAULT_INDEX: &str = "ragline-chunks";

enum Auth {
    None,
    Basic { username: String, password: String },
    ApiKey(String),
}

/// REST adapter for an OpenSearch-style k-NN cluster.
pub struct OpenSearchStore {
    client: Client,
    base_url: String,
    index: String,
    dimension: usize,
    auth: Auth,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHitEnvelope>,
}

#[derive(Debug, Deserialize)]
struct SearchHitEnvelope {
    #[serde(rename = "_score")]
    score: f32,
    #[serde(rename = "_source")]
    source: StoredRecord,
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    document_id: String,
    #[serde(default)]
    chunk_index: Option<usize>,
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

impl OpenSearchStore {
    /// Registry name of this backend.
    pub const BACKEND_NAME: &'static str = "opensearch";

    /// Build the adapter from the top-level configuration document.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let settings = config
            .opensearch
            .as_ref()
            .ok_or(ConfigError::MissingSection("opensearch"))?;
        Self::from_settings(settings, config.embedding.dimension)
    }

    /// Build the adapter from its settings section and the vector dimension.
    pub fn from_settings(
        settings: &OpenSearchSettings,
        dimension: usize,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let auth = match (&settings.username, &settings.password, &settings.api_key) {
            (Some(username), Some(password), _) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            (_, _, Some(api_key)) => Auth::ApiKey(api_key.clone()),
            _ => Auth::None,
        };

        Ok(Self {
            client: Client::new(),
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            index: settings
                .index_name
                .clone()
                .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            dimension,
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let path = path.trim_start_matches('/');
        let mut request = self
            .client
            .request(method, format!("{}/{path}", self.base_url));
        match &self.auth {
            Auth::Basic { username, password } => {
                request = request.basic_auth(username, Some(password));
            }
            Auth::ApiKey(api_key) => {
                request = request.header("Authorization", format!("ApiKey {api_key}"));
            }
            Auth::None => {}
        }
        request
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

    async fn create_index(&self) -> Result<(), StoreError> {
        let body = json!({
            "settings": { "index": { "knn": true } },
            "mappings": {
                "properties": {
                    "record_id": { "type": "keyword" },
                    "document_id": { "type": "keyword" },
                    "chunk_index": { "type": "integer" },
                    "vector": { "type": "knn_vector", "dimension": self.dimension },
                    "text": { "type": "text" },
                    "metadata": { "type": "object" }
                }
            }
        });
        let response = self
            .request(Method::PUT, &self.index)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(index = %self.index, dimension = self.dimension, "Created search index");
            return Ok(());
        }
        // A concurrent creator winning the race is fine.
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(StoreError::UnexpectedStatus {
                backend: Self::BACKEND_NAME,
                status,
                body: body.chars().take(500).collect(),
            });
        }
        Err(Self::unexpected(response).await)
    }
}

#[async_trait]
impl VectorStore for OpenSearchStore {
    fn backend_name(&self) -> &'static str {
        Self::BACKEND_NAME
    }

    fn embeds_on_write(&self) -> bool {
        false
    }

    async fn ensure_ready(&self) -> Result<(), StoreError> {
        let response = self.request(Method::HEAD, &self.index).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => self.create_index().await,
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<JobHandle, StoreError> {
        if records.is_empty() {
            return Ok(JobHandle {
                job_id: None,
                state: JobState::Completed,
            });
        }

        let mut body = String::new();
        for record in &records {
            let Some(vector) = &record.vector else {
                return Err(StoreError::MissingVector {
                    backend: Self::BACKEND_NAME,
                    what: format!("record {}", record.record_id),
                });
            };
            body.push_str(
                &json!({"index": {"_index": self.index, "_id": record.record_id}}).to_string(),
            );
            body.push('\n');
            body.push_str(
                &json!({
                    "record_id": record.record_id,
                    "document_id": record.document_id,
                    "chunk_index": record.chunk_index,
                    "vector": vector,
                    "text": record.text,
                    "metadata": record.metadata,
                })
                .to_string(),
            );
            body.push('\n');
        }

        let response = self
            .request(Method::POST, "_bulk")
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }

        let payload: BulkResponse = response.json().await?;
        if payload.errors {
            let reason = payload
                .items
                .iter()
                .filter_map(|item| item.get("index"))
                .filter_map(|operation| operation.get("error"))
                .filter_map(|error| error.get("reason"))
                .filter_map(Value::as_str)
                .next()
                .unwrap_or("bulk indexing reported errors")
                .to_string();
            return Err(StoreError::WriteRejected {
                backend: Self::BACKEND_NAME,
                reason,
            });
        }

        tracing::debug!(index = %self.index, records = records.len(), "Bulk indexed records");
        Ok(JobHandle {
            job_id: None,
            state: JobState::Completed,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<BackendJob, StoreError> {
        // Writes complete inline; there are no jobs to look up.
        Err(StoreError::UnknownJob {
            backend: Self::BACKEND_NAME,
            job_id: job_id.to_string(),
        })
    }

    async fn similarity_search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let Some(vector) = &request.vector else {
            return Err(StoreError::MissingVector {
                backend: Self::BACKEND_NAME,
                what: "the query".to_string(),
            });
        };

        let knn = json!({"knn": {"vector": {"vector": vector, "k": request.top_k}}});
        let query = if request.filters.is_empty() {
            knn
        } else {
            let filter_clauses: Vec<Value> = request
                .filters
                .iter()
                .map(|(key, value)| {
                    let mut term = Map::new();
                    term.insert(format!("metadata.{key}"), value.clone());
                    json!({"term": term})
                })
                .collect();
            json!({"bool": {"must": [knn], "filter": filter_clauses}})
        };

        let response = self
            .request(Method::POST, &format!("{}/_search", self.index))
            .json(&json!({"size": request.top_k, "query": query}))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(index = %self.index, "Search index missing, returning no hits");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }

        let payload: SearchResponse = response.json().await?;
        Ok(payload
            .hits
            .hits
            .into_iter()
            .map(|hit| QueryHit {
                score: hit.score,
                text: hit.source.text,
                document_id: hit.source.document_id,
                chunk_index: hit.source.chunk_index,
                metadata: hit.source.metadata,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let response = self
            .request(Method::POST, &format!("{}/_delete_by_query", self.index))
            .json(&json!({"query": {"term": {"document_id": document_id}}}))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }
        let payload: DeleteByQueryResponse = response.json().await?;
        Ok(payload.deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(endpoint: &str) -> OpenSearchSettings {
        OpenSearchSettings {
            endpoint: endpoint.to_string(),
            index_name: Some("docs".to_string()),
            username: None,
            password: None,
            api_key: None,
        }
    }

    fn store(server: &MockServer) -> OpenSearchStore {
        OpenSearchStore::from_settings(&settings(&server.base_url()), 2).unwrap()
    }

    fn record(document_id: &str, chunk_index: usize, vector: Option<Vec<f32>>) -> VectorRecord {
        VectorRecord {
            record_id: format!("{document_id}:{chunk_index}"),
            document_id: document_id.to_string(),
            chunk_index,
            vector,
            text: "chunk text".to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn ensure_ready_creates_a_missing_index() {
        let server = MockServer::start_async().await;
        let head = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::HEAD).path("/docs");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/docs").json_body(json!({
                    "settings": { "index": { "knn": true } },
                    "mappings": {
                        "properties": {
                            "record_id": { "type": "keyword" },
                            "document_id": { "type": "keyword" },
                            "chunk_index": { "type": "integer" },
                            "vector": { "type": "knn_vector", "dimension": 2 },
                            "text": { "type": "text" },
                            "metadata": { "type": "object" }
                        }
                    }
                }));
                then.status(200).json_body(json!({"acknowledged": true}));
            })
            .await;

        store(&server).ensure_ready().await.unwrap();
        head.assert();
        create.assert();
    }

    #[tokio::test]
    async fn ensure_ready_leaves_an_existing_index_alone() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::HEAD).path("/docs");
                then.status(200);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/docs");
                then.status(200);
            })
            .await;

        store(&server).ensure_ready().await.unwrap();
        create.assert_hits(0);
    }

    #[tokio::test]
    async fn bulk_write_completes_inline() {
        let server = MockServer::start_async().await;
        let bulk = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/_bulk")
                    .header("content-type", "application/x-ndjson")
                    .body_contains(r#""_id":"doc-1:0""#)
                    .body_contains(r#""_id":"doc-1:1""#);
                then.status(200).json_body(json!({
                    "took": 7,
                    "errors": false,
                    "items": [
                        {"index": {"_id": "doc-1:0", "status": 201}},
                        {"index": {"_id": "doc-1:1", "status": 201}}
                    ]
                }));
            })
            .await;

        let handle = store(&server)
            .add_documents(vec![
                record("doc-1", 0, Some(vec![0.5, 0.25])),
                record("doc-1", 1, Some(vec![0.25, 0.5])),
            ])
            .await
            .unwrap();

        bulk.assert();
        assert!(handle.job_id.is_none());
        assert_eq!(handle.state, JobState::Completed);
    }

    #[tokio::test]
    async fn bulk_item_errors_surface_the_first_reason() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/_bulk");
                then.status(200).json_body(json!({
                    "took": 3,
                    "errors": true,
                    "items": [
                        {"index": {"_id": "doc-1:0", "status": 201}},
                        {"index": {
                            "_id": "doc-1:1",
                            "status": 400,
                            "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [vector]"}
                        }}
                    ]
                }));
            })
            .await;

        let error = store(&server)
            .add_documents(vec![
                record("doc-1", 0, Some(vec![0.5, 0.25])),
                record("doc-1", 1, Some(vec![0.25, 0.5])),
            ])
            .await
            .unwrap_err();

        match error {
            StoreError::WriteRejected { reason, .. } => {
                assert!(reason.contains("failed to parse field"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn records_without_vectors_are_refused_before_any_request() {
        let server = MockServer::start_async().await;
        let bulk = server
            .mock_async(|when, then| {
                when.method(POST).path("/_bulk");
                then.status(200);
            })
            .await;

        let error = store(&server)
            .add_documents(vec![record("doc-1", 0, None)])
            .await
            .unwrap_err();

        bulk.assert_hits(0);
        assert!(matches!(error, StoreError::MissingVector { .. }));
    }

    #[tokio::test]
    async fn search_builds_a_knn_query_and_maps_hits() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search").json_body(json!({
                    "size": 2,
                    "query": {"knn": {"vector": {"vector": [0.5, 0.25], "k": 2}}}
                }));
                then.status(200).json_body(json!({
                    "hits": {
                        "hits": [
                            {
                                "_score": 0.75,
                                "_source": {
                                    "document_id": "doc-2",
                                    "chunk_index": 1,
                                    "text": "relevant chunk",
                                    "metadata": {"team": "sre"}
                                }
                            }
                        ]
                    }
                }));
            })
            .await;

        let hits = store(&server)
            .similarity_search(&SearchRequest {
                text: "ignored by this backend".to_string(),
                vector: Some(vec![0.5, 0.25]),
                top_k: 2,
                filters: Map::new(),
            })
            .await
            .unwrap();

        search.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc-2");
        assert_eq!(hits[0].chunk_index, Some(1));
        assert_eq!(hits[0].metadata["team"], "sre");
    }

    #[tokio::test]
    async fn filters_become_term_clauses() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search").json_body(json!({
                    "size": 5,
                    "query": {
                        "bool": {
                            "must": [{"knn": {"vector": {"vector": [1.0, 0.0], "k": 5}}}],
                            "filter": [{"term": {"metadata.team": "sre"}}]
                        }
                    }
                }));
                then.status(200).json_body(json!({"hits": {"hits": []}}));
            })
            .await;

        let mut filters = Map::new();
        filters.insert("team".to_string(), Value::String("sre".to_string()));
        let hits = store(&server)
            .similarity_search(&SearchRequest {
                text: String::new(),
                vector: Some(vec![1.0, 0.0]),
                top_k: 5,
                filters,
            })
            .await
            .unwrap();

        search.assert();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn a_missing_index_answers_queries_with_no_hits() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search");
                then.status(404)
                    .json_body(json!({"error": {"type": "index_not_found_exception"}}));
            })
            .await;

        let hits = store(&server)
            .similarity_search(&SearchRequest {
                text: String::new(),
                vector: Some(vec![0.5, 0.25]),
                top_k: 3,
                filters: Map::new(),
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_by_query_reports_whether_anything_went() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/docs/_delete_by_query")
                    .json_body(json!({"query": {"term": {"document_id": "doc-present"}}}));
                then.status(200).json_body(json!({"deleted": 3}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/docs/_delete_by_query")
                    .json_body(json!({"query": {"term": {"document_id": "doc-absent"}}}));
                then.status(200).json_body(json!({"deleted": 0}));
            })
            .await;

        let store = store(&server);
        assert!(store.delete_document("doc-present").await.unwrap());
        assert!(!store.delete_document("doc-absent").await.unwrap());
    }

    #[tokio::test]
    async fn basic_auth_is_applied_to_requests() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/docs/_search")
                    .header("authorization", "Basic YWRtaW46c2VjcmV0");
                then.status(200).json_body(json!({"hits": {"hits": []}}));
            })
            .await;

        let mut with_auth = settings(&server.base_url());
        with_auth.username = Some("admin".to_string());
        with_auth.password = Some("secret".to_string());
        let store = OpenSearchStore::from_settings(&with_auth, 2).unwrap();
        store
            .similarity_search(&SearchRequest {
                text: String::new(),
                vector: Some(vec![0.5, 0.25]),
                top_k: 1,
                filters: Map::new(),
            })
            .await
            .unwrap();

        search.assert();
    }

    #[tokio::test]
    async fn job_lookups_are_refused() {
        let server = MockServer::start_async().await;
        let error = store(&server).job_status("job-1").await.unwrap_err();
        assert!(matches!(error, StoreError::UnknownJob { .. }));
    }

    #[test]
    fn default_index_applies_when_unnamed() {
        let mut unnamed = settings("http://127.0.0.1:1");
        unnamed.index_name = None;
        let store = OpenSearchStore::from_settings(&unnamed, 2).unwrap();
        assert_eq!(store.index, DEFAULT_INDEX);
    }
}
