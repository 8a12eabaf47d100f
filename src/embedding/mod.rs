//! Embedding client abstraction and the HTTP adapter.
//!
//! The pipeline embeds chunk text before writing to backends that expect
//! client-side vectors. Providers sit behind [`EmbeddingClient`] so the
//! orchestrator and tests can swap in fakes; the shipped implementation
//! targets an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::EmbeddingSettings;
use crate::retry::{BackoffPolicy, is_transient_status};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The endpoint rejected the request outright.
    #[error("Embedding endpoint returned {status}: {body}")]
    Rejected {
        /// HTTP status received.
        status: StatusCode,
        /// Response body, truncated for logging.
        body: String,
    },
    /// Transient failures persisted past the retry budget.
    #[error("Embedding request failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Attempts performed, counting the first.
        attempts: u32,
        /// Final failure before giving up.
        reason: String,
    },
    /// The provider returned a different number of vectors than texts sent.
    #[error("Embedding count mismatch: sent {sent} texts, received {received} vectors")]
    CountMismatch {
        /// Texts in the request.
        sent: usize,
        /// Vectors in the response.
        received: usize,
    },
    /// A vector does not match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, received {received}")]
    DimensionMismatch {
        /// Dimension the pipeline is configured for.
        expected: usize,
        /// Dimension the provider produced.
        received: usize,
    },
    /// The response body did not line up with the request positions.
    #[error("Embedding response malformed: {0}")]
    Malformed(String),
    /// Transport-level failure.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Whether waiting and retrying can plausibly succeed.
    fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => is_transient_status(*status),
            Self::Http(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }
}

/// Interface implemented by embedding providers.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// HTTP embedding client for OpenAI-compatible `/embeddings` endpoints.
///
/// Splits inputs into batches of at most `max_batch_size`, maps response
/// vectors back to their input positions by index, and retries transient
/// failures with bounded exponential backoff.
pub struct HttpEmbeddingClient {
    client: Client,
    endpoint: String,
    model_id: String,
    dimension: usize,
    max_batch_size: usize,
    api_key: Option<String>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    /// Build a client from validated configuration.
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self {
            client: Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model_id: settings.model_id.clone(),
            dimension: settings.dimension,
            max_batch_size: settings.max_batch_size,
            api_key: settings.api_key.clone(),
            backoff: BackoffPolicy::new(
                settings.max_attempts,
                settings.initial_backoff_ms,
                settings.max_backoff_ms,
            ),
        }
    }

    /// Embed one batch, retrying transient failures until the budget runs out.
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.request_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) => {
                    attempt += 1;
                    if !error.is_transient() {
                        return Err(error);
                    }
                    if attempt >= self.backoff.max_attempts {
                        return Err(EmbeddingError::RetriesExhausted {
                            attempts: attempt,
                            reason: error.to_string(),
                        });
                    }
                    let delay = self.backoff.delay(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying embedding request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = json!({
            "model": self.model_id,
            "input": batch,
        });
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&body);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Rejected {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let payload: EmbeddingsResponse = response.json().await?;
        if payload.data.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                sent: batch.len(),
                received: payload.data.len(),
            });
        }

        // Providers may reorder items; put each vector back at its input position.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        for item in payload.data {
            if item.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    received: item.embedding.len(),
                });
            }
            let Some(slot) = vectors.get_mut(item.index) else {
                return Err(EmbeddingError::Malformed(format!(
                    "vector index {} out of range for batch of {}",
                    item.index,
                    batch.len()
                )));
            };
            if slot.replace(item.embedding).is_some() {
                return Err(EmbeddingError::Malformed(format!(
                    "duplicate vector for index {}",
                    item.index
                )));
            }
        }
        vectors
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    EmbeddingError::Malformed(format!("missing vector for input position {position}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            texts = texts.len(),
            batches = texts.len().div_ceil(self.max_batch_size),
            model = %self.model_id,
            "Generating embeddings"
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}
