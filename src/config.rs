use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the pipeline configuration file.
pub const CONFIG_PATH_VAR: &str = "RAGLINE_CONFIG";

/// Errors raised while loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// The configuration file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Unreadable {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration document is not valid JSON of the expected shape.
    #[error("Cannot parse config file {path}: {source}")]
    Unparseable {
        /// Path that was attempted.
        path: String,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A field holds a value that fails validation.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// A section required by the selected backend is absent.
    #[error("Missing config section `{0}` required by the selected backend")]
    MissingSection(&'static str),
    /// A field required in context is absent.
    #[error("Missing config field `{0}`")]
    MissingField(&'static str),
    /// The chunk window cannot make forward progress.
    #[error("chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})")]
    InvalidChunking {
        /// Configured window size in characters.
        chunk_size: usize,
        /// Configured overlap in characters.
        chunk_overlap: usize,
    },
    /// The configured backend name has no registered constructor.
    #[error("Unknown vector store backend `{name}` (registered: {known})")]
    UnknownBackend {
        /// Name requested by the configuration.
        name: String,
        /// Comma-separated list of registered backend names.
        known: String,
    },
}

/// Top-level configuration document for the ingestion pipeline.
///
/// Loaded from a single JSON file named by `RAGLINE_CONFIG`. Every component
/// receives the settings it needs by reference at construction; nothing is
/// cached globally.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Registry name of the vector store backend to use.
    pub backend: String,
    /// Region used by region-aware collaborators such as object store signing.
    pub region: String,
    /// Bucket holding document and ingestion-job metadata records.
    pub metadata_bucket: String,
    /// Derive a version token from object content so changed content gets a new identity.
    #[serde(default)]
    pub content_versioning: bool,
    /// Chunk window parameters.
    #[serde(default)]
    pub chunking: ChunkingSettings,
    /// Embedding endpoint parameters.
    pub embedding: EmbeddingSettings,
    /// Ingestion-job polling cadence.
    #[serde(default)]
    pub polling: PollingSettings,
    /// Object store overrides.
    #[serde(default)]
    pub object_store: ObjectStoreSettings,
    /// Settings for the job-based knowledge-base backend.
    pub knowledge_base: Option<KnowledgeBaseSettings>,
    /// Settings for the synchronous search-index backend.
    pub opensearch: Option<OpenSearchSettings>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Sliding-window chunking parameters, measured in characters.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingSettings {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

/// Embedding API endpoint and retry parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    /// Base URL of the embeddings endpoint.
    pub endpoint: String,
    /// Model identifier passed to the provider.
    pub model_id: String,
    /// Dimensionality of the produced vectors.
    pub dimension: usize,
    /// Largest number of texts submitted in a single request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Optional bearer token for the endpoint.
    pub api_key: Option<String>,
    /// Attempts per request before a transient failure becomes fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Ceiling on the retry delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Cadence for polling asynchronous ingestion jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSettings {
    /// Seconds between consecutive status polls.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Polls performed before a wait reports `timed_out`.
    #[serde(default = "default_poll_max_retries")]
    pub max_retries: u32,
}

/// Object store connection overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStoreSettings {
    /// Custom endpoint (MinIO, LocalStack); switches the client to path-style addressing.
    pub endpoint: Option<String>,
}

/// Connection settings for the managed knowledge-base backend.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseSettings {
    /// Base URL of the knowledge-base API.
    pub endpoint: String,
    /// Existing knowledge base to write into; absence triggers provisioning.
    pub kb_id: Option<String>,
    /// Display name used when provisioning a new knowledge base.
    pub kb_name: Option<String>,
    /// Ingestion role passed when provisioning; required only then.
    pub role_arn: Option<String>,
}

/// Connection settings for the synchronous search-index backend.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSearchSettings {
    /// Base URL of the search cluster.
    pub endpoint: String,
    /// Index to write into; absence means the default index is created on demand.
    pub index_name: Option<String>,
    /// Basic-auth user, supplied together with `password`.
    pub username: Option<String>,
    /// Basic-auth password, supplied together with `username`.
    pub password: Option<String>,
    /// API key header value, mutually exclusive with basic auth.
    pub api_key: Option<String>,
}

impl PipelineConfig {
    /// Load the configuration file named by `RAGLINE_CONFIG` and validate it.
    ///
    /// A `.env` file in the working directory is honored first, so the path
    /// variable and the object store credentials can live there during
    /// development.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = env::var(CONFIG_PATH_VAR)
            .map_err(|_| ConfigError::MissingVariable(CONFIG_PATH_VAR.to_string()))?;
        Self::from_json_file(Path::new(&path))
    }

    /// Read and validate a configuration document from `path`.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Unparseable {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("backend", &self.backend)?;
        require_non_empty("region", &self.region)?;
        require_non_empty("metadata_bucket", &self.metadata_bucket)?;
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.polling.validate()?;
        if let Some(opensearch) = &self.opensearch {
            opensearch.validate()?;
        }
        Ok(())
    }
}

impl ChunkingSettings {
    /// Reject windows that cannot advance or are degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunking.chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }
}

impl EmbeddingSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("embedding.endpoint", &self.endpoint)?;
        require_non_empty("embedding.model_id", &self.model_id)?;
        if self.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.max_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl PollingSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.max_retries",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Delay between consecutive status polls.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl OpenSearchSettings {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "opensearch.username",
                reason: "username and password must be provided together".to_string(),
            });
        }
        if self.username.is_some() && self.api_key.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "opensearch.api_key",
                reason: "basic auth and api_key are mutually exclusive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            max_retries: default_poll_max_retries(),
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_batch_size() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_poll_max_retries() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_document() -> serde_json::Value {
        json!({
            "backend": "opensearch",
            "region": "us-east-1",
            "metadata_bucket": "ragline-metadata",
            "embedding": {
                "endpoint": "http://localhost:9600",
                "model_id": "all-minilm",
                "dimension": 384
            },
            "opensearch": {
                "endpoint": "http://localhost:9200"
            }
        })
    }

    #[test]
    fn defaults_fill_in_optional_sections() {
        let config: PipelineConfig = serde_json::from_value(minimal_document()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.polling.retry_delay_secs, 10);
        assert_eq!(config.polling.max_retries, 30);
        assert_eq!(config.embedding.max_batch_size, 16);
        assert!(!config.content_versioning);
        assert!(config.object_store.endpoint.is_none());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let mut document = minimal_document();
        document["chunking"] = json!({"chunk_size": 200, "chunk_overlap": 200});
        let config: PipelineConfig = serde_json::from_value(document).unwrap();
        let error = config.validate().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidChunking {
                chunk_size: 200,
                chunk_overlap: 200
            }
        ));
    }

    #[test]
    fn basic_auth_and_api_key_conflict() {
        let mut document = minimal_document();
        document["opensearch"] = json!({
            "endpoint": "http://localhost:9200",
            "username": "admin",
            "password": "secret",
            "api_key": "abc123"
        });
        let config: PipelineConfig = serde_json::from_value(document).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn password_requires_username() {
        let mut document = minimal_document();
        document["opensearch"] = json!({
            "endpoint": "http://localhost:9200",
            "password": "secret"
        });
        let config: PipelineConfig = serde_json::from_value(document).unwrap();
        assert!(config.validate().is_err());
    }
}
