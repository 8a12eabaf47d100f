//! Name-keyed registry of vector store constructors.
//!
//! Backends register a constructor under a string name at process start; the
//! configuration selects one by name when the pipeline is assembled. An
//! unregistered name fails immediately with a configuration error, before any
//! network traffic. Adding a backend means registering another constructor;
//! the orchestrator never changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ConfigError, PipelineConfig};
use crate::store::{KnowledgeBaseStore, OpenSearchStore, VectorStore};

/// Constructor registered per backend name.
///
/// Constructors are network-free: they validate their config section and
/// build an HTTP client, so misconfiguration surfaces at assembly.
pub type BackendConstructor =
    Box<dyn Fn(&PipelineConfig) -> Result<Arc<dyn VectorStore>, ConfigError> + Send + Sync>;

/// Explicit name-to-constructor table resolved once at assembly.
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Registry with no backends registered.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in backends registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(KnowledgeBaseStore::BACKEND_NAME, |config| {
            Ok(Arc::new(KnowledgeBaseStore::from_config(config)?) as Arc<dyn VectorStore>)
        });
        registry.register(OpenSearchStore::BACKEND_NAME, |config| {
            Ok(Arc::new(OpenSearchStore::from_config(config)?) as Arc<dyn VectorStore>)
        });
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&PipelineConfig) -> Result<Arc<dyn VectorStore>, ConfigError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
    }

    /// Instantiate the backend registered under `name`.
    pub fn create(
        &self,
        name: &str,
        config: &PipelineConfig,
    ) -> Result<Arc<dyn VectorStore>, ConfigError> {
        match self.constructors.get(name) {
            Some(constructor) => constructor(config),
            None => Err(ConfigError::UnknownBackend {
                name: name.to_string(),
                known: self.names().join(", "),
            }),
        }
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
