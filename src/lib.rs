#![deny(missing_docs)]

//! Core library for the ragline document ingestion pipeline.

/// HTTP routing and REST handlers.
pub mod api;
/// Character-window document chunking.
pub mod chunking;
/// Configuration loading and validation.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Deterministic document, record, and ingestion identifiers.
pub mod identity;
/// Structured logging and tracing setup.
pub mod logging;
/// Durable document and ingestion-job bookkeeping.
pub mod metadata;
/// Ingestion metrics helpers.
pub mod metrics;
/// Object storage access for document sources and metadata records.
pub mod object_store;
/// Ingestion orchestration pipeline.
pub mod pipeline;
/// Retry and backoff policies for transient failures.
pub mod retry;
/// Vector store abstraction, backend registry, and adapters.
pub mod store;
