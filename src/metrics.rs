use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_ingested: AtomicU64,
    ingestion_failures: AtomicU64,
    queries_served: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submitted document and the number of chunks produced for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_ingested
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an ingestion attempt that failed before submission completed.
    pub fn record_failure(&self) {
        self.ingestion_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered similarity query.
    pub fn record_query(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            ingestion_failures: self.ingestion_failures.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents submitted to the backend since startup.
    pub documents_ingested: u64,
    /// Total chunk count written across all ingested documents.
    pub chunks_ingested: u64,
    /// Ingestion attempts that failed before a submission completed.
    pub ingestion_failures: u64,
    /// Similarity queries answered since startup.
    pub queries_served: u64,
}
