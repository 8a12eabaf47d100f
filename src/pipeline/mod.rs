//! Document ingestion pipeline: source fetch, chunking, embedding, and
//! backend orchestration.

mod service;
pub mod types;

pub use service::{IngestApi, IngestionService};
pub use types::{
    DocumentRecord, IngestError, IngestReceipt, IngestionJobRecord, IngestionStatus,
    IngestionStatusReport, MetadataLookupError, QueryError, StatusError,
};
