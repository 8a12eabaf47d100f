//! Deterministic document identity and per-attempt ingestion ids.
//!
//! A document's identity is a pure function of where it lives: the same
//! `(bucket, object_key)` always hashes to the same `document_id`, so
//! re-ingesting a document overwrites rather than duplicates. With content
//! versioning enabled the content hash joins the derivation, giving changed
//! content a fresh identity while unchanged re-uploads keep the old one.

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Field separator inside the identity preimage. NUL cannot appear in bucket
/// names or object keys, so `("a", "b\0c")` and `("a\0b", "c")` stay distinct.
const IDENTITY_SEPARATOR: u8 = 0;

/// Derive the deterministic identifier for a document location.
pub fn derive_document_id(bucket: &str, object_key: &str, version: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update([IDENTITY_SEPARATOR]);
    hasher.update(object_key.as_bytes());
    if let Some(version) = version {
        hasher.update([IDENTITY_SEPARATOR]);
        hasher.update(version.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Version token for content-based versioning: the SHA-256 of the object bytes.
pub fn content_version(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Identifier of the record a chunk is stored under.
///
/// Deterministic per `(document, chunk position)`, so re-ingestion upserts
/// existing records instead of accumulating duplicates.
pub fn record_id(document_id: &str, chunk_index: usize) -> String {
    format!("{document_id}:{chunk_index}")
}

/// Fresh identifier for one ingestion attempt.
pub fn generate_ingestion_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp formatted for metadata records.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
