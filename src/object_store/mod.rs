//! Object storage access for document sources and metadata records.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

mod s3;

pub use s3::{AwsCredentials, S3ObjectStore};

/// Errors surfaced while fetching or writing objects.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The requested object does not exist.
    #[error("Object s3://{bucket}/{key} does not exist")]
    NotFound {
        /// Bucket that was queried.
        bucket: String,
        /// Key that was queried.
        key: String,
    },
    /// The caller is not allowed to touch the object.
    #[error("Access denied for s3://{bucket}/{key}")]
    AccessDenied {
        /// Bucket that was queried.
        bucket: String,
        /// Key that was queried.
        key: String,
    },
    /// The store answered with a status the client does not handle.
    #[error("Object store returned {status} for s3://{bucket}/{key}: {body}")]
    UnexpectedStatus {
        /// Bucket that was queried.
        bucket: String,
        /// Key that was queried.
        key: String,
        /// HTTP status received.
        status: StatusCode,
        /// Response body, truncated for logging.
        body: String,
    },
    /// Transport-level failure talking to the store.
    #[error("Object store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Credentials were not present in the environment.
    #[error("Missing environment variable: {0}")]
    MissingCredentials(String),
}

/// Durable blob storage keyed by `(bucket, key)`.
///
/// Two implementations matter: the SigV4-signed S3 client used in production
/// and in-memory fakes in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object, failing with `NotFound` when it is absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Write an object, overwriting any previous content under the key.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Download an object, mapping absence to `None` instead of an error.
    async fn get_object_opt(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        match self.get_object(bucket, key).await {
            Ok(body) => Ok(Some(body)),
            Err(ObjectStoreError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}
