//! S3-compatible object store client with AWS Signature V4 authentication.
//!
//! Talks to the S3 REST API directly over `reqwest`, signing every request
//! with HMAC-SHA256 (`hmac` + `sha2`, no C dependencies). Without a custom
//! endpoint, requests use virtual-hosted addressing
//! (`<bucket>.s3.<region>.amazonaws.com`); a custom endpoint (MinIO,
//! LocalStack) switches the client to path-style addressing.
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! optionally `AWS_SESSION_TOKEN`, or are supplied explicitly.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::config::ObjectStoreSettings;
use crate::object_store::{ObjectStore, ObjectStoreError};

type HmacSha256 = Hmac<Sha256>;

/// Static AWS credentials for request signing.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    /// Build credentials from explicit values.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Load credentials from the standard environment variables.
    pub fn from_env() -> Result<Self, ObjectStoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| ObjectStoreError::MissingCredentials("AWS_ACCESS_KEY_ID".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            ObjectStoreError::MissingCredentials("AWS_SECRET_ACCESS_KEY".to_string())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// SigV4-signed S3 client implementing [`ObjectStore`].
pub struct S3ObjectStore {
    client: reqwest::Client,
    region: String,
    credentials: AwsCredentials,
    /// `(scheme, host)` of a custom endpoint; `None` means real AWS hosts.
    endpoint: Option<(String, String)>,
}

impl S3ObjectStore {
    /// Build a client with credentials taken from the environment.
    pub fn from_env(region: &str, settings: &ObjectStoreSettings) -> Result<Self, ObjectStoreError> {
        let credentials = AwsCredentials::from_env()?;
        Ok(Self::with_credentials(region, settings, credentials))
    }

    /// Build a client with explicit credentials.
    pub fn with_credentials(
        region: &str,
        settings: &ObjectStoreSettings,
        credentials: AwsCredentials,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            region: region.to_string(),
            credentials,
            endpoint: settings.endpoint.as_deref().map(split_endpoint),
        }
    }

    /// Host and canonical URI for `(bucket, key)` under the active addressing mode.
    fn address(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key: String = key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        match &self.endpoint {
            Some((scheme, host)) => (
                scheme.clone(),
                host.clone(),
                format!("/{}/{}", uri_encode(bucket), encoded_key),
            ),
            None => (
                "https".to_string(),
                format!("{bucket}.s3.{}.amazonaws.com", self.region),
                format!("/{encoded_key}"),
            ),
        }
    }

    /// Build a signed request for `canonical_uri` on `host` with `payload`.
    fn signed_request(
        &self,
        method: Method,
        scheme: &str,
        host: &str,
        canonical_uri: &str,
        payload: &[u8],
    ) -> RequestBuilder {
        let now = OffsetDateTime::now_utc();
        let date_stamp = format!(
            "{:04}{:02}{:02}",
            now.year(),
            u8::from(now.month()),
            now.day()
        );
        let amz_date = format!(
            "{date_stamp}T{:02}{:02}{:02}Z",
            now.hour(),
            now.minute(),
            now.second()
        );
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );
        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        );

        let url = format!("{scheme}://{host}{canonical_uri}");
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }
        request
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let (scheme, host, uri) = self.address(bucket, key);
        let response = self
            .signed_request(Method::GET, &scheme, &host, &uri, b"")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }
        Err(object_error(bucket, key, status, response).await)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let (scheme, host, uri) = self.address(bucket, key);
        let response = self
            .signed_request(Method::PUT, &scheme, &host, &uri, &body)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(object_error(bucket, key, status, response).await)
    }
}

/// Map a non-success S3 response to the error taxonomy.
async fn object_error(
    bucket: &str,
    key: &str,
    status: StatusCode,
    response: reqwest::Response,
) -> ObjectStoreError {
    match status {
        StatusCode::NOT_FOUND => ObjectStoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        StatusCode::FORBIDDEN => ObjectStoreError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => ObjectStoreError::UnexpectedStatus {
            bucket: bucket.to_string(),
            key: key.to_string(),
            status,
            body: response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect(),
        },
    }
}

/// Split a custom endpoint URL into `(scheme, host)`.
fn split_endpoint(endpoint: &str) -> (String, String) {
    let (scheme, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        ("http", rest)
    } else {
        ("https", endpoint)
    };
    (scheme.to_string(), rest.trim_end_matches('/').to_string())
}

/// Hex-encoded SHA-256 of `data`.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 of `data` under `key`.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key for a date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only unreserved characters bare.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    result
}
