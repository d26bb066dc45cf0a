//! Object storage adapter.
//!
//! Defines the [`BlobStore`] trait (get/put/delete/presign) and the
//! [`S3BlobStore`] implementation over the S3 REST API with AWS Signature
//! V4 authentication. Supports custom endpoints and path-style addressing
//! for S3-compatible services (MinIO, LocalStack).
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing, so
//! there are no C library dependencies to build.
//!
//! # Environment Variables
//!
//! Credentials are read from the environment once, at construction:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials / IAM roles)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::BlobConfig;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object not found: {key}")]
    NotFound { key: String },
    #[error("blob store request failed: {0}")]
    Request(String),
    #[error("blob store error (HTTP {status}): {message}")]
    Unexpected { status: u16, message: String },
}

/// Byte storage by key, plus time-limited signed URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Store bytes; returns the object's version tag (ETag).
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Presigned GET URL, optionally forcing a response content disposition.
    fn signed_url(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Option<&str>,
    ) -> Result<String, BlobError>;
}

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// S3 blob store over the REST API with SigV4 signing.
pub struct S3BlobStore {
    config: BlobConfig,
    creds: AwsCredentials,
    http: reqwest::Client,
}

impl S3BlobStore {
    /// Build the store from configuration, reading credentials from the
    /// environment exactly once.
    pub fn new(config: &BlobConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            creds: AwsCredentials::from_env()?,
            http: reqwest::Client::new(),
        })
    }

    fn scheme(&self) -> &str {
        match &self.config.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn host(&self) -> String {
        if let Some(endpoint) = &self.config.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else if self.config.path_style {
            format!("s3.{}.amazonaws.com", self.config.region)
        } else {
            format!(
                "{}.s3.{}.amazonaws.com",
                self.config.bucket, self.config.region
            )
        }
    }

    /// Path portion of the request, URI-encoded per segment. Path-style
    /// addressing (and any custom endpoint) puts the bucket in the path.
    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.config.endpoint_url.is_some() || self.config.path_style {
            format!("/{}/{}", self.config.bucket, encoded_key)
        } else {
            format!("/{encoded_key}")
        }
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/s3/aws4_request", date_stamp, self.config.region)
    }

    /// SigV4 header-based signing for a request with no extra query string.
    fn sign_request(
        &self,
        method: &str,
        canonical_uri: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
        extra_headers: &[(String, String)],
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), self.host()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_lowercase(), v.clone()));
        }
        if let Some(token) = &self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String =
            headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = self.credential_scope(&date_stamp);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        // Headers the caller must attach to the outgoing request.
        let mut out = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date),
        ];
        for (k, v) in extra_headers {
            out.push((k.clone(), v.clone()));
        }
        if let Some(token) = &self.creds.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}://{}{}", self.scheme(), self.host(), self.canonical_uri(key))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = hex_sha256(b"");
        let headers = self.sign_request("GET", &canonical_uri, &payload_hash, Utc::now(), &[]);

        let mut request = self.http.get(self.object_url(key));
        for (k, v) in &headers {
            request = request.header(k, v);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlobError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(BlobError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Unexpected {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BlobError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = hex_sha256(bytes);
        let extra = vec![("content-type".to_string(), content_type.to_string())];
        let headers =
            self.sign_request("PUT", &canonical_uri, &payload_hash, Utc::now(), &extra);

        let mut request = self.http.put(self.object_url(key)).body(bytes.to_vec());
        for (k, v) in &headers {
            request = request.header(k, v);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlobError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Unexpected {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Ok(etag)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = hex_sha256(b"");
        let headers = self.sign_request("DELETE", &canonical_uri, &payload_hash, Utc::now(), &[]);

        let mut request = self.http.delete(self.object_url(key));
        for (k, v) in &headers {
            request = request.header(k, v);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlobError::Request(e.to_string()))?;

        let status = response.status();
        // 404 on delete is fine: the object is already gone.
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Unexpected {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }
        Ok(())
    }

    fn signed_url(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Option<&str>,
    ) -> Result<String, BlobError> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = self.credential_scope(&date_stamp);

        let mut query_params = vec![
            (
                "X-Amz-Algorithm".to_string(),
                "AWS4-HMAC-SHA256".to_string(),
            ),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key_id, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), ttl.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(token) = &self.creds.session_token {
            query_params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        if let Some(disposition) = disposition {
            query_params.push((
                "response-content-disposition".to_string(),
                disposition.to_string(),
            ));
        }

        query_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_uri = self.canonical_uri(key);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri,
            canonical_querystring,
            self.host(),
            UNSIGNED_PAYLOAD
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        Ok(format!(
            "{}?{}&X-Amz-Signature={}",
            self.object_url(key),
            canonical_querystring,
            signature
        ))
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
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
