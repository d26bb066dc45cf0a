//! Generative model adapter.
//!
//! Defines the [`ModelClient`] trait used by the orchestrator, mapper, and
//! judge, plus the [`GeminiClient`] implementation over the Generative
//! Language REST API. Upstream rate-limit and 5xx responses are wrapped
//! into [`ModelError::Transient`] so the retry controller can branch on
//! error class:
//!
//! - HTTP 429 and 5xx → transient (retried with backoff)
//! - other 4xx → permanent (fail immediately)
//! - network errors and timeouts → transient

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ModelConfig;

/// Opaque handle returned after registering file bytes with the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub uri: String,
}

impl RemoteRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Resource name (`files/<id>`) derived from the URI tail.
    pub fn name(&self) -> String {
        let tail = self.uri.rsplit('/').next().unwrap_or(&self.uri);
        format!("files/{tail}")
    }
}

/// Errors from model adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model API transient error (HTTP {status}): {message}")]
    Transient { status: u16, message: String },
    #[error("model API permanent error (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("model API network error: {0}")]
    Network(String),
    #[error("model API returned an unreadable response: {0}")]
    InvalidResponse(String),
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient { .. } | ModelError::Network(_))
    }

    fn from_status(status: u16, message: String) -> Self {
        if status == 429 || (500..=599).contains(&status) {
            ModelError::Transient { status, message }
        } else {
            ModelError::Permanent { status, message }
        }
    }
}

/// Stateless request/response capability of the generative model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Register file bytes for model consumption; the returned handle may
    /// not be immediately queryable on the remote side.
    async fn upload_file(
        &self,
        bytes: &[u8],
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteRef, ModelError>;

    /// Delete a previously uploaded file.
    async fn delete_file(&self, remote: &RemoteRef) -> Result<(), ModelError>;

    /// Generate text for a prompt, optionally grounded on an uploaded file
    /// (`(remote ref, mime type)`).
    async fn generate_text(
        &self,
        prompt: &str,
        file: Option<(&RemoteRef, &str)>,
    ) -> Result<String, ModelError>;

    /// Embed a text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Model adapter over the Generative Language REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    text_model: String,
    embed_model: String,
}

impl GeminiClient {
    /// Build the client from configuration. The API key is read from
    /// `GEMINI_API_KEY` exactly once, here.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            text_model: config.text_model.clone(),
            embed_model: config.embed_model.clone(),
        })
    }

    async fn read_error(response: reqwest::Response) -> ModelError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ModelError::from_status(status, body.chars().take(500).collect())
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn upload_file(
        &self,
        bytes: &[u8],
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteRef, ModelError> {
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.api_base, self.api_key
        );

        let response = self
            .http
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-File-Name", display_name)
            .header("Content-Type", mime_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let uri = json
            .pointer("/file/uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ModelError::InvalidResponse("upload response missing file.uri".to_string())
            })?;

        Ok(RemoteRef::new(uri))
    }

    async fn delete_file(&self, remote: &RemoteRef) -> Result<(), ModelError> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.api_base,
            remote.name(),
            self.api_key
        );

        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        Ok(())
    }

    async fn generate_text(
        &self,
        prompt: &str,
        file: Option<(&RemoteRef, &str)>,
    ) -> Result<String, ModelError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_base, self.text_model, self.api_key
        );

        let mut parts = Vec::new();
        if let Some((remote, mime_type)) = file {
            parts.push(serde_json::json!({
                "file_data": { "file_uri": remote.uri, "mime_type": mime_type }
            }));
        }
        parts.push(serde_json::json!({ "text": prompt }));

        let body = serde_json::json!({ "contents": [{ "parts": parts }] });
        let json = self.post_json(&url, &body).await?;

        let text_parts = json
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ModelError::InvalidResponse("response has no candidate parts".to_string())
            })?;

        let text: String = text_parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();

        if text.is_empty() {
            return Err(ModelError::InvalidResponse(
                "candidate contains no text".to_string(),
            ));
        }
        Ok(text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent?key={}",
            self.api_base, self.embed_model, self.api_key
        );

        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] }
        });
        let json = self.post_json(&url, &body).await?;

        let values = json
            .pointer("/embedding/values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ModelError::InvalidResponse("embed response missing embedding.values".to_string())
            })?;

        Ok(values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_ref_name_from_uri() {
        let remote = RemoteRef::new("https://example.com/v1beta/files/abc-123");
        assert_eq!(remote.name(), "files/abc-123");
    }

    #[test]
    fn status_classification() {
        assert!(ModelError::from_status(429, String::new()).is_transient());
        assert!(ModelError::from_status(500, String::new()).is_transient());
        assert!(ModelError::from_status(503, String::new()).is_transient());
        assert!(!ModelError::from_status(400, String::new()).is_transient());
        assert!(!ModelError::from_status(404, String::new()).is_transient());
        assert!(ModelError::Network("reset".to_string()).is_transient());
    }
}
