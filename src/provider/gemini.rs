//! Gemini batch API adapter.
//!
//! Talks to the generative-language REST surface: file upload, batch
//! creation against a fixed model, operation polling, and result download.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use super::{BatchProvider, BatchState, ProviderError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// HTTP client for the Gemini batch API.
pub struct GeminiBatchClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl GeminiBatchClient {
    /// Create a client with the given API key and per-call timeout.
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    /// Create a client from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Malformed("GEMINI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key, timeout))
    }

    /// Override the API endpoint (used by tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn read_json(response: Response) -> Result<Value, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::FloodWait(Duration::from_secs(
                retry_after.unwrap_or(30),
            )));
        }
        if status.is_server_error() {
            return Err(ProviderError::Transient {
                status: status.as_u16(),
                message,
            });
        }
        Err(ProviderError::Permanent {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_batch(&self, handle: &str) -> Result<Option<Value>, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, handle))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::read_json(response).await?))
    }
}

#[async_trait]
impl BatchProvider for GeminiBatchClient {
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
    ) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(path).await?;
        let metadata = serde_json::json!({ "file": { "display_name": display_name } });

        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?,
            )
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(display_name.to_string())
                    .mime_str("application/jsonl")
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?,
            );

        let response = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let value = Self::read_json(response).await?;

        value
            .pointer("/file/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("upload response carries no file name".into()))
    }

    async fn create_batch(
        &self,
        model: &str,
        file_name: &str,
        display_name: &str,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "batch": {
                "display_name": display_name,
                "input_config": { "file_name": file_name },
            }
        });

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:batchGenerateContent",
                self.base_url, model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let value = Self::read_json(response).await?;

        value
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("batch response carries no name".into()))
    }

    async fn batch_state(&self, handle: &str) -> Result<Option<BatchState>, ProviderError> {
        let Some(value) = self.get_batch(handle).await? else {
            return Ok(None);
        };
        let state = value
            .pointer("/metadata/state")
            .or_else(|| value.get("state"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed("batch carries no state".into()))?;
        Ok(Some(BatchState::from_provider(state)))
    }

    async fn result_file_name(&self, handle: &str) -> Result<Option<String>, ProviderError> {
        let Some(value) = self.get_batch(handle).await? else {
            return Ok(None);
        };
        let file_name = ["/dest/file_name", "/metadata/dest/file_name", "/response/dest/file_name"]
            .iter()
            .find_map(|pointer| value.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(file_name)
    }

    async fn download_file(&self, file_name: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .http
            .get(format!(
                "{}/v1beta/{}:download?alt=media",
                self.base_url, file_name
            ))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                ProviderError::Transient {
                    status: status.as_u16(),
                    message,
                }
            } else {
                ProviderError::Permanent {
                    status: status.as_u16(),
                    message,
                }
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
