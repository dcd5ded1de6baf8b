//! HTTP client for a REST code-execution service.
//!
//! Endpoints:
//! - `POST   {base}/sandboxes` creates an environment
//! - `PUT    {base}/sandboxes/{id}/files?path=...` uploads a file
//! - `POST   {base}/sandboxes/{id}/execute` runs code
//! - `DELETE {base}/sandboxes/{id}` tears it down

use super::{Artifact, ArtifactKind, ExecutionOutput, SandboxClient, SandboxError, SandboxHandle};
use crate::models::DatasetRef;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the execution service.
#[derive(Debug, Clone)]
pub struct HttpSandboxConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub template: String,
    pub timeout_seconds: u64,
    /// File name the dataset is stored under inside the sandbox
    pub remote_dataset_name: String,
}

impl Default for HttpSandboxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:49999".to_string(),
            api_key: None,
            template: "python-data".to_string(),
            timeout_seconds: 60,
            remote_dataset_name: "data.csv".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    template: &'a str,
    timeout: u64,
    metadata: CreateMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct CreateMetadata<'a> {
    dataset: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<ExecutionErrorPayload>,
    #[serde(default)]
    results: Vec<ResultPayload>,
}

#[derive(Debug, Deserialize)]
struct ExecutionErrorPayload {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    traceback: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultPayload {
    #[serde(default)]
    png: Option<String>,
    #[serde(default)]
    jpeg: Option<String>,
}

impl ExecuteResponse {
    fn into_output(self) -> Result<ExecutionOutput, SandboxError> {
        if let Some(error) = self.error {
            let mut message = format!("{}: {}", error.name, error.value);
            if !error.traceback.is_empty() {
                message.push('\n');
                message.push_str(&error.traceback);
            }
            return Err(SandboxError::from_message(message));
        }

        let artifacts = self
            .results
            .into_iter()
            .filter_map(|result| {
                if let Some(data) = result.png {
                    Some(Artifact {
                        kind: ArtifactKind::Png,
                        data,
                    })
                } else {
                    result.jpeg.map(|data| Artifact {
                        kind: ArtifactKind::Jpeg,
                        data,
                    })
                }
            })
            .collect();

        Ok(ExecutionOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            artifacts,
        })
    }
}

/// [`SandboxClient`] over HTTP.
pub struct HttpSandboxClient {
    config: HttpSandboxConfig,
    http_client: reqwest::Client,
}

impl HttpSandboxClient {
    pub fn new(config: HttpSandboxConfig) -> Result<Self, SandboxError> {
        info!("Using sandbox service at {}", config.base_url);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SandboxError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn handle_id<'a>(&self, handle: &'a SandboxHandle) -> Result<&'a str, SandboxError> {
        handle
            .id()
            .ok_or_else(|| SandboxError::NotFound("sandbox handle has no environment".to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SandboxError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                SandboxError::Timeout(format!(
                    "Request timed out after {}s",
                    self.config.timeout_seconds
                ))
            } else if e.is_connect() {
                SandboxError::Other(format!(
                    "Cannot connect to sandbox service at {}",
                    self.config.base_url
                ))
            } else {
                SandboxError::Other(format!("Failed to send request: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn status_error(status: StatusCode, body: &str) -> SandboxError {
    match status {
        StatusCode::NOT_FOUND => {
            SandboxError::NotFound(format!("The sandbox was not found: {}", body))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            SandboxError::Timeout(format!("Sandbox API error {}: {}", status, body))
        }
        _ => SandboxError::from_message(format!("Sandbox API error {}: {}", status, body)),
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn create(&self, dataset: &DatasetRef) -> Result<SandboxHandle, SandboxError> {
        let request = CreateRequest {
            template: &self.config.template,
            timeout: self.config.timeout_seconds,
            metadata: CreateMetadata {
                dataset: &dataset.name,
            },
        };

        let response = self
            .send(self.http_client.post(self.url("/sandboxes")).json(&request))
            .await?;

        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Other(format!("Failed to parse sandbox response: {}", e)))?;

        info!("Created sandbox {}", created.id);
        Ok(SandboxHandle::active(created.id))
    }

    async fn upload(&self, handle: &SandboxHandle, dataset: &DatasetRef) -> Result<(), SandboxError> {
        let id = self.handle_id(handle)?;
        let url = self.url(&format!("/sandboxes/{}/files", id));

        debug!(
            "Uploading {} ({} bytes) as {}",
            dataset.name,
            dataset.len(),
            self.config.remote_dataset_name
        );

        self.send(
            self.http_client
                .put(url)
                .query(&[("path", self.config.remote_dataset_name.as_str())])
                .body(dataset.content.clone()),
        )
        .await?;

        Ok(())
    }

    async fn execute(&self, handle: &SandboxHandle, code: &str) -> Result<ExecutionOutput, SandboxError> {
        let id = self.handle_id(handle)?;
        let url = self.url(&format!("/sandboxes/{}/execute", id));

        let response = self
            .send(self.http_client.post(url).json(&ExecuteRequest { code }))
            .await?;

        let payload: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Other(format!("Failed to parse execution response: {}", e)))?;

        payload.into_output()
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let Some(id) = handle.id() else {
            return Ok(());
        };
        let url = self.url(&format!("/sandboxes/{}", id));

        match self.send(self.http_client.delete(url)).await {
            Ok(_) => {
                debug!("Destroyed sandbox {}", id);
                Ok(())
            }
            Err(SandboxError::NotFound(_)) => {
                debug!("Sandbox {} was already gone", id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to destroy sandbox {}: {}", id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;

    #[test]
    fn test_success_payload_with_images() {
        let payload: ExecuteResponse = serde_json::from_str(
            r#"{
                "stdout": "(891, 12)\n",
                "results": [{"png": "iVBORw0KGgo="}, {"jpeg": "/9j/4AAQ"}, {}]
            }"#,
        )
        .unwrap();

        let output = payload.into_output().unwrap();
        assert_eq!(output.stdout, "(891, 12)\n");
        assert_eq!(output.artifacts.len(), 2);
        assert_eq!(output.artifacts[0].kind, ArtifactKind::Png);
        assert_eq!(output.artifacts[1].kind, ArtifactKind::Jpeg);
    }

    #[test]
    fn test_error_payload_is_classified() {
        let payload: ExecuteResponse = serde_json::from_str(
            r#"{"error": {"name": "ModuleNotFoundError", "value": "No module named 'lightgbm'"}}"#,
        )
        .unwrap();

        let err = payload.into_output().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Import);
        assert!(err.message().contains("lightgbm"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "gone").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            status_error(StatusCode::GATEWAY_TIMEOUT, "").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom").kind(),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_url_joining() {
        let client = HttpSandboxClient::new(HttpSandboxConfig {
            base_url: "http://sandbox.local/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/sandboxes"), "http://sandbox.local/sandboxes");
    }

    #[tokio::test]
    async fn test_unprovisioned_handle_is_not_found() {
        let client = HttpSandboxClient::new(HttpSandboxConfig::default()).unwrap();
        let err = client
            .execute(&SandboxHandle::uninitialized(), "print(1)")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(client.destroy(&SandboxHandle::uninitialized()).await.is_ok());
    }
}
