//! Outbound calls to the orchestrator's HTTP API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::ApiError;
use crate::protocol::DocumentInfo;

pub const INITIATE_PATH: &str = "/v1/initiate_from_svad";
pub const HEALTH_PATH: &str = "/health";

/// Multipart field the orchestrator reads the document from.
const DOCUMENT_FIELD: &str = "svad_file";

/// A document loaded from disk, ready to submit.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn read(path: &Path) -> Result<Self, ApiError> {
        let bytes = std::fs::read(path).map_err(|source| ApiError::DocumentRead {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.md".to_string());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            bytes,
        })
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            name: self.name.clone(),
            size: self.bytes.len() as u64,
            content: String::from_utf8(self.bytes.clone()).ok(),
        }
    }

    fn mime(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_raw()
            .unwrap_or("text/markdown")
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitiateResponse {
    pub run_id: String,
    #[serde(default)]
    pub message: String,
}

/// Body of an approval submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
    pub user_response: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApprovalResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StopResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// The orchestrator endpoints this client calls.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    async fn initiate(&self, document: &Document) -> Result<InitiateResponse, ApiError>;

    async fn approve(
        &self,
        run_id: &str,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApiError>;

    async fn stop(&self, run_id: &str) -> Result<StopResponse, ApiError>;

    async fn health(&self) -> Result<HealthResponse, ApiError>;
}

pub fn approve_path(run_id: &str) -> String {
    format!("/v1/run/{}/approve_plan", run_id)
}

pub fn stop_path(run_id: &str) -> String {
    format!("/v1/run/{}/stop", run_id)
}

/// [`OrchestratorApi`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base: Url,
    request_timeout: Duration,
    approval_timeout: Duration,
}

impl HttpOrchestrator {
    pub fn new(base: Url, request_timeout: Duration, approval_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            request_timeout,
            approval_timeout,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|e| ApiError::Transport {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Non-2xx becomes `ApiError::Status` with the response body.
    async fn checked(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl OrchestratorApi for HttpOrchestrator {
    async fn initiate(&self, document: &Document) -> Result<InitiateResponse, ApiError> {
        let url = self.endpoint(INITIATE_PATH)?;
        let part = Part::bytes(document.bytes.clone())
            .file_name(document.name.clone())
            .mime_str(&document.mime())
            .map_err(|e| ApiError::from_reqwest(INITIATE_PATH, e))?;
        let form = Form::new().part(DOCUMENT_FIELD, part);

        debug!(url = %url, document = %document.name, "Submitting document");
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(INITIATE_PATH, e))?;
        let response = Self::checked(INITIATE_PATH, response).await?;
        let body: InitiateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::from_reqwest(INITIATE_PATH, e))?;
        if body.run_id.is_empty() {
            return Err(ApiError::InvalidResponse {
                endpoint: INITIATE_PATH.to_string(),
                message: "empty run_id".to_string(),
            });
        }
        Ok(body)
    }

    async fn approve(
        &self,
        run_id: &str,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApiError> {
        let path = approve_path(run_id);
        let url = self.endpoint(&path)?;
        debug!(url = %url, approved = request.approved, "Submitting approval");
        let response = self
            .client
            .post(url)
            .timeout(self.approval_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(&path, e))?;
        let response = Self::checked(&path, response).await?;
        // The orchestrator's acknowledgement body is informational.
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(&path, e))?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    async fn stop(&self, run_id: &str) -> Result<StopResponse, ApiError> {
        let path = stop_path(run_id);
        let url = self.endpoint(&path)?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(&path, e))?;
        let response = Self::checked(&path, response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::from_reqwest(&path, e))
    }

    async fn health(&self) -> Result<HealthResponse, ApiError> {
        let url = self.endpoint(HEALTH_PATH)?;
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(HEALTH_PATH, e))?;
        let response = Self::checked(HEALTH_PATH, response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::from_reqwest(HEALTH_PATH, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_document_read_and_info() {
        let mut file = NamedTempFile::with_suffix(".md").unwrap();
        write!(file, "# System").unwrap();
        let doc = Document::read(file.path()).unwrap();
        assert!(doc.name.ends_with(".md"));
        let info = doc.info();
        assert_eq!(info.size, 8);
        assert_eq!(info.content.as_deref(), Some("# System"));
        assert_eq!(doc.mime(), "text/markdown");
    }

    #[test]
    fn test_document_read_missing_file() {
        let err = Document::read(Path::new("/definitely/not/here.md")).unwrap_err();
        assert!(matches!(err, ApiError::DocumentRead { .. }));
    }

    #[test]
    fn test_binary_document_has_no_content() {
        let doc = Document {
            path: PathBuf::from("x.bin"),
            name: "x.bin".into(),
            bytes: vec![0xff, 0xfe],
        };
        assert_eq!(doc.info().content, None);
    }

    #[test]
    fn test_paths() {
        assert_eq!(approve_path("r1"), "/v1/run/r1/approve_plan");
        assert_eq!(stop_path("r1"), "/v1/run/r1/stop");
    }

    #[test]
    fn test_approval_request_body_shape() {
        let body = serde_json::to_value(ApprovalRequest {
            approved: true,
            user_response: "looks good".into(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"approved": true, "user_response": "looks good"})
        );
    }

    #[test]
    fn test_initiate_response_parses_without_message() {
        let parsed: InitiateResponse = serde_json::from_str(r#"{"run_id":"run-1"}"#).unwrap();
        assert_eq!(parsed.run_id, "run-1");
        assert!(parsed.message.is_empty());
    }
}
