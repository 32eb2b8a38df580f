//! HTTP client for the analysis endpoint

use crate::error::AnalysisError;
use crate::verdict::{AnalysisResponse, Verdict};
use async_trait::async_trait;
use camlink_core::Credentials;
use camlink_media::Recording;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default analysis endpoint
pub const DEFAULT_ANALYZE_URL: &str = "http://localhost:8000/analisar";

/// Multipart field carrying the recording
pub const FILE_FIELD: &str = "file";

/// Something that can judge a recording
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Submit `recording` on behalf of the logged-in user
    async fn analyze(
        &self,
        recording: &Recording,
        credentials: &Credentials,
    ) -> Result<Verdict, AnalysisError>;
}

/// Uploads recordings to the analysis endpoint
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    endpoint: Url,
    timeout: Duration,
    http: reqwest::Client,
}

impl AnalysisClient {
    /// Default request timeout; uploads of a few minutes of video fit well within it
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a client for `endpoint`
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let endpoint = Url::parse(endpoint).map_err(|e| AnalysisError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AnalysisError::InvalidEndpoint {
                url: endpoint.to_string(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint,
            timeout,
            http,
        })
    }

    /// Endpoint in use
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn form(recording: &Recording) -> Result<Form, AnalysisError> {
        let part = Part::bytes(recording.data().to_vec())
            .file_name(recording.file_name())
            .mime_str(&recording.mime_type)?;
        Ok(Form::new().part(FILE_FIELD, part))
    }
}

#[async_trait]
impl Analyzer for AnalysisClient {
    async fn analyze(
        &self,
        recording: &Recording,
        credentials: &Credentials,
    ) -> Result<Verdict, AnalysisError> {
        if recording.is_empty() {
            return Err(AnalysisError::EmptyRecording);
        }

        info!(
            "Uploading {} bytes ({}) to {}",
            recording.len(),
            recording.codec.name(),
            self.endpoint
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(credentials.username(), Some(credentials.password()))
            .multipart(Self::form(recording)?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    AnalysisError::from(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("Analysis endpoint rejected the credentials");
            return Err(AnalysisError::Unauthorized);
        }
        if !status.is_success() {
            warn!("Analysis endpoint answered {}: {}", status, body);
            return Err(AnalysisError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnalysisResponse =
            serde_json::from_str(&body).map_err(|e| AnalysisError::InvalidResponse {
                reason: e.to_string(),
            })?;
        let verdict = Verdict::from(parsed);
        debug!("Analysis verdict: {:?}", verdict);
        Ok(verdict)
    }
}
