//! HTTP client for the rendering service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::render::{JobStatus, RenderJobSpec, Renderer};

/// Rendering service configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Base URL of the rendering service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Prefix under which rendered outputs are written
    pub output_prefix: String,
}

impl RenderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> MediaResult<Self> {
        let base_url = std::env::var("RENDER_BASE_URL")
            .map_err(|_| MediaError::config("RENDER_BASE_URL must be set"))?;
        if base_url.trim().is_empty() {
            return Err(MediaError::config("RENDER_BASE_URL cannot be empty"));
        }
        let timeout = std::env::var("RENDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout),
            output_prefix: std::env::var("RENDER_OUTPUT_PREFIX")
                .unwrap_or_else(|_| "s3://mre-replays".to_string()),
        })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            output_prefix: "s3://mre-replays".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusResponse {
    status: JobStatus,
    #[serde(default)]
    error_message: Option<String>,
}

/// Renderer backed by a REST job API.
#[derive(Clone)]
pub struct HttpRenderer {
    http: Client,
    config: RenderConfig,
}

impl HttpRenderer {
    pub fn new(config: RenderConfig) -> MediaResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("mre-media/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    async fn error_from(response: reqwest::Response) -> MediaError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        MediaError::Http { status, message }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn submit(&self, job: &RenderJobSpec) -> MediaResult<String> {
        let url = format!("{}/jobs", self.config.base_url);
        let response = self.http.post(&url).json(job).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body: SubmitResponse = response.json().await?;
        debug!(job_id = %body.job_id, destination = %job.destination, "Render job accepted");
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &str) -> MediaResult<JobStatus> {
        let url = format!(
            "{}/jobs/{}",
            self.config.base_url,
            urlencoding::encode(job_id)
        );
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: StatusResponse = response.json().await?;
                if let Some(message) = body.error_message.filter(|_| body.status == JobStatus::Error) {
                    return Err(MediaError::render_failed(job_id, message));
                }
                Ok(body.status)
            }
            StatusCode::NOT_FOUND => Err(MediaError::render_failed(job_id, "unknown job")),
            _ => Err(Self::error_from(response).await),
        }
    }
}
