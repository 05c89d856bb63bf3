//! Control plane REST client.
//!
//! One HTTP client serves the three collaborator interfaces:
//! - Control API (events, profiles, transitions, replay requests, feedback)
//! - Segment store range queries and writes
//! - Media chunk catalog lookups
//!
//! Requests are traced, timed into metrics and retried with backoff.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mre_models::{
    AttrValue, ClipPreviewFeedback, EventInfo, MediaChunk, Profile, ReplayRequest, ReplayStatus,
    ReplayUpdate, Segment, TransitionConfig,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::error::{PlaneError, PlaneResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::traits::{ChunkSource, ControlPlane, Page, SegmentQuery, SegmentStore};

/// Control plane client configuration.
#[derive(Debug, Clone)]
pub struct PlaneConfig {
    /// Base URL of the control API, without trailing slash
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl PlaneConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PlaneResult<Self> {
        let base_url = std::env::var("PLANE_BASE_URL")
            .map_err(|_| PlaneError::config("PLANE_BASE_URL must be set"))?;
        if base_url.trim().is_empty() {
            return Err(PlaneError::config("PLANE_BASE_URL cannot be empty"));
        }

        let secs = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(secs("PLANE_TIMEOUT_SECS", 30)),
            connect_timeout: Duration::from_secs(secs("PLANE_CONNECT_TIMEOUT_SECS", 5)),
            retry: RetryConfig::from_env(),
        })
    }

    /// Config pointing at an explicit base URL with default timeouts.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionBody {
    version: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StatusBody<'a> {
    status: ReplayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_info: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct IgnoreListBody<'a> {
    blob_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeBody<'a> {
    program: &'a str,
    event: &'a str,
    plugin_name: &'a str,
    start: f64,
    attrib_name: &'a str,
    value: &'a AttrValue,
}

/// REST client for the control plane.
#[derive(Clone)]
pub struct PlaneClient {
    http: Client,
    config: PlaneConfig,
}

impl PlaneClient {
    /// Create a new client.
    pub fn new(config: PlaneConfig) -> PlaneResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("mre-plane/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PlaneError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> PlaneResult<Self> {
        Self::new(PlaneConfig::from_env()?)
    }

    fn url(&self, segments: &[&str]) -> String {
        let path: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.config.base_url, path.join("/"))
    }

    fn replay_url(&self, program: &str, event: &str, replay_id: &str, tail: &[&str]) -> String {
        let mut parts = vec!["replay", "program", program, "event", event, "replayid", replay_id];
        parts.extend_from_slice(tail);
        self.url(&parts)
    }

    /// GET a JSON document; 404 maps to `NotFound(what)`.
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        operation: &'static str,
        url: &str,
        what: &str,
    ) -> PlaneResult<T> {
        with_retry(&self.config.retry, operation, move || {
            self.execute_request(operation, async move {
                let response = self.http.get(url).send().await?;
                match response.status() {
                    StatusCode::OK => Ok(response.json::<T>().await?),
                    StatusCode::NOT_FOUND => Err(PlaneError::not_found(what.to_string())),
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Send a JSON body, expecting a 2xx.
    async fn send_json<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        body: &B,
        what: &str,
    ) -> PlaneResult<()> {
        let method = &method;
        with_retry(&self.config.retry, operation, move || {
            self.execute_request(operation, async move {
                let response = self
                    .http
                    .request(method.clone(), url)
                    .json(body)
                    .send()
                    .await?;
                match response.status() {
                    s if s.is_success() => Ok(()),
                    StatusCode::NOT_FOUND => Err(PlaneError::not_found(what.to_string())),
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(&self, operation: &'static str, fut: F) -> PlaneResult<T>
    where
        F: std::future::Future<Output = PlaneResult<T>>,
    {
        let span = info_span!("plane_request", operation = %operation);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        record_request(operation, &result, start.elapsed());
        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> PlaneError {
        let body = response.text().await.unwrap_or_default();
        PlaneError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl ControlPlane for PlaneClient {
    async fn get_event(&self, program: &str, event: &str) -> PlaneResult<EventInfo> {
        let url = self.url(&["event", event, "program", program]);
        self.get_json("get_event", &url, &format!("event {}/{}", program, event))
            .await
    }

    async fn get_profile(&self, name: &str) -> PlaneResult<Profile> {
        let url = self.url(&["profile", name]);
        self.get_json("get_profile", &url, &format!("profile {}", name))
            .await
    }

    async fn get_transition_config(&self, name: &str) -> PlaneResult<TransitionConfig> {
        let url = self.url(&["replay", "transition", name]);
        self.get_json("get_transition_config", &url, &format!("transition {}", name))
            .await
    }

    async fn get_replay_request(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
    ) -> PlaneResult<ReplayRequest> {
        let url = self.replay_url(program, event, replay_id, &[]);
        self.get_json("get_replay_request", &url, &format!("replay {}", replay_id))
            .await
    }

    async fn list_replay_requests(
        &self,
        program: &str,
        event: &str,
    ) -> PlaneResult<Vec<ReplayRequest>> {
        let url = self.url(&["replay", "program", program, "event", event, "all"]);
        match self
            .get_json("list_replay_requests", &url, "replays")
            .await
        {
            Err(PlaneError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn update_replay_status(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        status: ReplayStatus,
        debug: Option<String>,
    ) -> PlaneResult<()> {
        let url = self.replay_url(program, event, replay_id, &["status"]);
        let body = StatusBody {
            status,
            debug_info: debug.as_deref(),
        };
        debug!(replay_id = %replay_id, status = %status, "Updating replay status");
        self.send_json(
            "update_replay_status",
            Method::PUT,
            &url,
            &body,
            &format!("replay {}", replay_id),
        )
        .await
    }

    async fn update_replay_results(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        expected_version: u64,
        update: &ReplayUpdate,
    ) -> PlaneResult<u64> {
        let url = &self.replay_url(program, event, replay_id, &["results"]);
        let operation = "update_replay_results";

        with_retry(&self.config.retry, operation, move || {
            self.execute_request(operation, async move {
                let response = self
                    .http
                    .put(url)
                    .header(reqwest::header::IF_MATCH, expected_version.to_string())
                    .json(update)
                    .send()
                    .await?;

                match response.status() {
                    s if s.is_success() => {
                        let body: VersionBody = response.json().await?;
                        Ok(body.version)
                    }
                    StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                        let actual = response
                            .json::<VersionBody>()
                            .await
                            .map(|b| b.version)
                            .unwrap_or(expected_version);
                        Err(PlaneError::conflict(
                            format!("replay {}", replay_id),
                            expected_version,
                            actual,
                        ))
                    }
                    StatusCode::NOT_FOUND => {
                        Err(PlaneError::not_found(format!("replay {}", replay_id)))
                    }
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    async fn update_segments_ignore_list(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        blob_ids: &[String],
    ) -> PlaneResult<()> {
        if blob_ids.is_empty() {
            return Ok(());
        }
        let url = self.replay_url(program, event, replay_id, &["ignorelist"]);
        self.send_json(
            "update_segments_ignore_list",
            Method::PUT,
            &url,
            &IgnoreListBody { blob_ids },
            &format!("replay {}", replay_id),
        )
        .await
    }

    async fn get_feedback(
        &self,
        program: &str,
        event: &str,
        classifier: &str,
    ) -> PlaneResult<Vec<ClipPreviewFeedback>> {
        let url = self.url(&[
            "clippreview", "feedback", "program", program, "event", event, "classifier",
            classifier,
        ]);
        match self.get_json("get_feedback", &url, "feedback").await {
            Err(PlaneError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }
}

#[async_trait]
impl SegmentStore for PlaneClient {
    async fn query(&self, query: &SegmentQuery) -> PlaneResult<Page<Segment>> {
        let url = &self.url(&["segments", "query"]);
        let operation = "query_segments";

        with_retry(&self.config.retry, operation, move || {
            self.execute_request(operation, async move {
                let response = self.http.post(url).json(query).send().await?;
                match response.status() {
                    StatusCode::OK => Ok(response.json::<Page<Segment>>().await?),
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    async fn put(&self, segment: &Segment) -> PlaneResult<()> {
        let url = self.url(&["segments"]);
        self.send_json("put_segment", Method::POST, &url, segment, "segments")
            .await
    }

    async fn add_attribute(
        &self,
        program: &str,
        event: &str,
        classifier: &str,
        start: f64,
        name: &str,
        value: AttrValue,
    ) -> PlaneResult<()> {
        let url = self.url(&["segments", "attribute"]);
        let body = AttributeBody {
            program,
            event,
            plugin_name: classifier,
            start,
            attrib_name: name,
            value: &value,
        };
        self.send_json(
            "add_segment_attribute",
            Method::PUT,
            &url,
            &body,
            &format!("segment {}@{}", classifier, start),
        )
        .await
    }
}

#[async_trait]
impl ChunkSource for PlaneClient {
    async fn chunks_between(
        &self,
        program: &str,
        event: &str,
        start: f64,
        end: f64,
    ) -> PlaneResult<Vec<MediaChunk>> {
        let url = format!(
            "{}?start={}&end={}",
            self.url(&["chunks", "program", program, "event", event]),
            start,
            end
        );
        let mut chunks: Vec<MediaChunk> = self
            .get_json("chunks_between", &url, &format!("chunks {}/{}", program, event))
            .await?;
        chunks.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(chunks)
    }
}
