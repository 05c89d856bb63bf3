//! Collaborator interfaces consumed by the replay engine.

use async_trait::async_trait;
use mre_models::{
    AttrValue, ClipPreviewFeedback, EventInfo, MediaChunk, Profile, ReplayRequest, ReplayStatus,
    ReplayUpdate, ScanOrder, Segment, TransitionConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::PlaneResult;

/// Default page size for segment range queries.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Range query over segment start times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SegmentQuery {
    pub program: String,
    pub event: String,
    pub classifier: String,
    /// Inclusive lower bound on `start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<f64>,
    /// Inclusive upper bound on `start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_to: Option<f64>,
    pub order: ScanOrder,
    pub limit: u32,
    /// Opaque continuation token from the previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl SegmentQuery {
    pub fn new(
        program: impl Into<String>,
        event: impl Into<String>,
        classifier: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            event: event.into(),
            classifier: classifier.into(),
            start_from: None,
            start_to: None,
            order: ScanOrder::Ascending,
            limit: DEFAULT_PAGE_SIZE,
            page_token: None,
        }
    }

    pub fn with_start_range(mut self, from: Option<f64>, to: Option<f64>) -> Self {
        self.start_from = from;
        self.start_to = to;
        self
    }

    pub fn with_order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Whether a start time falls inside the requested range.
    pub fn contains_start(&self, start: f64) -> bool {
        self.start_from.map(|from| start >= from).unwrap_or(true)
            && self.start_to.map(|to| start <= to).unwrap_or(true)
    }
}

/// One page of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Key-value store of detected segments.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Paginated range query by start time.
    async fn query(&self, query: &SegmentQuery) -> PlaneResult<Page<Segment>>;

    /// Insert or replace a segment.
    async fn put(&self, segment: &Segment) -> PlaneResult<()>;

    /// Set one plugin attribute on an existing segment.
    async fn add_attribute(
        &self,
        program: &str,
        event: &str,
        classifier: &str,
        start: f64,
        name: &str,
        value: AttrValue,
    ) -> PlaneResult<()>;
}

/// Catalog of raw media chunks of an event's source stream.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Chunks covering any part of `[start, end]`, ordered by start.
    async fn chunks_between(
        &self,
        program: &str,
        event: &str,
        start: f64,
        end: f64,
    ) -> PlaneResult<Vec<MediaChunk>>;
}

/// Control API holding replay requests and their configuration.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_event(&self, program: &str, event: &str) -> PlaneResult<EventInfo>;

    async fn get_profile(&self, name: &str) -> PlaneResult<Profile>;

    async fn get_transition_config(&self, name: &str) -> PlaneResult<TransitionConfig>;

    async fn get_replay_request(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
    ) -> PlaneResult<ReplayRequest>;

    /// Every replay request defined for an event.
    async fn list_replay_requests(&self, program: &str, event: &str)
        -> PlaneResult<Vec<ReplayRequest>>;

    /// Set the status, optionally appending an audit entry.
    async fn update_replay_status(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        status: ReplayStatus,
        debug: Option<String>,
    ) -> PlaneResult<()>;

    /// Conditionally replace the results.
    ///
    /// Fails with `ConcurrencyConflict` when the stored version differs from
    /// `expected_version`; returns the new version otherwise.
    async fn update_replay_results(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        expected_version: u64,
        update: &ReplayUpdate,
    ) -> PlaneResult<u64>;

    /// Add consumed blob ids to the replay's ignore list.
    async fn update_segments_ignore_list(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        blob_ids: &[String],
    ) -> PlaneResult<()>;

    /// Like/dislike annotations for segments of one classifier.
    async fn get_feedback(
        &self,
        program: &str,
        event: &str,
        classifier: &str,
    ) -> PlaneResult<Vec<ClipPreviewFeedback>>;
}
