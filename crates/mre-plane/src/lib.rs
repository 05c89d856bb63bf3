//! Control plane access for the Media Replay Engine.
//!
//! This crate provides:
//! - Collaborator traits for the control API, segment store and chunk catalog
//! - A REST client implementing all three with retries and metrics
//! - An in-memory implementation for local runs and tests
//! - Paged segment fetches, with root-segment thinning for callers outside
//!   the replay engine that only list top-level segments

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod thinning;
pub mod traits;

pub use client::{PlaneClient, PlaneConfig};
pub use error::{PlaneError, PlaneResult};
pub use memory::InMemoryPlane;
pub use retry::{with_retry, RetryConfig};
pub use thinning::{fetch_root_segments, fetch_segments};
pub use traits::{ChunkSource, ControlPlane, Page, SegmentQuery, SegmentStore, DEFAULT_PAGE_SIZE};
