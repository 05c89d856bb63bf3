//! Replay engine worker.
//!
//! This crate provides:
//! - Feature cache sync into a local directory
//! - Feature matching with like/dislike feedback
//! - Result merging, overlap rejection and duration-based summarization
//! - The replay engine state machine driven by lifecycle events
//! - Clip rendering coordination
//! - A Redis Streams executor with retry and dead-lettering

pub mod cache_sync;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod feature_processor;
pub mod logging;
pub mod metrics;
pub mod render;
pub mod retry;
pub mod selection;

pub use cache_sync::{CacheSyncManager, SyncReport};
pub use config::{EngineSettings, WorkerConfig};
pub use engine::{EngineContext, ReplayAction, ReplayEngine, ReplayOutcome, SkipReason};
pub use error::{WorkerError, WorkerResult};
pub use executor::{decide, DeliveryDecision, EventExecutor};
pub use feature_processor::{match_criteria, MatchOutcome, ReplayFeatureProcessor};
pub use logging::ReplayLogger;
pub use render::RenderCoordinator;
pub use selection::{is_non_overlapping, merge_results, summarize, Merged};
