//! Feature cache storage.
//!
//! This crate provides:
//! - An S3 client for the feature cache bucket
//! - Partitioned cache keys `(program, event, hour, start, end, track)`
//! - The `FeatureCache` trait with S3-backed and in-memory implementations
//! - A local cache directory the engine scans after syncing

pub mod cache;
pub mod client;
pub mod error;
pub mod key;
pub mod local;

pub use cache::{FeatureCache, MemoryFeatureCache, S3FeatureCache};
pub use client::{Listing, S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use key::CacheKey;
pub use local::LocalCacheDir;
