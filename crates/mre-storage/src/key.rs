//! Feature cache keys.
//!
//! Blobs are partitioned by elapsed hour since the event started:
//!
//! ```text
//! {program}/{event}/{hour}/{start_ms}_{end_ms}_{track}.json
//! ```
//!
//! The part after the event prefix is the blob id. Replays record consumed
//! blob ids in their ignore list, and the local cache directory mirrors the
//! same relative layout.

use std::fmt;

use mre_models::segment::{hour_partition, seconds_to_millis};

use crate::error::{StorageError, StorageResult};

const BLOB_SUFFIX: &str = ".json";

/// Location of one cached feature blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub program: String,
    pub event: String,
    pub hour: u32,
    pub start_millis: i64,
    pub end_millis: i64,
    pub audio_track: u32,
}

impl CacheKey {
    /// Key for a segment's blob; the hour partition follows from `start`.
    pub fn for_segment(
        program: impl Into<String>,
        event: impl Into<String>,
        start: f64,
        end: f64,
        audio_track: u32,
    ) -> Self {
        Self {
            program: program.into(),
            event: event.into(),
            hour: hour_partition(start),
            start_millis: seconds_to_millis(start),
            end_millis: seconds_to_millis(end),
            audio_track,
        }
    }

    /// Prefix holding every partition of an event.
    pub fn event_prefix(program: &str, event: &str) -> String {
        format!(
            "{}/{}/",
            urlencoding::encode(program),
            urlencoding::encode(event)
        )
    }

    /// Prefix holding one hour partition of an event.
    pub fn partition_prefix(program: &str, event: &str, hour: u32) -> String {
        format!("{}{}/", Self::event_prefix(program, event), hour)
    }

    /// Event-relative identifier: `{hour}/{start_ms}_{end_ms}_{track}`.
    pub fn blob_id(&self) -> String {
        format!(
            "{}/{}_{}_{}",
            self.hour, self.start_millis, self.end_millis, self.audio_track
        )
    }

    /// Full object key in the blob store.
    pub fn object_key(&self) -> String {
        format!(
            "{}{}{}",
            Self::event_prefix(&self.program, &self.event),
            self.blob_id(),
            BLOB_SUFFIX
        )
    }

    /// Relative file path used in the local cache directory.
    pub fn relative_path(&self) -> String {
        format!("{}{}", self.blob_id(), BLOB_SUFFIX)
    }

    pub fn start(&self) -> f64 {
        self.start_millis as f64 / 1000.0
    }

    pub fn end(&self) -> f64 {
        self.end_millis as f64 / 1000.0
    }

    /// Parse a blob id back into a key for the given event.
    pub fn from_blob_id(program: &str, event: &str, blob_id: &str) -> StorageResult<Self> {
        let blob_id = blob_id.strip_suffix(BLOB_SUFFIX).unwrap_or(blob_id);
        let (hour, rest) = blob_id
            .split_once('/')
            .ok_or_else(|| StorageError::invalid_key(blob_id))?;

        let parts: Vec<&str> = rest.split('_').collect();
        if parts.len() != 3 {
            return Err(StorageError::invalid_key(blob_id));
        }

        let bad = |_| StorageError::invalid_key(blob_id);
        Ok(Self {
            program: program.to_string(),
            event: event.to_string(),
            hour: hour.parse().map_err(bad)?,
            start_millis: parts[0].parse().map_err(bad)?,
            end_millis: parts[1].parse().map_err(bad)?,
            audio_track: parts[2].parse().map_err(bad)?,
        })
    }

    /// Parse a full object key listed from the blob store.
    pub fn from_object_key(program: &str, event: &str, object_key: &str) -> StorageResult<Self> {
        let prefix = Self::event_prefix(program, event);
        let blob_id = object_key
            .strip_prefix(&prefix)
            .ok_or_else(|| StorageError::invalid_key(object_key))?;
        Self::from_blob_id(program, event, blob_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = CacheKey::for_segment("Tennis", "Final Day", 3605.25, 3610.0, 1);
        assert_eq!(key.hour, 1);
        assert_eq!(key.blob_id(), "1/3605250_3610000_1");
        assert_eq!(key.object_key(), "Tennis/Final%20Day/1/3605250_3610000_1.json");
        assert_eq!(key.relative_path(), "1/3605250_3610000_1.json");
    }

    #[test]
    fn test_parse_object_key() {
        let key = CacheKey::for_segment("Tennis", "Final Day", 5.0, 6.0, 2);
        let parsed = CacheKey::from_object_key("Tennis", "Final Day", &key.object_key()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.start(), 5.0);
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert!(CacheKey::from_object_key("Tennis", "Final", "Golf/Final/0/1_2_1.json").is_err());
        assert!(CacheKey::from_blob_id("p", "e", "0/1_2").is_err());
        assert!(CacheKey::from_blob_id("p", "e", "x/1_2_1").is_err());
        assert!(CacheKey::from_blob_id("p", "e", "nohour").is_err());
    }
}
