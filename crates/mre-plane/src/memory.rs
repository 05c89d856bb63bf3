//! In-memory control plane, segment store and chunk catalog.
//!
//! Backs local runs and engine tests. Writes follow the same contracts as the
//! REST client, including version checks on replay results.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use mre_models::{
    AttrValue, ClipPreviewFeedback, DebugEntry, EventInfo, MediaChunk, Profile, ReplayRequest,
    ReplayStatus, ReplayUpdate, ScanOrder, Segment, SegmentKey, TransitionConfig,
};
use mre_models::segment::seconds_to_millis;

use crate::error::{PlaneError, PlaneResult};
use crate::traits::{ChunkSource, ControlPlane, Page, SegmentQuery, SegmentStore};

type EventKey = (String, String);
type ReplayKey = (String, String, String);
type SegmentSlot = (String, String, String, SegmentKey);

fn poisoned() -> PlaneError {
    PlaneError::request_failed("in-memory plane lock poisoned")
}

/// Shared in-process state for every collaborator interface.
#[derive(Default)]
pub struct InMemoryPlane {
    events: RwLock<HashMap<EventKey, EventInfo>>,
    profiles: RwLock<HashMap<String, Profile>>,
    transitions: RwLock<HashMap<String, TransitionConfig>>,
    replays: RwLock<BTreeMap<ReplayKey, ReplayRequest>>,
    feedback: RwLock<Vec<ClipPreviewFeedback>>,
    segments: RwLock<BTreeMap<SegmentSlot, Segment>>,
    chunks: RwLock<HashMap<EventKey, Vec<MediaChunk>>>,
    /// Pending simulated concurrent writers on replay results
    injected_conflicts: AtomicU32,
    /// Pending simulated failures of results writes
    injected_write_failures: AtomicU32,
}

impl InMemoryPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, event: EventInfo) {
        if let Ok(mut events) = self.events.write() {
            events.insert((event.program.clone(), event.name.clone()), event);
        }
    }

    pub fn insert_profile(&self, profile: Profile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(profile.name.clone(), profile);
        }
    }

    pub fn insert_transition(&self, transition: TransitionConfig) {
        if let Ok(mut transitions) = self.transitions.write() {
            transitions.insert(transition.name.clone(), transition);
        }
    }

    pub fn insert_replay(&self, replay: ReplayRequest) {
        if let Ok(mut replays) = self.replays.write() {
            replays.insert(
                (
                    replay.program.clone(),
                    replay.event.clone(),
                    replay.replay_id.clone(),
                ),
                replay,
            );
        }
    }

    pub fn insert_feedback(&self, feedback: ClipPreviewFeedback) {
        if let Ok(mut all) = self.feedback.write() {
            all.push(feedback);
        }
    }

    pub fn insert_chunks(&self, program: &str, event: &str, chunks: Vec<MediaChunk>) {
        if let Ok(mut all) = self.chunks.write() {
            let entry = all
                .entry((program.to_string(), event.to_string()))
                .or_default();
            entry.extend(chunks);
            entry.sort_by(|a, b| a.start.total_cmp(&b.start));
        }
    }

    /// Snapshot of a stored replay request.
    pub fn replay(&self, program: &str, event: &str, replay_id: &str) -> Option<ReplayRequest> {
        self.replays.read().ok().and_then(|replays| {
            replays
                .get(&(program.to_string(), event.to_string(), replay_id.to_string()))
                .cloned()
        })
    }

    /// Make the next `count` results writes lose a race against another writer.
    ///
    /// Each simulated writer bumps the stored version before the check.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` results writes fail with a server error.
    pub fn inject_write_failures(&self, count: u32) {
        self.injected_write_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn with_replay_mut<T>(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        f: impl FnOnce(&mut ReplayRequest) -> PlaneResult<T>,
    ) -> PlaneResult<T> {
        let mut replays = self.replays.write().map_err(|_| poisoned())?;
        let replay = replays
            .get_mut(&(program.to_string(), event.to_string(), replay_id.to_string()))
            .ok_or_else(|| PlaneError::not_found(format!("replay {}", replay_id)))?;
        f(replay)
    }
}

#[async_trait]
impl ControlPlane for InMemoryPlane {
    async fn get_event(&self, program: &str, event: &str) -> PlaneResult<EventInfo> {
        let events = self.events.read().map_err(|_| poisoned())?;
        events
            .get(&(program.to_string(), event.to_string()))
            .cloned()
            .ok_or_else(|| PlaneError::not_found(format!("event {}/{}", program, event)))
    }

    async fn get_profile(&self, name: &str) -> PlaneResult<Profile> {
        let profiles = self.profiles.read().map_err(|_| poisoned())?;
        profiles
            .get(name)
            .cloned()
            .ok_or_else(|| PlaneError::not_found(format!("profile {}", name)))
    }

    async fn get_transition_config(&self, name: &str) -> PlaneResult<TransitionConfig> {
        let transitions = self.transitions.read().map_err(|_| poisoned())?;
        transitions
            .get(name)
            .cloned()
            .ok_or_else(|| PlaneError::not_found(format!("transition {}", name)))
    }

    async fn get_replay_request(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
    ) -> PlaneResult<ReplayRequest> {
        self.replay(program, event, replay_id)
            .ok_or_else(|| PlaneError::not_found(format!("replay {}", replay_id)))
    }

    async fn list_replay_requests(
        &self,
        program: &str,
        event: &str,
    ) -> PlaneResult<Vec<ReplayRequest>> {
        let replays = self.replays.read().map_err(|_| poisoned())?;
        Ok(replays
            .values()
            .filter(|r| r.program == program && r.event == event)
            .cloned()
            .collect())
    }

    async fn update_replay_status(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        status: ReplayStatus,
        debug: Option<String>,
    ) -> PlaneResult<()> {
        self.with_replay_mut(program, event, replay_id, |replay| {
            replay.status = status;
            if let Some(message) = debug {
                replay.debug_info.push(DebugEntry::now(message));
            }
            Ok(())
        })
    }

    async fn update_replay_results(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        expected_version: u64,
        update: &ReplayUpdate,
    ) -> PlaneResult<u64> {
        if Self::take_injected(&self.injected_write_failures) {
            return Err(PlaneError::ServerError(503, "injected write failure".into()));
        }
        let race = Self::take_injected(&self.injected_conflicts);

        self.with_replay_mut(program, event, replay_id, |replay| {
            if race {
                replay.version += 1;
            }
            if replay.version != expected_version {
                return Err(PlaneError::conflict(
                    format!("replay {}", replay_id),
                    expected_version,
                    replay.version,
                ));
            }
            replay.replay_results = update.replay_results.clone();
            replay.total_score = update.total_score;
            replay.debug_info.extend(update.debug_info.iter().cloned());
            replay.version += 1;
            Ok(replay.version)
        })
    }

    async fn update_segments_ignore_list(
        &self,
        program: &str,
        event: &str,
        replay_id: &str,
        blob_ids: &[String],
    ) -> PlaneResult<()> {
        self.with_replay_mut(program, event, replay_id, |replay| {
            replay.ignore_list.extend(blob_ids.iter().cloned());
            Ok(())
        })
    }

    async fn get_feedback(
        &self,
        program: &str,
        event: &str,
        classifier: &str,
    ) -> PlaneResult<Vec<ClipPreviewFeedback>> {
        let feedback = self.feedback.read().map_err(|_| poisoned())?;
        Ok(feedback
            .iter()
            .filter(|f| f.program == program && f.event == event && f.classifier == classifier)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SegmentStore for InMemoryPlane {
    async fn query(&self, query: &SegmentQuery) -> PlaneResult<Page<Segment>> {
        let segments = self.segments.read().map_err(|_| poisoned())?;

        let mut matching: Vec<&Segment> = segments
            .iter()
            .filter(|((program, event, classifier, _), _)| {
                program == &query.program
                    && event == &query.event
                    && classifier == &query.classifier
            })
            .map(|(_, segment)| segment)
            .filter(|segment| query.contains_start(segment.start))
            .collect();
        if query.order == ScanOrder::Descending {
            matching.reverse();
        }

        // The token is the offset of the next page
        let offset: usize = match query.page_token {
            Some(ref token) => token
                .parse()
                .map_err(|_| PlaneError::request_failed(format!("bad page token {}", token)))?,
            None => 0,
        };
        let limit = query.limit.max(1) as usize;

        let items: Vec<Segment> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|s| (*s).clone())
            .collect();
        let next = offset + items.len();
        let next_token = (next < matching.len()).then(|| next.to_string());

        Ok(Page { items, next_token })
    }

    async fn put(&self, segment: &Segment) -> PlaneResult<()> {
        let mut segments = self.segments.write().map_err(|_| poisoned())?;
        segments.insert(
            (
                segment.program.clone(),
                segment.event.clone(),
                segment.classifier.clone(),
                segment.key(),
            ),
            segment.clone(),
        );
        Ok(())
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
        let millis = seconds_to_millis(start);
        let mut segments = self.segments.write().map_err(|_| poisoned())?;
        let segment = segments
            .iter_mut()
            .find(|((p, e, c, key), _)| {
                p == program && e == event && c == classifier && key.start_millis == millis
            })
            .map(|(_, segment)| segment)
            .ok_or_else(|| PlaneError::not_found(format!("segment {}@{}", classifier, start)))?;
        segment.attributes.insert(name.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl ChunkSource for InMemoryPlane {
    async fn chunks_between(
        &self,
        program: &str,
        event: &str,
        start: f64,
        end: f64,
    ) -> PlaneResult<Vec<MediaChunk>> {
        let chunks = self.chunks.read().map_err(|_| poisoned())?;
        Ok(chunks
            .get(&(program.to_string(), event.to_string()))
            .map(|all| {
                all.iter()
                    .filter(|c| c.intersects(start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
