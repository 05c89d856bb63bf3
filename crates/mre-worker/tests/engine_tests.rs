//! End-to-end engine behavior against in-memory collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mre_events::MemoryEventBus;
use mre_media::MemoryRenderer;
use mre_models::{
    detail_types, AttrValue, BoundaryContext, ClipPreviewFeedback, EventInfo, FeatureBlob,
    FeatureCriterion, FeatureDataPoint, FeedbackKind, LifecycleEvent, LifecycleState, MediaChunk,
    Profile, ReplayRequest, ReplayStatus, Segment, TransitionConfig, VIDEO_GROUP,
};
use mre_plane::{InMemoryPlane, Page, PlaneResult, SegmentQuery, SegmentStore};
use mre_storage::{CacheKey, FeatureCache, MemoryFeatureCache};
use mre_worker::{
    is_non_overlapping, EngineContext, EngineSettings, ReplayAction, ReplayEngine, SkipReason,
    WorkerError,
};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const PROGRAM: &str = "Tennis";
const EVENT: &str = "Final";
const CLASSIFIER: &str = "Rally";

struct Harness {
    plane: Arc<InMemoryPlane>,
    cache: Arc<MemoryFeatureCache>,
    bus: Arc<MemoryEventBus>,
    renderer: Arc<MemoryRenderer>,
    engine: ReplayEngine,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_profile(Profile::new("TennisProfile", CLASSIFIER))
    }

    fn with_profile(profile: Profile) -> Self {
        Self::with_segment_store(profile, |plane| plane)
    }

    /// Harness whose engine reads segments through `wrap(plane)`.
    fn with_segment_store<S: SegmentStore + 'static>(
        profile: Profile,
        wrap: impl FnOnce(Arc<InMemoryPlane>) -> Arc<S>,
    ) -> Self {
        let plane = Arc::new(InMemoryPlane::new());
        plane.insert_event(EventInfo::new(EVENT, PROGRAM, profile.name.clone()));
        plane.insert_profile(profile);

        let cache = Arc::new(MemoryFeatureCache::new());
        let bus = Arc::new(MemoryEventBus::new());
        let renderer = Arc::new(MemoryRenderer::new());
        let dir = tempfile::tempdir().unwrap();

        let settings = EngineSettings {
            cache_dir: dir.path().to_path_buf(),
            render_poll_interval: Duration::from_millis(1),
            sync_retry_base_delay: Duration::from_millis(1),
            ..EngineSettings::default()
        };
        let engine = ReplayEngine::new(EngineContext {
            plane: plane.clone(),
            segments: wrap(plane.clone()),
            chunks: plane.clone(),
            cache: cache.clone(),
            bus: bus.clone(),
            renderer: renderer.clone(),
            settings,
        });

        Self {
            plane,
            cache,
            bus,
            renderer,
            engine,
            _dir: dir,
        }
    }

    /// Store a detected segment and its cached features.
    async fn seed(&self, start: f64, end: f64, game_point: Option<bool>) {
        self.seed_segment(Segment::new(PROGRAM, EVENT, CLASSIFIER, start, end), game_point)
            .await;
    }

    async fn seed_segment(&self, segment: Segment, game_point: Option<bool>) {
        let mut blob = FeatureBlob::new(segment.start, segment.end);
        if let Some(value) = game_point {
            blob.push(
                VIDEO_GROUP,
                FeatureDataPoint::new(segment.start, segment.end)
                    .with_plugin("Score")
                    .with_attribute("GamePoint", value),
            );
        }
        let key = CacheKey::for_segment(PROGRAM, EVENT, segment.start, segment.end, 1);
        self.cache.put(&key, &blob).await.unwrap();
        self.plane.put(&segment).await.unwrap();
    }

    fn replay(&self, id: &str) -> ReplayRequest {
        self.plane.replay(PROGRAM, EVENT, id).unwrap()
    }
}

fn request(id: &str, catchup: bool) -> ReplayRequest {
    ReplayRequest::new(PROGRAM, EVENT, id)
        .with_feature(FeatureCriterion::new("Score", "GamePoint", true).with_weight(1.0))
        .with_catchup(catchup)
}

fn bounds(replay: &ReplayRequest) -> Vec<(f64, f64)> {
    replay
        .replay_results
        .iter()
        .map(|r| (r.effective_start(), r.effective_end()))
        .collect()
}

fn created(id: &str) -> LifecycleEvent {
    LifecycleEvent::replay(LifecycleState::ReplayCreated, PROGRAM, EVENT, id)
}

fn segment_cached(start: f64, end: f64) -> LifecycleEvent {
    LifecycleEvent::segment_cached(PROGRAM, EVENT, start, end, false)
}

fn event_end() -> LifecycleEvent {
    LifecycleEvent::new(
        detail_types::EVENT_STATUS,
        LifecycleState::EventEnd,
        PROGRAM,
        EVENT,
    )
}

#[tokio::test]
async fn test_batch_replay_selects_matching_segments() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.seed(8.0, 9.0, Some(false)).await;
    h.seed(12.0, 13.0, None).await;
    h.plane.insert_replay(request("r1", false));

    let outcomes = assert_ok!(h.engine.handle(&created("r1")).await);
    assert_eq!(
        outcomes[0].action,
        ReplayAction::Processed {
            results: 1,
            added: 1,
            rendered: false
        }
    );

    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(5.0, 6.0)]);
    assert_eq!(replay.replay_results[0].features.len(), 1);
    assert_eq!(replay.total_score, 1.0);
    assert_eq!(replay.status, ReplayStatus::Complete);
    assert!(!replay.debug_info.is_empty());
    assert_eq!(h.bus.with_state(LifecycleState::ReplayProcessed).len(), 1);
}

#[tokio::test]
async fn test_catchup_redelivery_adds_nothing() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));
    let event = segment_cached(5.0, 6.0).with_replay("r1");

    h.engine.handle(&event).await.unwrap();
    let first = h.replay("r1");
    assert_eq!(bounds(&first), vec![(5.0, 6.0)]);
    assert!(first
        .ignore_list
        .contains(&CacheKey::for_segment(PROGRAM, EVENT, 5.0, 6.0, 1).blob_id()));

    let outcomes = assert_ok!(h.engine.handle(&event).await);
    assert_eq!(
        outcomes[0].action,
        ReplayAction::Processed {
            results: 1,
            added: 0,
            rendered: false
        }
    );
    assert_eq!(bounds(&h.replay("r1")), vec![(5.0, 6.0)]);
    assert_eq!(h.bus.with_state(LifecycleState::ReplayProcessed).len(), 1);
}

#[tokio::test]
async fn test_catchup_accumulates_new_segments() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));
    h.engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap();

    h.seed(30.0, 33.0, Some(true)).await;
    h.engine
        .handle(&segment_cached(30.0, 33.0).with_replay("r1"))
        .await
        .unwrap();

    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(5.0, 6.0), (30.0, 33.0)]);
    assert_eq!(replay.ignore_list.len(), 2);
    assert_eq!(replay.status, ReplayStatus::Processing);
}

#[tokio::test]
async fn test_disliked_segment_is_excluded() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.seed(8.0, 9.0, Some(true)).await;
    h.plane.insert_feedback(ClipPreviewFeedback::new(
        PROGRAM,
        EVENT,
        CLASSIFIER,
        8.0,
        FeedbackKind::Dislike,
        BoundaryContext::Original,
    ));
    let mut req = request("r1", false);
    req.ignore_disliked_segments = true;
    h.plane.insert_replay(req);

    h.engine.handle(&created("r1")).await.unwrap();
    assert_eq!(bounds(&h.replay("r1")), vec![(5.0, 6.0)]);
}

#[tokio::test]
async fn test_liked_segment_is_force_included() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.seed(12.0, 13.0, None).await;
    h.plane.insert_feedback(ClipPreviewFeedback::new(
        PROGRAM,
        EVENT,
        CLASSIFIER,
        12.0,
        FeedbackKind::Like,
        BoundaryContext::Original,
    ));
    let mut req = request("r1", false);
    req.include_liked_segments = true;
    h.plane.insert_replay(req);

    h.engine.handle(&created("r1")).await.unwrap();
    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(5.0, 6.0), (12.0, 13.0)]);
    assert!(replay.replay_results[1].force_included);
}

#[tokio::test]
async fn test_results_never_overlap() {
    let h = Harness::new();
    h.seed(10.0, 12.0, Some(true)).await;
    h.seed(10.2, 11.5, Some(true)).await;
    h.seed(11.0, 14.0, Some(true)).await;
    h.seed(20.0, 25.0, Some(true)).await;
    h.plane.insert_replay(request("r1", false));

    h.engine.handle(&created("r1")).await.unwrap();
    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(10.0, 12.0), (20.0, 25.0)]);
    assert!(is_non_overlapping(&replay.replay_results));
}

#[tokio::test]
async fn test_optimized_bounds_are_used() {
    let h = Harness::new();
    h.seed_segment(
        Segment::new(PROGRAM, EVENT, CLASSIFIER, 40.0, 44.0).with_optimized(1, 39.5, 44.8),
        Some(true),
    )
    .await;
    h.plane.insert_replay(request("r1", false));

    h.engine.handle(&created("r1")).await.unwrap();
    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(39.5, 44.8)]);
    assert_eq!(replay.replay_results[0].start, 40.0);
}

#[tokio::test]
async fn test_nested_matching_segment_keeps_optimized_bounds() {
    let h = Harness::new();
    h.seed(10.0, 12.0, Some(false)).await;
    h.seed_segment(
        Segment::new(PROGRAM, EVENT, CLASSIFIER, 10.2, 11.5).with_optimized(1, 10.4, 11.4),
        Some(true),
    )
    .await;
    h.plane.insert_replay(request("r1", false));

    h.engine.handle(&created("r1")).await.unwrap();
    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(10.4, 11.4)]);
    assert_eq!(replay.replay_results[0].start, 10.2);
}

#[tokio::test]
async fn test_nested_segment_disliked_when_optimized_is_excluded() {
    let h = Harness::new();
    h.seed(10.0, 12.0, Some(false)).await;
    h.seed_segment(
        Segment::new(PROGRAM, EVENT, CLASSIFIER, 10.2, 11.5).with_optimized(1, 10.4, 11.4),
        Some(true),
    )
    .await;
    h.plane.insert_feedback(
        ClipPreviewFeedback::new(
            PROGRAM,
            EVENT,
            CLASSIFIER,
            10.2,
            FeedbackKind::Dislike,
            BoundaryContext::Optimized,
        )
        .with_audio_track(1),
    );
    let mut req = request("r1", false);
    req.ignore_disliked_segments = true;
    h.plane.insert_replay(req);

    h.engine.handle(&created("r1")).await.unwrap();
    let replay = h.replay("r1");
    assert!(replay.replay_results.is_empty());
    assert_eq!(replay.status, ReplayStatus::Complete);
}

#[tokio::test]
async fn test_conflicting_writes_are_retried() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));
    h.plane.inject_conflicts(2);

    h.engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap();

    let replay = h.replay("r1");
    assert_eq!(bounds(&replay), vec![(5.0, 6.0)]);
    assert_eq!(replay.version, 3);
}

#[tokio::test]
async fn test_persistent_conflicts_fail_batch_replay() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", false));
    h.plane.inject_conflicts(50);

    let err = h.engine.handle(&created("r1")).await.unwrap_err();
    assert!(matches!(err, WorkerError::ConcurrencyConflict { attempts: 5, .. }));
    assert_eq!(h.replay("r1").status, ReplayStatus::Error);
}

#[tokio::test]
async fn test_failed_catchup_write_leaves_replay_unchanged() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));
    h.plane.inject_write_failures(1);

    let err = h
        .engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let replay = h.replay("r1");
    assert!(replay.replay_results.is_empty());
    assert!(replay.ignore_list.is_empty());
    assert_ne!(replay.status, ReplayStatus::Error);

    // Redelivery converges
    h.engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap();
    assert_eq!(bounds(&h.replay("r1")), vec![(5.0, 6.0)]);
}

#[tokio::test]
async fn test_event_end_completes_catchup_replay() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));
    h.engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap();
    let version = h.replay("r1").version;

    let outcomes = h.engine.handle(&event_end()).await.unwrap();
    assert_eq!(outcomes[0].action, ReplayAction::Completed { rendered: false });

    let replay = h.replay("r1");
    assert_eq!(replay.status, ReplayStatus::Complete);
    assert_eq!(replay.version, version);
    assert_eq!(bounds(&replay), vec![(5.0, 6.0)]);
}

#[tokio::test]
async fn test_raw_segment_waits_for_optimizer() {
    let h = Harness::with_profile(Profile::new("TennisProfile", CLASSIFIER).with_optimizer("Opto"));
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("r1", true));

    let outcomes = h.engine.handle(&segment_cached(5.0, 6.0)).await.unwrap();
    assert!(outcomes.is_empty());
    assert!(h.replay("r1").replay_results.is_empty());

    let optimized = LifecycleEvent::segment_cached(PROGRAM, EVENT, 5.0, 6.0, true);
    h.engine.handle(&optimized).await.unwrap();
    assert_eq!(bounds(&h.replay("r1")), vec![(5.0, 6.0)]);
}

#[tokio::test]
async fn test_fan_out_skips_batch_replays_on_segment_events() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.plane.insert_replay(request("catchup", true));
    h.plane.insert_replay(request("batch", false));

    let mut outcomes = h.engine.handle(&segment_cached(5.0, 6.0)).await.unwrap();
    outcomes.sort_by(|a, b| a.replay_id.cmp(&b.replay_id));

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].replay_id, "batch");
    assert_eq!(outcomes[0].action, ReplayAction::Skipped(SkipReason::NotCatchup));
    assert!(matches!(
        outcomes[1].action,
        ReplayAction::Processed { added: 1, .. }
    ));
    assert!(h.replay("batch").replay_results.is_empty());
}

#[tokio::test]
async fn test_replay_created_requires_replay_id() {
    let h = Harness::new();
    let event = LifecycleEvent::new(
        detail_types::REPLAY_STATUS,
        LifecycleState::ReplayCreated,
        PROGRAM,
        EVENT,
    );
    let err = assert_err!(h.engine.handle(&event).await);
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_rendered_replay_publishes_with_clip() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.seed(25.0, 27.0, Some(true)).await;
    h.plane.insert_chunks(
        PROGRAM,
        EVENT,
        (0..4)
            .map(|i| MediaChunk::new(format!("chunk{}.ts", i), i as f64 * 10.0, 10.0))
            .collect(),
    );
    h.plane
        .insert_transition(TransitionConfig::video("Swipe", "swipe.mp4"));
    let mut req = request("r1", false);
    req.create_hls = true;
    req.resolutions = vec!["720p".to_string()];
    req.transition_name = Some("Swipe".to_string());
    h.plane.insert_replay(req);

    let outcomes = h.engine.handle(&created("r1")).await.unwrap();
    assert!(matches!(
        outcomes[0].action,
        ReplayAction::Processed { rendered: true, .. }
    ));

    let jobs = h.renderer.submitted();
    assert_eq!(jobs.len(), 1);
    let files: Vec<_> = jobs[0].inputs.iter().map(|i| i.file_ref.as_str()).collect();
    assert_eq!(files, vec!["chunk0.ts", "swipe.mp4", "chunk2.ts"]);

    assert_eq!(h.bus.with_state(LifecycleState::ReplayProcessedWithClip).len(), 1);
    assert!(h.bus.with_state(LifecycleState::ReplayProcessed).is_empty());
    assert_eq!(h.replay("r1").status, ReplayStatus::Complete);
}

#[tokio::test]
async fn test_batch_replay_failure_sets_error_status() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    let mut req = request("r1", false);
    req.create_mp4 = true;
    req.resolutions = vec!["720p".to_string()];
    req.transition_name = Some("Sparkles".to_string());
    h.plane.insert_replay(req);

    let err = h.engine.handle(&created("r1")).await.unwrap_err();
    assert!(err.is_configuration());

    let replay = h.replay("r1");
    assert_eq!(replay.status, ReplayStatus::Error);
    let last = replay.debug_info.last().unwrap();
    assert!(last.message.contains("REPLAY_CREATED failed"));
}

#[tokio::test]
async fn test_catchup_failure_keeps_status() {
    let h = Harness::new();
    h.seed(5.0, 6.0, Some(true)).await;
    h.cache.set_listing_fails(true);
    h.plane.insert_replay(request("r1", true));

    let err = h
        .engine
        .handle(&segment_cached(5.0, 6.0).with_replay("r1"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::TransientStore(_)));
    assert_ne!(h.replay("r1").status, ReplayStatus::Error);
}

#[tokio::test]
async fn test_missing_profile_fails_created_batch_replay() {
    let h = Harness::new();
    h.plane
        .insert_event(EventInfo::new(EVENT, PROGRAM, "RetiredProfile"));
    h.plane.insert_replay(request("r1", false));

    assert_err!(h.engine.handle(&created("r1")).await);

    let replay = h.replay("r1");
    assert_eq!(replay.status, ReplayStatus::Error);
    let last = replay.debug_info.last().unwrap();
    assert!(last.message.contains("REPLAY_CREATED failed"));
}

#[tokio::test]
async fn test_missing_profile_at_event_end_spares_catchup_replays() {
    let h = Harness::new();
    h.plane
        .insert_event(EventInfo::new(EVENT, PROGRAM, "RetiredProfile"));
    h.plane.insert_replay(request("batch", false));
    h.plane.insert_replay(request("catchup", true));

    assert_err!(h.engine.handle(&event_end()).await);

    assert_eq!(h.replay("batch").status, ReplayStatus::Error);
    assert_ne!(h.replay("catchup").status, ReplayStatus::Error);
}

/// Segment store that records the start range of every query.
struct RecordingStore {
    inner: Arc<InMemoryPlane>,
    ranges: Mutex<Vec<(Option<f64>, Option<f64>)>>,
    fetched: AtomicUsize,
}

impl RecordingStore {
    fn new(inner: Arc<InMemoryPlane>) -> Self {
        Self {
            inner,
            ranges: Mutex::new(Vec::new()),
            fetched: AtomicUsize::new(0),
        }
    }

    fn ranges(&self) -> Vec<(Option<f64>, Option<f64>)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentStore for RecordingStore {
    async fn query(&self, query: &SegmentQuery) -> PlaneResult<Page<Segment>> {
        self.ranges
            .lock()
            .unwrap()
            .push((query.start_from, query.start_to));
        let page = self.inner.query(query).await?;
        self.fetched.fetch_add(page.items.len(), Ordering::SeqCst);
        Ok(page)
    }

    async fn put(&self, segment: &Segment) -> PlaneResult<()> {
        self.inner.put(segment).await
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
        self.inner
            .add_attribute(program, event, classifier, start, name, value)
            .await
    }
}

#[tokio::test]
async fn test_catchup_reads_only_recent_hours_of_segments() {
    let mut recorder = None;
    let h = Harness::with_segment_store(Profile::new("TennisProfile", CLASSIFIER), |plane| {
        let store = Arc::new(RecordingStore::new(plane));
        recorder = Some(store.clone());
        store
    });
    let store = recorder.unwrap();

    // One segment a minute through hours 0..=4, then a new one in hour 5
    for i in 0..300 {
        let start = i as f64 * 60.0 + 1.0;
        h.seed(start, start + 1.0, Some(false)).await;
    }
    h.seed(18005.0, 18006.0, Some(true)).await;
    h.plane.insert_replay(request("live", true));

    h.engine
        .handle(&segment_cached(18005.0, 18006.0).with_replay("live"))
        .await
        .unwrap();
    assert_eq!(bounds(&h.replay("live")), vec![(18005.0, 18006.0)]);

    let ranges = store.ranges();
    assert!(!ranges.is_empty());
    for (from, to) in &ranges {
        assert_eq!(*from, Some(14400.0));
        let to = to.unwrap();
        assert!(to >= 18005.0 && to < 21600.0);
    }
    // Hour 4 holds 60 segments, hour 5 the new one
    assert_eq!(store.fetched.load(Ordering::SeqCst), 61);

    // Batch replays still read the whole event
    h.plane.insert_replay(request("full", false));
    h.engine.handle(&created("full")).await.unwrap();
    assert_eq!(store.ranges().last(), Some(&(None, None)));
    assert_eq!(bounds(&h.replay("full")), vec![(18005.0, 18006.0)]);
}
