//! Replay engine.
//!
//! Each lifecycle event is one invocation. The engine decides per replay
//! whether the event concerns it, then syncs cached features, matches them,
//! merges the matches into the stored results and notifies downstream
//! stages. Catch-up replays accumulate results segment by segment; the rest
//! are computed as one batch when the event ends or the replay is created.

use std::sync::Arc;

use mre_events::LifecycleEventBus;
use mre_media::Renderer;
use mre_models::{
    partitions_start_range, EventInfo, LifecycleEvent, LifecycleState, Profile, ReplayRequest,
    ReplayStatus, ReplayUpdate, ScanOrder, Segment,
};
use mre_plane::{fetch_segments, ChunkSource, ControlPlane, SegmentQuery, SegmentStore};
use mre_storage::{FeatureCache, LocalCacheDir};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::cache_sync::CacheSyncManager;
use crate::config::EngineSettings;
use crate::error::{WorkerError, WorkerResult};
use crate::feature_processor::{MatchOutcome, ReplayFeatureProcessor};
use crate::logging::ReplayLogger;
use crate::metrics;
use crate::render::RenderCoordinator;
use crate::selection::{merge_results, summarize};

/// Collaborators of the engine, constructed once per process.
#[derive(Clone)]
pub struct EngineContext {
    pub plane: Arc<dyn ControlPlane>,
    pub segments: Arc<dyn SegmentStore>,
    pub chunks: Arc<dyn ChunkSource>,
    pub cache: Arc<dyn FeatureCache>,
    pub bus: Arc<dyn LifecycleEventBus>,
    pub renderer: Arc<dyn Renderer>,
    pub settings: EngineSettings,
}

/// Why a replay was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Segment notifications only feed catch-up replays
    NotCatchup,
    /// Optimized notification for another audio track
    OtherAudioTrack,
}

/// What an invocation did to one replay.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayAction {
    Skipped(SkipReason),
    /// Catch-up replay closed at event end
    Completed { rendered: bool },
    Processed {
        results: usize,
        added: usize,
        rendered: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub replay_id: String,
    pub action: ReplayAction,
}

/// Event-wide data shared by every replay of one invocation.
struct Invocation<'a> {
    trigger: &'a LifecycleEvent,
    event: EventInfo,
    profile: Profile,
}

/// Top-level state machine of one lifecycle event.
pub struct ReplayEngine {
    ctx: EngineContext,
    sync: CacheSyncManager,
    renders: RenderCoordinator,
}

impl ReplayEngine {
    pub fn new(ctx: EngineContext) -> Self {
        let sync = CacheSyncManager::new(Arc::clone(&ctx.cache), &ctx.settings);
        let renders = RenderCoordinator::new(
            Arc::clone(&ctx.plane),
            Arc::clone(&ctx.chunks),
            Arc::clone(&ctx.renderer),
            ctx.settings.clone(),
        );
        Self { ctx, sync, renders }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    /// Handle one lifecycle event.
    ///
    /// Events without a replay id fan out to every replay of the event. All
    /// replays are attempted; the first failure is returned afterwards.
    pub async fn handle(&self, trigger: &LifecycleEvent) -> WorkerResult<Vec<ReplayOutcome>> {
        if !trigger.state.is_trigger() {
            debug!(state = %trigger.state, "Ignoring lifecycle event");
            return Ok(Vec::new());
        }

        let plane = &self.ctx.plane;
        let replays = match trigger.replay_id {
            Some(ref id) => vec![
                plane
                    .get_replay_request(&trigger.program, &trigger.event, id)
                    .await?,
            ],
            None if trigger.state == LifecycleState::ReplayCreated => {
                return Err(WorkerError::configuration(
                    "REPLAY_CREATED event without a replay id",
                ))
            }
            None => {
                plane
                    .list_replay_requests(&trigger.program, &trigger.event)
                    .await?
            }
        };

        let (event, profile) = match self.load_event(trigger).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    program = %trigger.program,
                    event = %trigger.event,
                    error = %e,
                    "Failed to load event configuration"
                );
                metrics::record_invocation(trigger.state.as_str(), "error");
                if !trigger.state.is_segment_cached() {
                    for replay in &replays {
                        self.mark_failed(replay, trigger.state, &e).await;
                    }
                }
                return Err(e);
            }
        };

        if trigger.state == LifecycleState::SegmentCached && profile.has_optimizer() {
            info!(
                program = %trigger.program,
                event = %trigger.event,
                profile = %profile.name,
                "Waiting for the optimized segment"
            );
            metrics::record_invocation(trigger.state.as_str(), "skipped");
            return Ok(Vec::new());
        }

        let invocation = Invocation {
            trigger,
            event,
            profile,
        };

        let mut outcomes = Vec::with_capacity(replays.len());
        let mut first_error = None;
        for replay in replays {
            let replay_id = replay.replay_id.clone();
            let logger = ReplayLogger::for_replay(&replay, trigger.state);
            let span = logger.create_span();

            match self
                .process_replay(&invocation, replay, &logger)
                .instrument(span)
                .await
            {
                Ok(action) => {
                    let outcome = match action {
                        ReplayAction::Skipped(_) => "skipped",
                        _ => "ok",
                    };
                    metrics::record_invocation(trigger.state.as_str(), outcome);
                    outcomes.push(ReplayOutcome { replay_id, action });
                }
                Err(e) => {
                    metrics::record_invocation(trigger.state.as_str(), "error");
                    logger.log_error(&e.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    async fn process_replay(
        &self,
        inv: &Invocation<'_>,
        request: ReplayRequest,
        logger: &ReplayLogger,
    ) -> WorkerResult<ReplayAction> {
        let state = inv.trigger.state;

        if state.is_segment_cached() {
            if !request.catchup {
                debug!(replay_id = %request.replay_id, "Batch replay ignores segment notifications");
                return Ok(ReplayAction::Skipped(SkipReason::NotCatchup));
            }
            if let Some(track) = inv.trigger.audio_track {
                if state == LifecycleState::OptimizedSegmentCached && track != request.audio_track {
                    return Ok(ReplayAction::Skipped(SkipReason::OtherAudioTrack));
                }
            }
        }

        let catchup = request.catchup;
        let result = if state == LifecycleState::EventEnd && catchup {
            self.complete_catchup(inv, request.clone(), logger).await
        } else {
            self.compute(inv, request.clone(), logger).await
        };

        if let Err(ref e) = result {
            self.mark_failed(&request, state, e).await;
        }
        result
    }

    async fn load_event(&self, trigger: &LifecycleEvent) -> WorkerResult<(EventInfo, Profile)> {
        let event = self
            .ctx
            .plane
            .get_event(&trigger.program, &trigger.event)
            .await?;
        let profile = self.ctx.plane.get_profile(&event.profile).await?;
        Ok((event, profile))
    }

    /// Put a failed batch replay into `Error`. Catch-up replays keep their
    /// status so a redelivery can converge.
    async fn mark_failed(&self, request: &ReplayRequest, state: LifecycleState, error: &WorkerError) {
        if request.catchup {
            return;
        }
        let message = format!("{} failed: {}", state, error);
        if let Err(status_err) = self
            .ctx
            .plane
            .update_replay_status(
                &request.program,
                &request.event,
                &request.replay_id,
                ReplayStatus::Error,
                Some(message),
            )
            .await
        {
            warn!(
                replay_id = %request.replay_id,
                error = %status_err,
                "Failed to record replay error status"
            );
        }
    }

    /// Close a catch-up replay: its results were accumulated already.
    async fn complete_catchup(
        &self,
        inv: &Invocation<'_>,
        request: ReplayRequest,
        logger: &ReplayLogger,
    ) -> WorkerResult<ReplayAction> {
        logger.log_start("closing catch-up replay");
        let rendered = self.render_if_requested(inv, &request, logger).await?;

        self.ctx
            .plane
            .update_replay_status(
                &request.program,
                &request.event,
                &request.replay_id,
                ReplayStatus::Complete,
                Some(format!(
                    "Event ended with {} results",
                    request.replay_results.len()
                )),
            )
            .await?;
        self.publish(&request, rendered).await?;

        logger.log_completion("catch-up replay complete");
        Ok(ReplayAction::Completed { rendered })
    }

    /// Compute or extend the results of a replay.
    async fn compute(
        &self,
        inv: &Invocation<'_>,
        request: ReplayRequest,
        logger: &ReplayLogger,
    ) -> WorkerResult<ReplayAction> {
        request.validate()?;
        let catchup = request.catchup;
        let (program, event, replay_id) = (
            request.program.clone(),
            request.event.clone(),
            request.replay_id.clone(),
        );
        logger.log_start(if catchup {
            "extending catch-up replay"
        } else {
            "computing batch replay"
        });

        if request.status != ReplayStatus::Processing {
            self.ctx
                .plane
                .update_replay_status(&program, &event, &replay_id, ReplayStatus::Processing, None)
                .await?;
        }

        let matches = self.find_matches(inv, &request, logger).await?;
        metrics::record_segments_selected(matches.results.len());
        logger.log_progress(&format!(
            "{} segments matched in {} blobs",
            matches.results.len(),
            matches.processed_blob_ids.len()
        ));

        let (stored, added) = self.store_results(&request, &matches, logger).await?;

        if catchup {
            if !matches.processed_blob_ids.is_empty() {
                self.ctx
                    .plane
                    .update_segments_ignore_list(
                        &program,
                        &event,
                        &replay_id,
                        &matches.processed_blob_ids,
                    )
                    .await?;
            }
            if added > 0 {
                self.publish(&stored, false).await?;
            }
            logger.log_completion(&format!("{} new results", added));
            return Ok(ReplayAction::Processed {
                results: stored.replay_results.len(),
                added,
                rendered: false,
            });
        }

        let rendered = self.render_if_requested(inv, &stored, logger).await?;
        self.ctx
            .plane
            .update_replay_status(&program, &event, &replay_id, ReplayStatus::Complete, None)
            .await?;
        self.publish(&stored, rendered).await?;

        logger.log_completion(&format!("{} results", stored.replay_results.len()));
        Ok(ReplayAction::Processed {
            results: stored.replay_results.len(),
            added,
            rendered,
        })
    }

    /// Segments of the profile's classifier whose blobs are in scope.
    ///
    /// Catch-up queries are bounded to the hours of the synced partitions;
    /// batch queries read the whole event. Nested segments stay: their blobs
    /// are placed on them, and `merge_results` drops nested results afterwards.
    async fn segments_in_scope(
        &self,
        inv: &Invocation<'_>,
        request: &ReplayRequest,
        partitions: &[u32],
    ) -> WorkerResult<Vec<Segment>> {
        let mut query = SegmentQuery::new(
            inv.trigger.program.as_str(),
            inv.trigger.event.as_str(),
            inv.profile.classifier.name.as_str(),
        )
        .with_order(ScanOrder::Ascending);
        if request.catchup {
            if let Some((from, to)) = partitions_start_range(partitions) {
                query = query.with_start_range(Some(from), Some(to));
            }
        }

        let segments = fetch_segments(self.ctx.segments.as_ref(), query).await?;
        Ok(segments
            .into_iter()
            .filter(|s| partitions.contains(&s.hour_elapsed()))
            .collect())
    }

    async fn find_matches(
        &self,
        inv: &Invocation<'_>,
        request: &ReplayRequest,
        logger: &ReplayLogger,
    ) -> WorkerResult<MatchOutcome> {
        let (program, event) = (&request.program, &request.event);
        let partitions = self
            .sync
            .partitions_in_scope(program, event, request.catchup)
            .await?;
        if partitions.is_empty() {
            logger.log_warning("no cached features for this event yet");
            return Ok(MatchOutcome::default());
        }

        let segments = self.segments_in_scope(inv, request, &partitions).await?;
        let feedback = self
            .ctx
            .plane
            .get_feedback(program, event, &inv.profile.classifier.name)
            .await?;

        let dir = self
            .ctx
            .settings
            .cache_dir
            .join(format!("{}-{}", request.replay_id, Uuid::new_v4()));
        let local = LocalCacheDir::create(&dir, program.as_str(), event.as_str()).await?;

        let scanned: WorkerResult<MatchOutcome> = async {
            self.sync
                .sync(&local, program, event, request.catchup, &partitions)
                .await?;
            ReplayFeatureProcessor::new(
                Arc::new(request.clone()),
                segments,
                feedback,
                self.ctx.settings.scan_concurrency,
            )
            .find_matching_segments(&local)
            .await
        }
        .await;

        if let Err(e) = local.remove().await {
            warn!(path = %dir.display(), error = %e, "Failed to remove local cache directory");
        }
        scanned
    }

    /// Merge matches into the stored results with a conditional write.
    ///
    /// Returns the replay as written and the number of results added.
    async fn store_results(
        &self,
        request: &ReplayRequest,
        matches: &MatchOutcome,
        logger: &ReplayLogger,
    ) -> WorkerResult<(ReplayRequest, usize)> {
        let attempts = self.ctx.settings.conflict_retry_attempts.max(1);
        let mut current = request.clone();

        for attempt in 1..=attempts {
            if attempt > 1 {
                current = self
                    .ctx
                    .plane
                    .get_replay_request(&request.program, &request.event, &request.replay_id)
                    .await?;
            }

            let (results, added) = if current.catchup {
                let merged = merge_results(&current.replay_results, matches.results.clone());
                (merged.results, merged.added)
            } else {
                let merged = merge_results(&[], matches.results.clone());
                let added = merged.added;
                match current.durationbased_summarization {
                    Some(ref summary) => (summarize(merged.results, summary), added),
                    None => (merged.results, added),
                }
            };

            let update = ReplayUpdate::new(results);
            let summary = format!(
                "{}: {} matched, {} added, total score {:.2}",
                logger.operation(),
                matches.results.len(),
                added,
                update.total_score
            );
            let update = update.with_debug(summary);

            match self
                .ctx
                .plane
                .update_replay_results(
                    &current.program,
                    &current.event,
                    &current.replay_id,
                    current.version,
                    &update,
                )
                .await
            {
                Ok(version) => {
                    current.version = version;
                    current.total_score = update.total_score;
                    current.replay_results = update.replay_results;
                    return Ok((current, added));
                }
                Err(e) if e.is_conflict() => {
                    logger.log_warning(&format!(
                        "results changed concurrently (attempt {}/{}): {}",
                        attempt, attempts, e
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WorkerError::ConcurrencyConflict {
            replay_id: request.replay_id.clone(),
            attempts,
        })
    }

    async fn render_if_requested(
        &self,
        inv: &Invocation<'_>,
        request: &ReplayRequest,
        logger: &ReplayLogger,
    ) -> WorkerResult<bool> {
        if !request.wants_rendering() {
            return Ok(false);
        }
        let job_ids = self.renders.render(&inv.event, request).await?;
        if job_ids.is_empty() {
            logger.log_warning("rendering requested but the replay has no results");
            return Ok(false);
        }
        logger.log_progress(&format!("{} render jobs complete", job_ids.len()));
        Ok(true)
    }

    async fn publish(&self, request: &ReplayRequest, rendered: bool) -> WorkerResult<()> {
        let state = if rendered {
            LifecycleState::ReplayProcessedWithClip
        } else {
            LifecycleState::ReplayProcessed
        };
        let notification = LifecycleEvent::replay(
            state,
            request.program.as_str(),
            request.event.as_str(),
            request.replay_id.as_str(),
        )
        .with_audio_track(request.audio_track);
        let message_id = self.ctx.bus.publish(&notification).await?;
        debug!(replay_id = %request.replay_id, state = %state, message_id = %message_id, "Published");
        Ok(())
    }
}
