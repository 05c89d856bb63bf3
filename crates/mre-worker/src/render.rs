//! Clip rendering for finished replays.

use std::sync::Arc;

use futures::future::join_all;
use mre_media::{render_jobs, submit_and_wait, Renderer, SegmentClip, TimelineBuilder};
use mre_models::{EventInfo, ReplayRequest, TransitionConfig};
use mre_plane::{ChunkSource, ControlPlane, PlaneError};
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::EngineSettings;
use crate::error::{WorkerError, WorkerResult};

/// Turns replay results into render jobs and waits for them.
pub struct RenderCoordinator {
    plane: Arc<dyn ControlPlane>,
    chunks: Arc<dyn ChunkSource>,
    renderer: Arc<dyn Renderer>,
    settings: EngineSettings,
}

impl RenderCoordinator {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        chunks: Arc<dyn ChunkSource>,
        renderer: Arc<dyn Renderer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            plane,
            chunks,
            renderer,
            settings,
        }
    }

    fn frame_rate(&self, event: &EventInfo) -> u32 {
        event
            .frame_rate
            .filter(|fps| fps.is_finite() && *fps >= 1.0)
            .map(|fps| fps.round() as u32)
            .unwrap_or(self.settings.frame_rate)
    }

    async fn transition(&self, request: &ReplayRequest) -> WorkerResult<Option<TransitionConfig>> {
        let name = match request.transition_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case("none") => name,
            _ => return Ok(None),
        };
        match self.plane.get_transition_config(name).await {
            Ok(config) => Ok(Some(config)),
            Err(PlaneError::NotFound(_)) => Err(WorkerError::configuration(format!(
                "unknown transition '{}'",
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the chunks of every result, keeping result order.
    async fn segment_clips(&self, request: &ReplayRequest) -> WorkerResult<Vec<SegmentClip>> {
        let semaphore = Arc::new(Semaphore::new(self.settings.scan_concurrency.max(1)));
        let lookups = request.replay_results.iter().map(|result| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let (start, end) = (result.effective_start(), result.effective_end());
                let chunks = self
                    .chunks
                    .chunks_between(&request.program, &request.event, start, end)
                    .await?;
                Ok::<_, WorkerError>(SegmentClip::new(start, end, chunks))
            }
        });
        join_all(lookups).await.into_iter().collect()
    }

    /// Render every requested output of a replay.
    ///
    /// Returns the completed job ids; empty when the replay has no results
    /// to render.
    pub async fn render(
        &self,
        event: &EventInfo,
        request: &ReplayRequest,
    ) -> WorkerResult<Vec<String>> {
        if request.replay_results.is_empty() {
            info!(replay_id = %request.replay_id, "Nothing to render");
            return Ok(Vec::new());
        }

        let clips = self.segment_clips(request).await?;

        let frame_rate = self.frame_rate(event);
        let timeline = TimelineBuilder::new(request.audio_track)
            .with_frame_rate(frame_rate)
            .with_transition(self.transition(request).await?)
            .build(&clips)?;

        let jobs = render_jobs(request, &timeline, frame_rate, &self.settings.output_prefix)?;
        info!(
            replay_id = %request.replay_id,
            jobs = jobs.len(),
            inputs = timeline.inputs.len(),
            duration_secs = timeline.duration,
            "Rendering replay"
        );

        let job_ids = submit_and_wait(
            self.renderer.as_ref(),
            &jobs,
            self.settings.render_poll_interval,
            self.settings.render_poll_attempts,
        )
        .await?;
        Ok(job_ids)
    }
}
