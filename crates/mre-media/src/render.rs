//! Render jobs.

use std::time::Duration;

use async_trait::async_trait;
use mre_models::{resolution_dimensions, ReplayRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::timeline::{InputClip, Timeline};

/// Container produced by a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    Hls,
    Mp4,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Hls => "hls",
            OutputFormat::Mp4 => "mp4",
        }
    }

    /// Formats a replay asked for, HLS first.
    pub fn requested(request: &ReplayRequest) -> Vec<OutputFormat> {
        let mut formats = Vec::new();
        if request.create_hls {
            formats.push(OutputFormat::Hls);
        }
        if request.create_mp4 {
            formats.push(OutputFormat::Mp4);
        }
        formats
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a renderer needs for one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenderJobSpec {
    pub program: String,
    pub event: String,
    pub replay_id: String,
    pub format: OutputFormat,
    /// Resolution name as requested
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub inputs: Vec<InputClip>,
    /// Output location prefix
    pub destination: String,
}

/// Status reported by a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Complete,
    InProgress,
    Error,
}

/// External rendering service.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Submit a job; returns its id.
    async fn submit(&self, job: &RenderJobSpec) -> MediaResult<String>;

    async fn job_status(&self, job_id: &str) -> MediaResult<JobStatus>;
}

fn path_component(value: &str) -> String {
    value
        .split_whitespace()
        .next()
        .unwrap_or(value)
        .replace(':', "x")
}

/// One job per requested `(format, resolution)`.
pub fn render_jobs(
    request: &ReplayRequest,
    timeline: &Timeline,
    frame_rate: u32,
    output_prefix: &str,
) -> MediaResult<Vec<RenderJobSpec>> {
    if timeline.is_empty() {
        return Err(MediaError::invalid_timeline(format!(
            "replay {} has nothing to render",
            request.replay_id
        )));
    }

    let mut jobs = Vec::new();
    for format in OutputFormat::requested(request) {
        for resolution in &request.resolutions {
            let dims = resolution_dimensions(resolution)
                .ok_or_else(|| MediaError::UnknownResolution(resolution.clone()))?;
            let destination = format!(
                "{}/{}/{}/{}/{}/{}/",
                output_prefix.trim_end_matches('/'),
                request.program,
                request.event,
                request.replay_id,
                format,
                path_component(resolution)
            );
            jobs.push(RenderJobSpec {
                program: request.program.clone(),
                event: request.event.clone(),
                replay_id: request.replay_id.clone(),
                format,
                resolution: resolution.clone(),
                width: dims.width,
                height: dims.height,
                frame_rate,
                inputs: timeline.inputs.clone(),
                destination,
            });
        }
    }
    Ok(jobs)
}

/// Submit every job and wait for all of them to complete.
///
/// Pending jobs are polled every `interval`, for at most `attempts` rounds.
/// The first job reporting `Error` fails the whole batch.
pub async fn submit_and_wait<R: Renderer + ?Sized>(
    renderer: &R,
    jobs: &[RenderJobSpec],
    interval: Duration,
    attempts: u32,
) -> MediaResult<Vec<String>> {
    let mut job_ids = Vec::with_capacity(jobs.len());
    for job in jobs {
        let job_id = renderer.submit(job).await?;
        info!(
            replay_id = %job.replay_id,
            format = %job.format,
            resolution = %job.resolution,
            job_id = %job_id,
            "Submitted render job"
        );
        metrics::counter!("replay_render_jobs_total", "format" => job.format.as_str()).increment(1);
        job_ids.push(job_id);
    }

    let mut pending: Vec<String> = job_ids.clone();
    for attempt in 1..=attempts {
        let mut still_running = Vec::new();
        for job_id in pending {
            match renderer.job_status(&job_id).await? {
                JobStatus::Complete => debug!(job_id = %job_id, "Render job complete"),
                JobStatus::InProgress => still_running.push(job_id),
                JobStatus::Error => {
                    warn!(job_id = %job_id, "Render job failed");
                    return Err(MediaError::render_failed(job_id, "renderer reported ERROR"));
                }
            }
        }
        pending = still_running;
        if pending.is_empty() {
            return Ok(job_ids);
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    let job_id = pending.into_iter().next().unwrap_or_default();
    Err(MediaError::RenderTimeout { job_id, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRenderer;
    use crate::timeline::{SegmentClip, TimelineBuilder};
    use mre_models::MediaChunk;

    fn request() -> ReplayRequest {
        let mut request = ReplayRequest::new("Tennis", "Final", "r1");
        request.create_hls = true;
        request.create_mp4 = true;
        request.resolutions = vec!["720p".to_string(), "9:16 (608 x 1080)".to_string()];
        request
    }

    fn timeline() -> Timeline {
        TimelineBuilder::new(1)
            .build(&[SegmentClip::new(
                1.0,
                3.0,
                vec![MediaChunk::new("c0.ts", 0.0, 10.0)],
            )])
            .unwrap()
    }

    #[test]
    fn test_one_job_per_format_and_resolution() {
        let jobs = render_jobs(&request(), &timeline(), 25, "s3://out/").unwrap();
        let keys: Vec<_> = jobs
            .iter()
            .map(|j| (j.format, j.width, j.height))
            .collect();
        assert_eq!(
            keys,
            vec![
                (OutputFormat::Hls, 1280, 720),
                (OutputFormat::Hls, 608, 1080),
                (OutputFormat::Mp4, 1280, 720),
                (OutputFormat::Mp4, 608, 1080),
            ]
        );
        assert_eq!(jobs[1].destination, "s3://out/Tennis/Final/r1/hls/9x16/");
    }

    #[test]
    fn test_unknown_resolution_and_empty_timeline() {
        let mut bad = request();
        bad.resolutions = vec!["8K".to_string()];
        assert!(matches!(
            render_jobs(&bad, &timeline(), 25, "s3://out"),
            Err(MediaError::UnknownResolution(_))
        ));
        assert!(matches!(
            render_jobs(&request(), &Timeline::default(), 25, "s3://out"),
            Err(MediaError::InvalidTimeline(_))
        ));
    }

    #[tokio::test]
    async fn test_waits_for_all_jobs() {
        let renderer = MemoryRenderer::new().with_polls_before_complete(2);
        let jobs = render_jobs(&request(), &timeline(), 25, "s3://out").unwrap();
        let ids = submit_and_wait(&renderer, &jobs, Duration::from_millis(1), 5)
            .await
            .unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(renderer.submitted().len(), 4);
    }

    #[tokio::test]
    async fn test_error_status_fails_batch() {
        let renderer = MemoryRenderer::new().failing();
        let jobs = render_jobs(&request(), &timeline(), 25, "s3://out").unwrap();
        let err = submit_and_wait(&renderer, &jobs, Duration::from_millis(1), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::RenderFailed { .. }));
    }

    #[tokio::test]
    async fn test_poll_exhaustion_times_out() {
        let renderer = MemoryRenderer::new().with_polls_before_complete(10);
        let jobs = render_jobs(&request(), &timeline(), 25, "s3://out").unwrap();
        let err = submit_and_wait(&renderer, &jobs, Duration::from_millis(1), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::RenderTimeout { attempts: 3, .. }));
    }
}
