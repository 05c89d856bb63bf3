//! Scriptable in-memory renderer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MediaError, MediaResult};
use crate::render::{JobStatus, RenderJobSpec, Renderer};

#[derive(Debug, Default)]
struct State {
    submitted: Vec<RenderJobSpec>,
    polls: HashMap<String, u32>,
}

/// Renderer that accepts every job and reports a scripted outcome.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    state: Mutex<State>,
    polls_before_complete: u32,
    fail: bool,
    reject_submissions: bool,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `InProgress` this many times per job before `Complete`.
    pub fn with_polls_before_complete(mut self, polls: u32) -> Self {
        self.polls_before_complete = polls;
        self
    }

    /// Report `Error` for every job.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Refuse submissions outright.
    pub fn rejecting(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    pub fn submitted(&self) -> Vec<RenderJobSpec> {
        self.state
            .lock()
            .map(|s| s.submitted.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Renderer for MemoryRenderer {
    async fn submit(&self, job: &RenderJobSpec) -> MediaResult<String> {
        if self.reject_submissions {
            return Err(MediaError::submit_failed("renderer unavailable"));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| MediaError::submit_failed("renderer state poisoned"))?;
        state.submitted.push(job.clone());
        let job_id = format!("job-{}", state.submitted.len());
        state.polls.insert(job_id.clone(), 0);
        Ok(job_id)
    }

    async fn job_status(&self, job_id: &str) -> MediaResult<JobStatus> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| MediaError::render_failed(job_id, "renderer state poisoned"))?;
        let polls = state
            .polls
            .get_mut(job_id)
            .ok_or_else(|| MediaError::render_failed(job_id, "unknown job"))?;
        *polls += 1;

        if self.fail {
            Ok(JobStatus::Error)
        } else if *polls > self.polls_before_complete {
            Ok(JobStatus::Complete)
        } else {
            Ok(JobStatus::InProgress)
        }
    }
}
