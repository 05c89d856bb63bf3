//! Structured replay logging.
//!
//! Every message of one replay computation carries the replay id, the
//! triggering lifecycle state and whether the replay is a catch-up replay,
//! so a single replay can be followed across invocations.

use mre_models::{LifecycleState, ReplayRequest};
use tracing::{error, info, warn, Span};

/// Logger for one replay within one invocation.
#[derive(Debug, Clone)]
pub struct ReplayLogger {
    program: String,
    event: String,
    replay_id: String,
    state: LifecycleState,
    mode: &'static str,
}

impl ReplayLogger {
    pub fn for_replay(replay: &ReplayRequest, state: LifecycleState) -> Self {
        Self {
            program: replay.program.clone(),
            event: replay.event.clone(),
            replay_id: replay.replay_id.clone(),
            state,
            mode: if replay.catchup { "catchup" } else { "batch" },
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(replay_id = %self.replay_id, state = %self.state, mode = self.mode, "{}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(replay_id = %self.replay_id, state = %self.state, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(replay_id = %self.replay_id, state = %self.state, mode = self.mode, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(
            replay_id = %self.replay_id,
            state = %self.state,
            mode = self.mode,
            "Replay failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(replay_id = %self.replay_id, state = %self.state, mode = self.mode, "Done: {}", message);
    }

    pub fn replay_id(&self) -> &str {
        &self.replay_id
    }

    /// Name of the triggering state, used as the operation in debug entries.
    pub fn operation(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "replay",
            program = %self.program,
            event = %self.event,
            replay_id = %self.replay_id,
            state = %self.state
        )
    }
}
