//! Replay clip assembly for the Media Replay Engine.
//!
//! This crate provides:
//! - Timeline assembly from selected segments and raw media chunks
//! - Transition handling (inserted video clips, image overlays)
//! - Render job specs per output format and resolution
//! - A `Renderer` trait with an HTTP client and an in-memory fake

pub mod error;
pub mod http;
pub mod memory;
pub mod render;
pub mod timeline;

pub use error::{MediaError, MediaResult};
pub use http::{HttpRenderer, RenderConfig};
pub use memory::MemoryRenderer;
pub use render::{render_jobs, submit_and_wait, JobStatus, OutputFormat, RenderJobSpec, Renderer};
pub use timeline::{ImageOverlay, InputClip, SegmentClip, Timeline, TimelineBuilder};
