//! reelcap: screen recording core.
//!
//! Owns the recording session lifecycle (state machine + coordinator actor),
//! the capture units that drain hardware encoders and audio devices to disk,
//! and the post-stop pipeline that muxes, trims, thumbnails and ships the
//! final recording. Platform hardware is reached only through the traits in
//! [`backend`], so the whole core runs against fakes in tests.

pub mod backend;
pub mod capture;
pub mod clock;
pub mod config;
pub mod errors;
pub mod highlights;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod session;

pub use backend::{CaptureGrant, RecorderBackend};
pub use config::{AudioSourceSelection, RecordingConfig, Resolution};
pub use errors::RecorderError;
pub use pipeline::cleanup::sweep_recordings;
pub use pipeline::ffmpeg::{FfmpegTranscoder, Transcoder};
pub use pipeline::{PipelineReport, PostProcessor, Stage, StageStatus};
pub use session::{Recorder, RecorderHandle, RecordingStatus, SessionEvent, SessionInfo};
