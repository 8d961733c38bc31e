use thiserror::Error;

/// Errors raised before any hardware resource is committed to a session.
///
/// These are reported synchronously to the caller of `start()`; the session
/// stays `Idle` and nothing is left to tear down.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    #[error("screen-capture grant is missing or invalid")]
    InvalidGrant,
    #[error("microphone permission denied")]
    MicPermissionDenied,
    #[error("insufficient storage: {available} bytes free, {required} required")]
    InsufficientStorage { available: u64, required: u64 },
    #[error("video encoder configuration failed: {0}")]
    EncoderConfig(String),
    #[error("virtual display creation failed: {0}")]
    DisplayCreation(String),
    #[error("audio source initialization failed: {0}")]
    AudioInit(String),
}

/// Errors from the capture and drain loops while a session is live.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("audio read failed: {0}")]
    ReadFailed(String),
    #[error("encoder drain failed: {0}")]
    DrainFailed(String),
    #[error("container write failed: {0}")]
    WriteFailed(String),
}

/// Errors from the external transcoding tool (encode, mux, trim, probe).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscodeError {
    #[error("ffmpeg not found on PATH")]
    ToolNotFound,
    #[error("transcode process failed with exit code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },
    #[error("failed to run transcode tool: {0}")]
    Io(String),
    #[error("could not parse probe output: {0}")]
    BadProbeOutput(String),
}

/// Errors from cloud backup providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackupError {
    #[error("transient upload failure: {0}")]
    Transient(String),
    #[error("permanent upload failure: {0}")]
    Permanent(String),
}

/// Top-level error type for recorder operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("recording already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("recorder is shut down")]
    Shutdown,
}
