//! Session coordinator: the single owner of recording state.
//!
//! Runs as a tokio actor. Control commands arrive over an mpsc channel with
//! oneshot response channels; internal timer events (auto-stop) arrive over a
//! second channel. The actor drives the pure state machine in [`super::state`]
//! and executes the returned side effects against the capture units. Capture
//! threads never touch state directly, which is what serializes every
//! lifecycle decision through one place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::backend::{AudioSourceSpec, CaptureGrant, RecorderBackend, VideoEncoderConfig};
use crate::capture::{AudioCaptureUnit, VideoCaptureEncodeUnit};
use crate::clock::SessionClock;
use crate::config::RecordingConfig;
use crate::errors::{RecorderError, SetupError};
use crate::highlights::{HighlightWorker, PeakSample};
use crate::paths;
use crate::pipeline::backup::BackupProvider;
use crate::pipeline::ffmpeg::Transcoder;
use crate::pipeline::{PipelineInput, PipelineReport, PostProcessor};
use crate::session::state::{transition, RecordingEvent, RecordingState, SideEffect, StopKind};

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_QUEUE_DEPTH: usize = 64;
const PEAK_QUEUE_DEPTH: usize = 256;

const MIC_SAMPLE_RATE: u32 = 44_100;
const INTERNAL_SAMPLE_RATE: u32 = 44_100;

/// Control surface of the actor. Each request carries its response channel.
#[derive(Debug)]
pub enum ControlCommand {
    Start {
        config: Box<RecordingConfig>,
        grant: CaptureGrant,
        respond: oneshot::Sender<Result<SessionInfo, RecorderError>>,
    },
    Stop {
        respond: oneshot::Sender<Result<(), RecorderError>>,
    },
    /// Toggles pause; responds with the new paused flag.
    TogglePause {
        respond: oneshot::Sender<Result<bool, RecorderError>>,
    },
    /// Toggles microphone mute; responds with the new muted flag.
    ToggleMicMute {
        respond: oneshot::Sender<Result<bool, RecorderError>>,
    },
    Status {
        respond: oneshot::Sender<RecordingStatus>,
    },
    Shutdown,
}

/// Broadcast notifications for observers (UI, notification surface).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum SessionEvent {
    Started {
        session_id: String,
        output: PathBuf,
    },
    SetupFailed {
        error: String,
    },
    Paused {
        session_id: String,
    },
    Resumed {
        session_id: String,
    },
    MicMuted {
        session_id: String,
        muted: bool,
    },
    ManuallyStopped {
        session_id: String,
    },
    AutoStopped {
        session_id: String,
    },
    /// The post-stop mux failed; the video-only file is kept as final.
    MuxFailed {
        session_id: String,
        error: String,
    },
    PipelineFinished {
        session_id: String,
        report: PipelineReport,
    },
}

/// Returned from a successful start.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub output: PathBuf,
}

/// Point-in-time snapshot of the session for status queries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub active: bool,
    pub recording: bool,
    pub paused: bool,
    pub mic_muted: bool,
    /// Recorded time so far in milliseconds, paused spans excluded.
    pub elapsed_ms: u64,
    pub session_id: Option<String>,
    pub output: Option<PathBuf>,
}

enum InternalEvent {
    AutoStopElapsed { session_id: String },
}

/// Cloneable facade over the actor's command channel.
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<ControlCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl RecorderHandle {
    pub async fn start(
        &self,
        config: RecordingConfig,
        grant: CaptureGrant,
    ) -> Result<SessionInfo, RecorderError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Start {
                config: Box::new(config),
                grant,
                respond,
            })
            .await
            .map_err(|_| RecorderError::Shutdown)?;
        rx.await.map_err(|_| RecorderError::Shutdown)?
    }

    pub async fn stop(&self) -> Result<(), RecorderError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Stop { respond })
            .await
            .map_err(|_| RecorderError::Shutdown)?;
        rx.await.map_err(|_| RecorderError::Shutdown)?
    }

    /// Returns the new paused flag.
    pub async fn toggle_pause(&self) -> Result<bool, RecorderError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::TogglePause { respond })
            .await
            .map_err(|_| RecorderError::Shutdown)?;
        rx.await.map_err(|_| RecorderError::Shutdown)?
    }

    /// Returns the new muted flag.
    pub async fn toggle_mic_mute(&self) -> Result<bool, RecorderError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::ToggleMicMute { respond })
            .await
            .map_err(|_| RecorderError::Shutdown)?;
        rx.await.map_err(|_| RecorderError::Shutdown)?
    }

    pub async fn status(&self) -> Result<RecordingStatus, RecorderError> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::Status { respond })
            .await
            .map_err(|_| RecorderError::Shutdown)?;
        rx.await.map_err(|_| RecorderError::Shutdown)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(ControlCommand::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

pub struct Recorder;

impl Recorder {
    /// Spawns the coordinator actor onto the current tokio runtime and
    /// returns its handle. The actor exits when `shutdown()` is called or
    /// every handle is dropped; an active session is stopped first.
    pub fn spawn(
        backend: Arc<dyn RecorderBackend>,
        transcoder: Arc<dyn Transcoder>,
        backup: Option<Arc<dyn BackupProvider>>,
    ) -> RecorderHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        let (internal_tx, internal_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let coordinator = Coordinator {
            backend,
            post: PostProcessor::new(transcoder, backup, events.clone()),
            events: events.clone(),
            internal_tx,
            state: RecordingState::Idle,
            active: None,
        };
        tokio::spawn(coordinator.run(command_rx, internal_rx));

        RecorderHandle { commands, events }
    }
}

/// Everything owned by one live session.
struct ActiveSession {
    session_id: String,
    config: RecordingConfig,
    output: PathBuf,
    clock: Arc<SessionClock>,
    video: VideoCaptureEncodeUnit,
    mic: Option<AudioCaptureUnit>,
    internal: Option<AudioCaptureUnit>,
    peak_tx: Option<crossbeam_channel::Sender<PeakSample>>,
    highlight_worker: Option<HighlightWorker>,
    auto_stop: Option<tokio::task::JoinHandle<()>>,
}

impl ActiveSession {
    fn set_units_paused(&self, paused: bool) {
        self.video.set_paused(paused);
        if let Some(mic) = &self.mic {
            mic.set_paused(paused);
        }
        if let Some(internal) = &self.internal {
            internal.set_paused(paused);
        }
    }

    fn abort_auto_stop(&mut self) {
        if let Some(task) = self.auto_stop.take() {
            task.abort();
        }
    }
}

struct Coordinator {
    backend: Arc<dyn RecorderBackend>,
    post: PostProcessor,
    events: broadcast::Sender<SessionEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,
    state: RecordingState,
    active: Option<ActiveSession>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        mut internal: mpsc::Receiver<InternalEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => {
                        self.stop_session_if_active();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }
        tracing::info!(target: "session", "coordinator stopped");
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start {
                config,
                grant,
                respond,
            } => {
                let _ = respond.send(self.handle_start(*config, grant));
            }
            ControlCommand::Stop { respond } => {
                let _ = respond.send(self.handle_stop(StopKind::Manual));
            }
            ControlCommand::TogglePause { respond } => {
                let _ = respond.send(self.handle_toggle_pause());
            }
            ControlCommand::ToggleMicMute { respond } => {
                let _ = respond.send(self.handle_toggle_mic_mute());
            }
            ControlCommand::Status { respond } => {
                let _ = respond.send(self.snapshot());
            }
            ControlCommand::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::AutoStopElapsed { session_id } => {
                // A stale timer from a previous session is a no-op.
                let current = self.active.as_ref().map(|s| s.session_id.clone());
                if current.as_deref() != Some(session_id.as_str()) {
                    tracing::debug!(target: "session", "stale auto-stop timer ignored");
                    return;
                }
                tracing::info!(target: "session", "auto-stop countdown elapsed");
                if let Err(e) = self.handle_stop(StopKind::AutoStop) {
                    tracing::warn!(target: "session", "auto-stop failed: {}", e);
                }
            }
        }
    }

    fn handle_start(
        &mut self,
        config: RecordingConfig,
        grant: CaptureGrant,
    ) -> Result<SessionInfo, RecorderError> {
        if self.state.is_active() {
            return Err(RecorderError::AlreadyRecording);
        }
        if !grant.is_valid() {
            return Err(SetupError::InvalidGrant.into());
        }

        let dir = config
            .output_dir
            .clone()
            .unwrap_or_else(paths::default_recordings_dir);
        paths::ensure_dir(&dir).map_err(|e| RecorderError::Storage(e.to_string()))?;

        if !config.ignore_storage_check {
            let available = self.backend.available_storage(&dir)?;
            if available < config.min_free_bytes {
                return Err(SetupError::InsufficientStorage {
                    available,
                    required: config.min_free_bytes,
                }
                .into());
            }
        }

        self.apply(RecordingEvent::StartRequested);
        match self.setup_session(config, &dir) {
            Ok(info) => {
                self.apply(RecordingEvent::SetupComplete);
                self.schedule_auto_stop();
                let _ = self.events.send(SessionEvent::Started {
                    session_id: info.session_id.clone(),
                    output: info.output.clone(),
                });
                Ok(info)
            }
            Err(e) => {
                // Partially acquired resources were already released by the
                // failed setup; report and reset.
                self.apply(RecordingEvent::SetupFailed {
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Acquires every session resource in order. On failure the units
    /// acquired so far are dropped, which releases their hardware.
    fn setup_session(
        &mut self,
        config: RecordingConfig,
        dir: &std::path::Path,
    ) -> Result<SessionInfo, SetupError> {
        let output = paths::allocate_output_path(dir, &config.file_prefix)
            .map_err(|e| SetupError::EncoderConfig(format!("output allocation failed: {e}")))?;

        let encoder_config = VideoEncoderConfig {
            width: config.resolution.width,
            height: config.resolution.height,
            density_dpi: config.resolution.density_dpi,
            bitrate: config.video_bitrate,
            frame_rate: config.frame_rate,
            i_frame_interval_secs: 1,
        };
        let video = VideoCaptureEncodeUnit::start(self.backend.as_ref(), &encoder_config, &output)?;

        let clock = Arc::new(SessionClock::new());
        let detect_highlights = config.auto_highlight_detection && config.audio_source.has_mic();
        let (peak_tx, highlight_worker) = if detect_highlights {
            let (tx, rx) = crossbeam_channel::bounded(PEAK_QUEUE_DEPTH);
            (
                Some(tx),
                Some(HighlightWorker::spawn(config.highlight_threshold, rx)),
            )
        } else {
            (None, None)
        };

        let mut mic = None;
        if config.audio_source.has_mic() {
            let mut spec = AudioSourceSpec::microphone(MIC_SAMPLE_RATE, 1);
            spec.noise_suppression = config.noise_suppression;
            let source = self.backend.open_audio_source(&spec)?;
            let mut unit = AudioCaptureUnit::new(spec, paths::mic_pcm_path(&output));
            unit.start(source, config.mic_gain, clock.clone(), peak_tx.clone())?;
            mic = Some(unit);
        }

        let mut internal = None;
        if config.audio_source.has_internal() {
            let spec = AudioSourceSpec::internal_playback(INTERNAL_SAMPLE_RATE, 2);
            let source = self.backend.open_audio_source(&spec)?;
            let mut unit = AudioCaptureUnit::new(spec, paths::internal_pcm_path(&output));
            unit.start(source, 1.0, clock.clone(), None)?;
            internal = Some(unit);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            target: "session",
            "session {} started: output={:?}, audio={:?}",
            session_id,
            output,
            config.audio_source
        );

        self.active = Some(ActiveSession {
            session_id: session_id.clone(),
            config,
            output: output.clone(),
            clock,
            video,
            mic,
            internal,
            peak_tx,
            highlight_worker,
            auto_stop: None,
        });

        Ok(SessionInfo { session_id, output })
    }

    fn handle_stop(&mut self, kind: StopKind) -> Result<(), RecorderError> {
        if !self.state.is_active() {
            return Err(RecorderError::NotRecording);
        }
        self.apply(RecordingEvent::StopRequested { kind });
        self.apply(RecordingEvent::TeardownComplete);
        Ok(())
    }

    fn stop_session_if_active(&mut self) {
        if self.state.is_active() {
            tracing::info!(target: "session", "shutting down with an active session");
            if let Err(e) = self.handle_stop(StopKind::Manual) {
                tracing::warn!(target: "session", "stop on shutdown failed: {}", e);
            }
        }
    }

    /// Misdirected toggles (no session) are silent no-ops, mirroring the
    /// state machine's handling of stray control events.
    fn handle_toggle_pause(&mut self) -> Result<bool, RecorderError> {
        let Some(session) = self.active.as_ref() else {
            tracing::debug!(target: "session", "pause toggle ignored, no session");
            return Ok(false);
        };
        if !session.config.pause_enabled {
            tracing::debug!(target: "session", "pause disabled by configuration");
            return Ok(self.state.is_paused());
        }

        if self.state.is_paused() {
            self.apply(RecordingEvent::ResumeRequested);
        } else {
            self.apply(RecordingEvent::PauseRequested);
        }
        Ok(self.state.is_paused())
    }

    fn handle_toggle_mic_mute(&mut self) -> Result<bool, RecorderError> {
        let Some(session) = self.active.as_ref() else {
            tracing::debug!(target: "session", "mic mute ignored, no session");
            return Ok(false);
        };
        if !session.config.mic_mute_enabled {
            tracing::debug!(target: "session", "mic mute disabled by configuration");
            return Ok(false);
        }
        let Some(mic) = &session.mic else {
            tracing::debug!(target: "session", "mic mute ignored, no microphone unit");
            return Ok(false);
        };

        let muted = mic.toggle_muted();
        tracing::info!(target: "session", "microphone muted={}", muted);
        let _ = self.events.send(SessionEvent::MicMuted {
            session_id: session.session_id.clone(),
            muted,
        });
        Ok(muted)
    }

    fn snapshot(&self) -> RecordingStatus {
        let session = self.active.as_ref();
        RecordingStatus {
            active: self.state.is_active(),
            recording: self.state.is_recording(),
            paused: self.state.is_paused(),
            mic_muted: session
                .and_then(|s| s.mic.as_ref())
                .map(|m| m.is_muted())
                .unwrap_or(false),
            elapsed_ms: session.map(|s| s.clock.elapsed_ms()).unwrap_or(0),
            session_id: session.map(|s| s.session_id.clone()),
            output: session.map(|s| s.output.clone()),
        }
    }

    /// Drives the state machine and executes the returned side effects.
    fn apply(&mut self, event: RecordingEvent) {
        let (state, effects) = transition(std::mem::take(&mut self.state), event);
        self.state = state;
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: SideEffect) {
        match effect {
            // Setup itself runs in handle_start so its result can be
            // returned to the caller synchronously.
            SideEffect::BeginSetup => {}
            SideEffect::NotifySetupFailed { error } => {
                tracing::error!(target: "session", "setup failed: {}", error);
                let _ = self.events.send(SessionEvent::SetupFailed { error });
                self.active = None;
            }
            SideEffect::PauseUnits => {
                if let Some(session) = self.active.as_mut() {
                    session.set_units_paused(true);
                    session.clock.pause();
                    session.abort_auto_stop();
                    tracing::info!(target: "session", "session paused");
                    let _ = self.events.send(SessionEvent::Paused {
                        session_id: session.session_id.clone(),
                    });
                }
            }
            SideEffect::ResumeUnits => {
                let session_id = self.active.as_mut().map(|session| {
                    session.set_units_paused(false);
                    session.clock.resume();
                    session.session_id.clone()
                });
                if let Some(session_id) = session_id {
                    tracing::info!(target: "session", "session resumed");
                    self.schedule_auto_stop();
                    let _ = self.events.send(SessionEvent::Resumed { session_id });
                }
            }
            SideEffect::QuiesceUnits { .. } => self.quiesce_units(),
            SideEffect::LaunchPostProcessing { kind } => self.launch_post_processing(kind),
            SideEffect::EmitState => {
                tracing::debug!(target: "session", "state={:?}", self.state);
            }
        }
    }

    /// Schedules the auto-stop timer for the time remaining on the
    /// countdown. Paused time never counts against it.
    fn schedule_auto_stop(&mut self) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        let Some(configured) = session.config.auto_stop_duration() else {
            return;
        };
        let elapsed = Duration::from_millis(session.clock.elapsed_ms());
        let remaining = configured.saturating_sub(elapsed);
        let session_id = session.session_id.clone();
        let tx = self.internal_tx.clone();

        session.abort_auto_stop();
        session.auto_stop = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = tx
                .send(InternalEvent::AutoStopElapsed { session_id })
                .await;
        }));
        tracing::debug!(
            target: "session",
            "auto-stop scheduled in {}ms",
            remaining.as_millis()
        );
    }

    /// Stops capture in order: audio units first so their sinks settle,
    /// then the video drain loop, which owns the ordered hardware teardown.
    fn quiesce_units(&mut self) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        session.abort_auto_stop();
        if let Some(mic) = session.mic.as_mut() {
            mic.stop();
        }
        if let Some(internal) = session.internal.as_mut() {
            internal.stop();
        }
        session.video.stop();
    }

    fn launch_post_processing(&mut self, kind: StopKind) {
        let Some(mut session) = self.active.take() else {
            return;
        };

        let outcome = session.video.stop().unwrap_or_else(|| {
            tracing::error!(target: "session", "video drain outcome missing");
            crate::capture::DrainOutcome {
                muxer_started: false,
                samples_written: 0,
            }
        });

        // Dropping the peak sender lets the highlight worker drain out.
        drop(session.peak_tx.take());
        let highlights = session
            .highlight_worker
            .take()
            .map(|w| w.finish())
            .unwrap_or_default();

        let event = match kind {
            StopKind::Manual => SessionEvent::ManuallyStopped {
                session_id: session.session_id.clone(),
            },
            StopKind::AutoStop => SessionEvent::AutoStopped {
                session_id: session.session_id.clone(),
            },
        };
        let _ = self.events.send(event);

        tracing::info!(
            target: "session",
            "session {} stopped ({:?}): {} samples, {} highlight(s)",
            session.session_id,
            kind,
            outcome.samples_written,
            highlights.len()
        );

        let input = PipelineInput {
            session_id: session.session_id.clone(),
            config: session.config.clone(),
            video_path: session.output.clone(),
            container_finalized: outcome.muxer_started,
            mic_pcm: session
                .mic
                .as_ref()
                .map(|m| (m.sink_path().clone(), m.spec().clone())),
            internal_pcm: session
                .internal
                .as_ref()
                .map(|i| (i.sink_path().clone(), i.spec().clone())),
            highlights,
        };

        // The pipeline overlaps the next session; the coordinator is free
        // as soon as the task is spawned.
        let post = self.post.clone();
        tokio::spawn(async move {
            post.run(input).await;
        });
    }
}
