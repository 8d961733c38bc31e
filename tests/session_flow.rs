//! End-to-end session tests against a fake platform backend and transcoder.
//!
//! The fakes pace themselves like real hardware: the encoder emits its format
//! then a steady stream of buffers, audio sources block at their byte rate.
//! Everything runs through the public `Recorder` handle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use reelcap::backend::{
    AudioSource, AudioSourceSpec, CaptureGrant, ContainerWriter, DisplayMirror, DrainEvent,
    EncodedSample, RecorderBackend, SourceKind, SurfaceHandle, TrackFormat, VideoEncoder,
    VideoEncoderConfig,
};
use reelcap::errors::{CaptureError, SetupError, TranscodeError};
use reelcap::pipeline::{Stage, StageStatus};
use reelcap::{
    AudioSourceSelection, Recorder, RecorderError, RecordingConfig, SessionEvent, Transcoder,
};

struct FakeEncoder {
    next_index: usize,
    format_sent: bool,
}

impl VideoEncoder for FakeEncoder {
    fn input_surface(&mut self) -> Result<SurfaceHandle, SetupError> {
        Ok(SurfaceHandle(42))
    }

    fn dequeue(&mut self, _timeout: Duration) -> Result<DrainEvent, CaptureError> {
        std::thread::sleep(Duration::from_millis(10));
        if !self.format_sent {
            self.format_sent = true;
            return Ok(DrainEvent::FormatChanged(TrackFormat {
                mime: "video/avc".to_string(),
                width: 1280,
                height: 720,
            }));
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(DrainEvent::Buffer(EncodedSample {
            index,
            data: vec![0xABu8; 64],
            pts_us: index as u64 * 33_000,
            keyframe: index == 0,
        }))
    }

    fn release_buffer(&mut self, _index: usize) -> Result<(), CaptureError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

struct FakeWriter {
    path: PathBuf,
    started: bool,
    bytes: Vec<u8>,
}

impl ContainerWriter for FakeWriter {
    fn add_track(&mut self, _format: &TrackFormat) -> Result<usize, CaptureError> {
        Ok(0)
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, _track: usize, sample: &EncodedSample) -> Result<(), CaptureError> {
        if !self.started {
            return Err(CaptureError::WriteFailed("writer not started".to_string()));
        }
        self.bytes.extend_from_slice(&sample.data);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CaptureError> {
        std::fs::write(&self.path, &self.bytes)
            .map_err(|e| CaptureError::WriteFailed(e.to_string()))
    }
}

struct FakeDisplay;

impl DisplayMirror for FakeDisplay {
    fn release(&mut self) {}
}

/// Blocks at the configured byte rate, like a real device clock.
struct FakeAudioSource {
    byte_rate: u64,
    fill: u8,
}

impl AudioSource for FakeAudioSource {
    fn min_buffer_size(&self) -> Result<usize, SetupError> {
        Ok(self.byte_rate as usize / 50)
    }

    fn start(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        let ms = buf.len() as u64 * 1000 / self.byte_rate;
        std::thread::sleep(Duration::from_millis(ms));
        buf.fill(self.fill);
        Ok(buf.len())
    }

    fn stop(&mut self) {}
}

struct FakeBackend {
    storage: AtomicU64,
    fail_encoder: AtomicBool,
    opened_sources: Mutex<Vec<AudioSourceSpec>>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            storage: AtomicU64::new(u64::MAX),
            fail_encoder: AtomicBool::new(false),
            opened_sources: Mutex::new(Vec::new()),
        }
    }
}

impl RecorderBackend for FakeBackend {
    fn available_storage(&self, _dir: &Path) -> Result<u64, SetupError> {
        Ok(self.storage.load(Ordering::SeqCst))
    }

    fn create_encoder(
        &self,
        _config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, SetupError> {
        if self.fail_encoder.load(Ordering::SeqCst) {
            return Err(SetupError::EncoderConfig("codec busy".to_string()));
        }
        Ok(Box::new(FakeEncoder {
            next_index: 0,
            format_sent: false,
        }))
    }

    fn create_display_mirror(
        &self,
        _surface: SurfaceHandle,
        _config: &VideoEncoderConfig,
    ) -> Result<Box<dyn DisplayMirror>, SetupError> {
        Ok(Box::new(FakeDisplay))
    }

    fn create_container_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, SetupError> {
        Ok(Box::new(FakeWriter {
            path: path.to_path_buf(),
            started: false,
            bytes: Vec::new(),
        }))
    }

    fn open_audio_source(&self, spec: &AudioSourceSpec) -> Result<Box<dyn AudioSource>, SetupError> {
        self.opened_sources.lock().unwrap().push(spec.clone());
        Ok(Box::new(FakeAudioSource {
            byte_rate: 32_000,
            fill: 0x10,
        }))
    }
}

/// Transcoder fake that materializes each artifact as a real file.
#[derive(Default)]
struct FakeTranscoder {
    fail_mux: AtomicBool,
    mux_calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl Transcoder for FakeTranscoder {
    fn encode_pcm_to_aac(
        &self,
        _pcm: &Path,
        _spec: &AudioSourceSpec,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        std::fs::write(out, b"aac").map_err(|e| TranscodeError::Io(e.to_string()))
    }

    fn mux(&self, video: &Path, audio: &[PathBuf], out: &Path) -> Result<(), TranscodeError> {
        self.mux_calls.lock().unwrap().push(audio.to_vec());
        if self.fail_mux.load(Ordering::SeqCst) {
            return Err(TranscodeError::ProcessFailed {
                exit_code: 1,
                stderr: "moov atom not found".to_string(),
            });
        }
        let mut bytes = std::fs::read(video).map_err(|e| TranscodeError::Io(e.to_string()))?;
        bytes.extend_from_slice(b"+audio");
        std::fs::write(out, bytes).map_err(|e| TranscodeError::Io(e.to_string()))
    }

    fn probe_duration(&self, _file: &Path) -> Result<f64, TranscodeError> {
        Ok(30.0)
    }

    fn trim(
        &self,
        input: &Path,
        _start: f64,
        _end: f64,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        std::fs::copy(input, out)
            .map(|_| ())
            .map_err(|e| TranscodeError::Io(e.to_string()))
    }

    fn thumbnail(&self, _video: &Path, _at: f64, out: &Path) -> Result<(), TranscodeError> {
        std::fs::write(out, b"png").map_err(|e| TranscodeError::Io(e.to_string()))
    }

    fn extract_clip(
        &self,
        _video: &Path,
        _start: f64,
        _length: f64,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        std::fs::write(out, b"clip").map_err(|e| TranscodeError::Io(e.to_string()))
    }

    fn concat(&self, _clips: &[PathBuf], out: &Path) -> Result<(), TranscodeError> {
        std::fs::write(out, b"reel").map_err(|e| TranscodeError::Io(e.to_string()))
    }
}

fn config(dir: &Path) -> RecordingConfig {
    RecordingConfig {
        audio_source: AudioSourceSelection::Both,
        output_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

fn grant() -> CaptureGrant {
    CaptureGrant::new("consent-token")
}

async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(flavor = "multi_thread")]
async fn record_mux_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let transcoder = Arc::new(FakeTranscoder::default());
    let recorder = Recorder::spawn(Arc::new(FakeBackend::new()), transcoder.clone(), None);
    let mut events = recorder.subscribe();

    let info = recorder.start(config(dir.path()), grant()).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Started { .. })).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    recorder.stop().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::ManuallyStopped { .. })
    })
    .await;

    let finished = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PipelineFinished { .. })
    })
    .await;
    let SessionEvent::PipelineFinished { report, .. } = finished else {
        unreachable!()
    };

    assert_eq!(report.status_of(Stage::Mux), Some(&StageStatus::Succeeded));
    let muxed = reelcap::paths::muxed_path(&info.output);
    assert_eq!(report.final_video, muxed);
    let bytes = std::fs::read(&muxed).unwrap();
    assert!(bytes.ends_with(b"+audio"));
    assert!(!bytes.is_empty());

    // Both audio sinks participated and were cleaned up afterwards.
    assert_eq!(transcoder.mux_calls.lock().unwrap()[0].len(), 2);
    assert!(!reelcap::paths::mic_pcm_path(&info.output).exists());
    assert!(!reelcap::paths::internal_pcm_path(&info.output).exists());
    assert!(reelcap::paths::report_path(&info.output).exists());

    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );

    recorder.start(config(dir.path()), grant()).await.unwrap();
    let err = recorder.start(config(dir.path()), grant()).await.unwrap_err();
    assert!(matches!(err, RecorderError::AlreadyRecording));

    recorder.stop().await.unwrap();
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_preconditions_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let recorder = Recorder::spawn(backend.clone(), Arc::new(FakeTranscoder::default()), None);

    let err = recorder
        .start(config(dir.path()), CaptureGrant::new(""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Setup(SetupError::InvalidGrant)
    ));

    backend.storage.store(1024, Ordering::SeqCst);
    let err = recorder.start(config(dir.path()), grant()).await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Setup(SetupError::InsufficientStorage { .. })
    ));

    // The ignore flag bypasses the storage probe.
    backend.storage.store(0, Ordering::SeqCst);
    let mut bypass = config(dir.path());
    bypass.ignore_storage_check = true;
    recorder.start(bypass, grant()).await.unwrap();
    recorder.stop().await.unwrap();
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_failure_resets_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let recorder = Recorder::spawn(backend.clone(), Arc::new(FakeTranscoder::default()), None);
    let mut events = recorder.subscribe();

    backend.fail_encoder.store(true, Ordering::SeqCst);
    let err = recorder.start(config(dir.path()), grant()).await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Setup(SetupError::EncoderConfig(_))
    ));
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::SetupFailed { .. })
    })
    .await;

    let status = recorder.status().await.unwrap();
    assert!(!status.active);

    // The failed attempt left the recorder usable.
    backend.fail_encoder.store(false, Ordering::SeqCst);
    recorder.start(config(dir.path()), grant()).await.unwrap();
    recorder.stop().await.unwrap();
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_suspends_clock_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );
    let mut events = recorder.subscribe();

    recorder.start(config(dir.path()), grant()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let paused = recorder.toggle_pause().await.unwrap();
    assert!(paused);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Paused { .. })).await;

    let at_pause = recorder.status().await.unwrap();
    assert!(at_pause.paused);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let still_paused = recorder.status().await.unwrap();
    // The elapsed counter freezes while paused.
    assert!(still_paused.elapsed_ms.saturating_sub(at_pause.elapsed_ms) <= 20);

    let paused = recorder.toggle_pause().await.unwrap();
    assert!(!paused);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Resumed { .. })).await;

    recorder.stop().await.unwrap();
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mic_mute_toggles_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );
    let mut events = recorder.subscribe();

    recorder.start(config(dir.path()), grant()).await.unwrap();
    assert!(recorder.toggle_mic_mute().await.unwrap());
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::MicMuted { .. })).await;
    assert!(matches!(event, SessionEvent::MicMuted { muted: true, .. }));
    assert!(recorder.status().await.unwrap().mic_muted);

    assert!(!recorder.toggle_mic_mute().await.unwrap());
    assert!(!recorder.status().await.unwrap().mic_muted);

    recorder.stop().await.unwrap();
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_stop_countdown_excludes_paused_time() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );
    let mut events = recorder.subscribe();

    let mut cfg = config(dir.path());
    cfg.auto_stop_millis_override = Some(600);
    let started = Instant::now();
    recorder.start(cfg, grant()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    recorder.toggle_pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    recorder.toggle_pause().await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::AutoStopped { .. })
    })
    .await;
    let wall = started.elapsed();
    // 600ms of recorded time plus ~300ms paused.
    assert!(wall >= Duration::from_millis(850), "fired after {wall:?}");
    assert!(wall <= Duration::from_millis(1500), "fired after {wall:?}");

    assert!(!recorder.status().await.unwrap().active);
    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mux_failure_keeps_video_and_skips_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let transcoder = Arc::new(FakeTranscoder::default());
    transcoder.fail_mux.store(true, Ordering::SeqCst);
    let recorder = Recorder::spawn(Arc::new(FakeBackend::new()), transcoder, None);
    let mut events = recorder.subscribe();

    let mut cfg = config(dir.path());
    cfg.auto_trim_enabled = true;
    cfg.auto_trim_start_seconds = 1;
    let info = recorder.start(cfg, grant()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    recorder.stop().await.unwrap();

    wait_for(&mut events, |e| matches!(e, SessionEvent::MuxFailed { .. })).await;
    let finished = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PipelineFinished { .. })
    })
    .await;
    let SessionEvent::PipelineFinished { report, .. } = finished else {
        unreachable!()
    };

    // The pre-mux recording survives as the final file.
    assert_eq!(report.final_video, info.output);
    assert!(info.output.exists());
    assert!(!reelcap::paths::muxed_path(&info.output).exists());
    assert!(matches!(
        report.status_of(Stage::Mux),
        Some(StageStatus::Failed(_))
    ));
    for stage in [Stage::Trim, Stage::Thumbnail, Stage::Highlights] {
        assert!(
            matches!(report.status_of(stage), Some(StageStatus::Skipped(_))),
            "{stage:?} should be skipped after mux failure"
        );
    }

    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn video_only_session_skips_mux() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );
    let mut events = recorder.subscribe();

    let mut cfg = config(dir.path());
    cfg.audio_source = AudioSourceSelection::None;
    let info = recorder.start(cfg, grant()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    recorder.stop().await.unwrap();

    let finished = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PipelineFinished { .. })
    })
    .await;
    let SessionEvent::PipelineFinished { report, .. } = finished else {
        unreachable!()
    };

    assert!(matches!(
        report.status_of(Stage::Mux),
        Some(StageStatus::Skipped(_))
    ));
    // Video-only final file, thumbnail still produced from it.
    assert_eq!(report.final_video, info.output);
    assert_eq!(
        report.status_of(Stage::Thumbnail),
        Some(&StageStatus::Succeeded)
    );
    assert!(reelcap::paths::thumbnail_path(&info.output).exists());

    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stray_controls_without_a_session() {
    let recorder = Recorder::spawn(
        Arc::new(FakeBackend::new()),
        Arc::new(FakeTranscoder::default()),
        None,
    );

    // Stop is a real request with a real answer; the toggles are silent
    // no-ops like any other misdirected control command.
    assert!(matches!(
        recorder.stop().await.unwrap_err(),
        RecorderError::NotRecording
    ));
    assert!(!recorder.toggle_pause().await.unwrap());
    assert!(!recorder.toggle_mic_mute().await.unwrap());
    assert!(!recorder.status().await.unwrap().active);

    recorder.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn noise_suppression_reaches_the_mic_source() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let recorder = Recorder::spawn(backend.clone(), Arc::new(FakeTranscoder::default()), None);

    let mut cfg = config(dir.path());
    cfg.noise_suppression = true;
    recorder.start(cfg, grant()).await.unwrap();
    recorder.stop().await.unwrap();

    let specs = backend.opened_sources.lock().unwrap();
    let mic = specs
        .iter()
        .find(|s| s.kind == SourceKind::Microphone)
        .expect("microphone source opened");
    assert!(mic.noise_suppression);
    // Internal playback never requests the canceller.
    let internal = specs
        .iter()
        .find(|s| s.kind == SourceKind::InternalPlayback)
        .expect("internal source opened");
    assert!(!internal.noise_suppression);
    drop(specs);

    recorder.shutdown().await;
}
