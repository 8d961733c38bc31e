//! Video capture/encode unit: virtual display mirror into a hardware
//! encoder, drained into a container writer.
//!
//! The drain loop runs on its own thread for the session lifetime. The
//! container writer is only started after the encoder's one-time
//! format-changed event; no sample is written before that. Output buffers
//! are always released back to the encoder, whether or not the sample was
//! written, to avoid starving the codec.
//!
//! Teardown order is load-bearing: encoder stop/release, then display
//! release, then container finalize (only if it ever started).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{
    ContainerWriter, DisplayMirror, DrainEvent, RecorderBackend, VideoEncoder, VideoEncoderConfig,
};
use crate::errors::SetupError;

/// Encoder output poll timeout.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Extra idle between polls while paused.
const PAUSE_POLL: Duration = Duration::from_millis(10);

/// What the drain loop accomplished, reported after join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Whether the container writer was ever started (a format-changed
    /// event arrived). When false the output file holds no usable stream.
    pub muxer_started: bool,
    pub samples_written: u64,
}

pub struct VideoCaptureEncodeUnit {
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<DrainOutcome>>,
    outcome: Option<DrainOutcome>,
}

impl VideoCaptureEncodeUnit {
    /// Acquires encoder, display mirror and container writer in order, then
    /// spawns the drain thread. Resources acquired before a failure are
    /// released by drop.
    pub fn start(
        backend: &dyn RecorderBackend,
        config: &VideoEncoderConfig,
        output: &Path,
    ) -> Result<Self, SetupError> {
        let mut encoder = backend.create_encoder(config)?;
        let surface = encoder.input_surface()?;
        let display = backend.create_display_mirror(surface, config)?;
        let writer = backend.create_container_writer(output)?;

        tracing::info!(
            target: "capture",
            "video unit started: {}x{} @{}fps, bitrate={}, output={:?}",
            config.width,
            config.height,
            config.frame_rate,
            config.bitrate,
            output
        );

        let paused = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let paused = paused.clone();
            let stop = stop.clone();
            std::thread::spawn(move || run_drain_loop(encoder, display, writer, paused, stop))
        };

        Ok(Self {
            paused,
            stop,
            handle: Some(handle),
            outcome: None,
        })
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Stops the drain loop and tears down encoder, display and writer in
    /// order. Idempotent; later calls return the recorded outcome.
    pub fn stop(&mut self) -> Option<DrainOutcome> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(_) => {
                    tracing::error!(target: "capture", "video drain thread panicked");
                }
            }
        }
        self.outcome
    }
}

impl Drop for VideoCaptureEncodeUnit {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_drain_loop(
    mut encoder: Box<dyn VideoEncoder>,
    mut display: Box<dyn DisplayMirror>,
    mut writer: Box<dyn ContainerWriter>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) -> DrainOutcome {
    let mut muxer_started = false;
    let mut video_track = 0usize;
    let mut samples_written = 0u64;

    while !stop.load(Ordering::Relaxed) {
        match encoder.dequeue(DRAIN_TIMEOUT) {
            Ok(DrainEvent::NoOutputYet) => {
                if paused.load(Ordering::Relaxed) {
                    std::thread::sleep(PAUSE_POLL);
                }
            }
            Ok(DrainEvent::FormatChanged(format)) => {
                if muxer_started {
                    tracing::warn!(target: "capture", "duplicate format change ignored");
                    continue;
                }
                match writer
                    .add_track(&format)
                    .and_then(|track| writer.start().map(|_| track))
                {
                    Ok(track) => {
                        tracing::info!(
                            target: "capture",
                            "container started: track={}, format={:?}",
                            track,
                            format
                        );
                        video_track = track;
                        muxer_started = true;
                    }
                    Err(e) => {
                        tracing::error!(target: "capture", "container start failed: {}", e);
                        break;
                    }
                }
            }
            Ok(DrainEvent::Buffer(sample)) => {
                let index = sample.index;
                if muxer_started && !paused.load(Ordering::Relaxed) {
                    match writer.write_sample(video_track, &sample) {
                        Ok(()) => samples_written += 1,
                        Err(e) => {
                            tracing::warn!(target: "capture", "sample write failed: {}", e);
                        }
                    }
                }
                // Release unconditionally, even when paused or the write
                // failed; withholding buffers starves the encoder.
                if let Err(e) = encoder.release_buffer(index) {
                    tracing::error!(target: "capture", "buffer release failed: {}", e);
                    break;
                }
                if paused.load(Ordering::Relaxed) {
                    std::thread::sleep(PAUSE_POLL);
                }
            }
            Err(e) => {
                tracing::error!(target: "capture", "encoder drain failed: {}", e);
                break;
            }
        }
    }

    // Ordered teardown: encoder first, then display, then container.
    if let Err(e) = encoder.stop() {
        tracing::warn!(target: "capture", "encoder stop failed: {}", e);
    }
    drop(encoder);
    display.release();
    drop(display);
    if muxer_started {
        if let Err(e) = writer.finalize() {
            tracing::warn!(target: "capture", "container finalize failed: {}", e);
        }
    }

    tracing::info!(
        target: "capture",
        "video drain finished: muxer_started={}, samples={}",
        muxer_started,
        samples_written
    );

    DrainOutcome {
        muxer_started,
        samples_written,
    }
}
