//! Audio capture unit: one PCM source drained to a raw sink.
//!
//! One instance per selected source (microphone or internal playback); the
//! two never share a unit. The capture loop runs on a dedicated thread and
//! only reads the control flags; the session coordinator is the single
//! writer for `muted`, `paused` and `stop`.
//!
//! Mute contract: a muted unit keeps producing a zero-filled stream at the
//! same byte rate, so downstream mux timing stays aligned with the video
//! duration no matter how long the mic was muted.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::backend::{AudioSource, AudioSourceSpec, SourceKind};
use crate::clock::SessionClock;
use crate::errors::SetupError;
use crate::highlights::{peak_level_i16, PeakSample};

/// Poll interval while paused.
const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Device buffers are requested at this multiple of the reported minimum.
const BUFFER_SIZE_FACTOR: usize = 4;

pub struct AudioCaptureUnit {
    spec: AudioSourceSpec,
    sink_path: PathBuf,
    muted: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioCaptureUnit {
    pub fn new(spec: AudioSourceSpec, sink_path: PathBuf) -> Self {
        Self {
            spec,
            sink_path,
            muted: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn spec(&self) -> &AudioSourceSpec {
        &self.spec
    }

    pub fn sink_path(&self) -> &PathBuf {
        &self.sink_path
    }

    pub fn is_recording(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn toggle_muted(&self) -> bool {
        let muted = !self.muted.load(Ordering::Relaxed);
        self.muted.store(muted, Ordering::Relaxed);
        muted
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Validates the device, opens the sink and spawns the capture thread.
    ///
    /// Fails fast (sink never opened) when the source reports a bad buffer
    /// size or refuses to start. `peak_tx` is only wired for microphone
    /// units feeding highlight detection.
    pub fn start(
        &mut self,
        mut source: Box<dyn AudioSource>,
        gain: f32,
        clock: Arc<SessionClock>,
        peak_tx: Option<Sender<PeakSample>>,
    ) -> Result<(), SetupError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let min_size = source.min_buffer_size()?;
        if min_size == 0 {
            return Err(SetupError::AudioInit(
                "source reported zero minimum buffer size".to_string(),
            ));
        }
        let buffer_size = min_size * BUFFER_SIZE_FACTOR;

        source.start()?;

        let sink = File::create(&self.sink_path).map_err(|e| {
            source.stop();
            SetupError::AudioInit(format!("failed to open sink {:?}: {}", self.sink_path, e))
        })?;

        tracing::info!(
            target: "capture",
            "audio unit started: kind={:?}, rate={}, channels={}, buffer={}B, sink={:?}",
            self.spec.kind,
            self.spec.sample_rate,
            self.spec.channels,
            buffer_size,
            self.sink_path
        );

        let spec = self.spec.clone();
        let muted = self.muted.clone();
        let paused = self.paused.clone();
        let stop = self.stop.clone();
        self.handle = Some(std::thread::spawn(move || {
            run_capture_loop(
                source,
                BufWriter::new(sink),
                buffer_size,
                gain,
                spec,
                muted,
                paused,
                stop,
                clock,
                peak_tx,
            );
        }));

        Ok(())
    }

    /// Signals loop termination, joins the thread and releases the source.
    ///
    /// Safe to call when `start()` never ran or already failed: it is a
    /// no-op, never a panic, and leaves `is_recording() == false`.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target: "capture", "audio capture thread panicked");
            }
        }
    }
}

impl Drop for AudioCaptureUnit {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_capture_loop(
    mut source: Box<dyn AudioSource>,
    mut sink: BufWriter<File>,
    buffer_size: usize,
    gain: f32,
    spec: AudioSourceSpec,
    muted: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    clock: Arc<SessionClock>,
    peak_tx: Option<Sender<PeakSample>>,
) {
    let mut buf = vec![0u8; buffer_size];
    let zeros = vec![0u8; buffer_size];
    // Wall-clock span one full buffer represents, used to keep cadence when
    // the device cannot be read (muted fallback).
    let chunk = Duration::from_millis(buffer_size as u64 * 1000 / spec.byte_rate().max(1));
    let feed_peaks = matches!(spec.kind, SourceKind::Microphone) && peak_tx.is_some();

    while !stop.load(Ordering::Relaxed) {
        if paused.load(Ordering::Relaxed) {
            std::thread::sleep(PAUSE_POLL);
            continue;
        }

        if muted.load(Ordering::Relaxed) {
            // Keep draining the device so the read pace still tracks real
            // time, but persist silence of the same length.
            match source.read(&mut buf) {
                Ok(n) if n > 0 => {
                    if let Err(e) = sink.write_all(&zeros[..n]) {
                        tracing::error!(target: "capture", "sink write failed while muted: {}", e);
                        break;
                    }
                }
                Ok(_) | Err(_) => {
                    std::thread::sleep(chunk);
                    if let Err(e) = sink.write_all(&zeros) {
                        tracing::error!(target: "capture", "sink write failed while muted: {}", e);
                        break;
                    }
                }
            }
            continue;
        }

        match source.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(PAUSE_POLL);
            }
            Ok(n) => {
                if (gain - 1.0).abs() > f32::EPSILON {
                    apply_gain(&mut buf[..n], gain);
                }
                if feed_peaks {
                    if let Some(tx) = &peak_tx {
                        let _ = tx.try_send(PeakSample {
                            offset_ms: clock.elapsed_ms(),
                            peak: peak_level_i16(&buf[..n]),
                        });
                    }
                }
                if let Err(e) = sink.write_all(&buf[..n]) {
                    tracing::error!(target: "capture", "sink write failed: {}", e);
                    break;
                }
            }
            Err(e) => {
                // A hard source failure ends this unit only; the session
                // keeps recording video and the final mux proceeds with
                // whatever audio was persisted.
                tracing::warn!(target: "capture", "audio read failed, ending unit: {}", e);
                break;
            }
        }
    }

    if let Err(e) = sink.flush() {
        tracing::warn!(target: "capture", "sink flush failed: {}", e);
    }
    source.stop();
    tracing::info!(target: "capture", "audio unit finished: kind={:?}", spec.kind);
}

/// Scales 16-bit little-endian samples in place, clamping to the signed
/// range to prevent wraparound distortion.
fn apply_gain(pcm: &mut [u8], gain: f32) {
    for chunk in pcm.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let scaled = (f32::from(sample) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX));
        chunk.copy_from_slice(&(scaled as i16).to_le_bytes());
    }
}
