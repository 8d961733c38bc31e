//! Platform seams for the recording core.
//!
//! The core never talks to a hardware encoder, virtual display, container
//! muxer or audio device directly; it drives them through these traits. A
//! platform backend implements them on top of the real media stack, tests
//! implement them with fakes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CaptureError, SetupError};

/// Opaque screen-capture consent token obtained by the host application's
/// one-time consent flow. The core only checks validity.
#[derive(Debug, Clone)]
pub struct CaptureGrant {
    token: String,
}

impl CaptureGrant {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.token.is_empty()
    }
}

/// Encoder output track description, produced once per session by the
/// format-changed event.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// One encoded sample dequeued from the encoder's output buffer queue.
/// The buffer behind `index` stays owned by the encoder until
/// [`VideoEncoder::release_buffer`] is called.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub index: usize,
    pub data: Vec<u8>,
    pub pts_us: u64,
    pub keyframe: bool,
}

/// Result of polling the encoder output queue.
#[derive(Debug)]
pub enum DrainEvent {
    /// Nothing ready within the poll timeout.
    NoOutputYet,
    /// The encoder settled on its output format. Happens at most once per
    /// session, before any sample.
    FormatChanged(TrackFormat),
    /// An encoded sample is ready. Must be released back to the encoder.
    Buffer(EncodedSample),
}

/// Opaque handle to the encoder's input surface, used to bind the virtual
/// display mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// Hardware video encoder, already configured by the backend factory.
/// Dropping the encoder releases the underlying codec.
pub trait VideoEncoder: Send {
    /// Input surface the virtual display renders into.
    fn input_surface(&mut self) -> Result<SurfaceHandle, SetupError>;

    /// Poll the output queue with a bounded timeout.
    fn dequeue(&mut self, timeout: Duration) -> Result<DrainEvent, CaptureError>;

    /// Return an output buffer to the encoder. Required for every
    /// `DrainEvent::Buffer`, whether or not the sample was written.
    fn release_buffer(&mut self, index: usize) -> Result<(), CaptureError>;

    /// Signal end of stream and stop the codec.
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Container writer for the video elementary stream. May not accept samples
/// before `start()`.
pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CaptureError>;
    fn start(&mut self) -> Result<(), CaptureError>;
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), CaptureError>;
    /// Finalize the container. Only valid after `start()`.
    fn finalize(&mut self) -> Result<(), CaptureError>;
}

/// Virtual display mirroring the real screen into an encoder surface.
pub trait DisplayMirror: Send {
    fn release(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Microphone,
    InternalPlayback,
}

/// Audio usages an internal-playback source captures. Mirrors the platform
/// playback-capture configuration; irrelevant for microphones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureUsage {
    Media,
    Game,
    Unknown,
}

/// Description of an audio source to open: kind, PCM format, and for
/// internal playback the captured usages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSourceSpec {
    pub kind: SourceKind,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default)]
    pub usages: Vec<CaptureUsage>,
    /// Ask the platform for its echo/noise canceller on this source. Only
    /// meaningful for microphones.
    #[serde(default)]
    pub noise_suppression: bool,
}

impl AudioSourceSpec {
    pub fn microphone(sample_rate: u32, channels: u16) -> Self {
        Self {
            kind: SourceKind::Microphone,
            sample_rate,
            channels,
            usages: Vec::new(),
            noise_suppression: false,
        }
    }

    pub fn internal_playback(sample_rate: u32, channels: u16) -> Self {
        Self {
            kind: SourceKind::InternalPlayback,
            sample_rate,
            channels,
            usages: vec![
                CaptureUsage::Media,
                CaptureUsage::Game,
                CaptureUsage::Unknown,
            ],
            noise_suppression: false,
        }
    }

    /// Bytes per second of 16-bit PCM at this format.
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * 2
    }
}

/// PCM audio source. `read` blocks at the hardware's real-time pace.
pub trait AudioSource: Send {
    /// Minimum device buffer size in bytes. An error state here means the
    /// device cannot be initialized; the unit fails fast without opening a
    /// sink.
    fn min_buffer_size(&self) -> Result<usize, SetupError>;

    fn start(&mut self) -> Result<(), SetupError>;

    /// Read up to `buf.len()` bytes of PCM, returning the count read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>;

    /// Stop and release the device. Must be a no-op if never started.
    fn stop(&mut self);
}

/// Encoder configuration derived from the session config.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
}

/// Factory for platform resources, plus the storage probe used by the
/// start precondition.
pub trait RecorderBackend: Send + Sync {
    fn available_storage(&self, dir: &Path) -> Result<u64, SetupError>;

    fn create_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, SetupError>;

    fn create_display_mirror(
        &self,
        surface: SurfaceHandle,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn DisplayMirror>, SetupError>;

    fn create_container_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, SetupError>;

    fn open_audio_source(&self, spec: &AudioSourceSpec) -> Result<Box<dyn AudioSource>, SetupError>;
}
