//! Recording configuration snapshot.
//!
//! A `RecordingConfig` is read once at session start from whatever key/value
//! store the host application uses. Every field carries a serde default so a
//! snapshot with absent keys deserializes to documented defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which audio sources to capture alongside the screen.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceSelection {
    None,
    #[default]
    Mic,
    Internal,
    Both,
}

impl AudioSourceSelection {
    pub fn has_mic(&self) -> bool {
        matches!(self, AudioSourceSelection::Mic | AudioSourceSelection::Both)
    }

    pub fn has_internal(&self) -> bool {
        matches!(
            self,
            AudioSourceSelection::Internal | AudioSourceSelection::Both
        )
    }
}

/// Target capture resolution and display density.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            density_dpi: 320,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub audio_source: AudioSourceSelection,
    /// Microphone gain multiplier, 0.0–1.0.
    #[serde(default = "default_mic_gain")]
    pub mic_gain: f32,
    #[serde(default)]
    pub noise_suppression: bool,
    /// 0 disables auto-stop.
    #[serde(default)]
    pub auto_stop_minutes: u32,
    /// Millisecond override for the auto-stop countdown. Takes precedence
    /// over `auto_stop_minutes` when set; intended for tests and debugging.
    #[serde(default)]
    pub auto_stop_millis_override: Option<u64>,
    #[serde(default = "default_true")]
    pub pause_enabled: bool,
    #[serde(default = "default_true")]
    pub mic_mute_enabled: bool,
    #[serde(default)]
    pub auto_highlight_detection: bool,
    /// Peak amplitude threshold (i16 units) for highlight detection.
    #[serde(default = "default_highlight_threshold")]
    pub highlight_threshold: i16,
    #[serde(default)]
    pub auto_highlight_clip_extraction: bool,
    #[serde(default = "default_clip_length")]
    pub highlight_clip_length_seconds: u32,
    #[serde(default)]
    pub auto_highlight_reel_generation: bool,
    #[serde(default)]
    pub auto_trim_enabled: bool,
    #[serde(default)]
    pub auto_trim_start_seconds: u32,
    #[serde(default)]
    pub auto_trim_end_seconds: u32,
    #[serde(default)]
    pub cloud_backup_enabled: bool,
    #[serde(default)]
    pub cloud_backup_provider: String,
    /// Minimum free space required before a session may start.
    #[serde(default = "default_min_free_bytes")]
    pub min_free_bytes: u64,
    #[serde(default)]
    pub ignore_storage_check: bool,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Recordings directory; falls back to the platform default when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_video_bitrate() -> u32 {
    8_000_000
}

fn default_frame_rate() -> u32 {
    30
}

fn default_mic_gain() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_highlight_threshold() -> i16 {
    12_000
}

fn default_clip_length() -> u32 {
    10
}

fn default_min_free_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_file_prefix() -> String {
    "Recording".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            video_bitrate: default_video_bitrate(),
            frame_rate: default_frame_rate(),
            audio_source: AudioSourceSelection::default(),
            mic_gain: default_mic_gain(),
            noise_suppression: false,
            auto_stop_minutes: 0,
            auto_stop_millis_override: None,
            pause_enabled: true,
            mic_mute_enabled: true,
            auto_highlight_detection: false,
            highlight_threshold: default_highlight_threshold(),
            auto_highlight_clip_extraction: false,
            highlight_clip_length_seconds: default_clip_length(),
            auto_highlight_reel_generation: false,
            auto_trim_enabled: false,
            auto_trim_start_seconds: 0,
            auto_trim_end_seconds: 0,
            cloud_backup_enabled: false,
            cloud_backup_provider: String::new(),
            min_free_bytes: default_min_free_bytes(),
            ignore_storage_check: false,
            file_prefix: default_file_prefix(),
            output_dir: None,
        }
    }
}

impl RecordingConfig {
    /// Configured auto-stop countdown, `None` when disabled.
    pub fn auto_stop_duration(&self) -> Option<Duration> {
        if let Some(ms) = self.auto_stop_millis_override {
            return (ms > 0).then(|| Duration::from_millis(ms));
        }
        (self.auto_stop_minutes > 0)
            .then(|| Duration::from_secs(u64::from(self.auto_stop_minutes) * 60))
    }
}
