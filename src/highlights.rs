//! Highlight detection: loud-moment timestamps from microphone peaks.
//!
//! The capture loop feeds peak amplitudes over a channel; a small worker
//! thread filters them against a threshold with a fixed cooldown and collects
//! millisecond offsets relative to the session timeline (pause time
//! excluded). Offsets are strictly increasing and never closer than the
//! cooldown.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::paths;

/// Minimum gap between two consecutive highlight timestamps.
pub const HIGHLIGHT_COOLDOWN_MS: u64 = 2000;

/// One peak observation from a capture buffer.
#[derive(Debug, Clone, Copy)]
pub struct PeakSample {
    pub offset_ms: u64,
    pub peak: i16,
}

/// Max absolute 16-bit sample value in a little-endian PCM buffer.
pub fn peak_level_i16(pcm: &[u8]) -> i16 {
    let mut peak: i16 = 0;
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        // i16::MIN has no abs; saturate instead of wrapping.
        let magnitude = sample.saturating_abs();
        if magnitude > peak {
            peak = magnitude;
        }
    }
    peak
}

/// Threshold + cooldown filter. Pure logic, no I/O.
#[derive(Debug)]
pub struct HighlightFilter {
    threshold: i16,
    timestamps: Vec<u64>,
}

impl HighlightFilter {
    pub fn new(threshold: i16) -> Self {
        Self {
            threshold,
            timestamps: Vec::new(),
        }
    }

    /// Records the sample's offset if it crosses the threshold and the
    /// cooldown since the previous highlight has elapsed. Returns whether a
    /// highlight was recorded.
    pub fn observe(&mut self, sample: PeakSample) -> bool {
        if sample.peak < self.threshold {
            return false;
        }
        if let Some(&last) = self.timestamps.last() {
            if sample.offset_ms < last + HIGHLIGHT_COOLDOWN_MS {
                return false;
            }
        }
        self.timestamps.push(sample.offset_ms);
        true
    }

    pub fn into_timestamps(self) -> Vec<u64> {
        self.timestamps
    }
}

/// Worker thread draining peak samples for the lifetime of a session.
pub struct HighlightWorker {
    handle: Option<JoinHandle<Vec<u64>>>,
}

impl HighlightWorker {
    /// The worker exits when all senders are dropped.
    pub fn spawn(threshold: i16, rx: Receiver<PeakSample>) -> Self {
        let handle = std::thread::spawn(move || {
            let mut filter = HighlightFilter::new(threshold);
            for sample in rx.iter() {
                if filter.observe(sample) {
                    tracing::debug!(
                        target: "capture",
                        "highlight detected at {}ms (peak {})",
                        sample.offset_ms,
                        sample.peak
                    );
                }
            }
            filter.into_timestamps()
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Joins the worker and returns the collected timestamps. The sender
    /// side must be dropped first or this blocks indefinitely.
    pub fn finish(mut self) -> Vec<u64> {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

/// Serializes highlight offsets as a JSON array beside the final video,
/// named `{base}_highlights.json`.
pub fn write_sidecar(video_path: &Path, timestamps: &[u64]) -> io::Result<PathBuf> {
    let sidecar = paths::highlights_path(video_path);
    let body = serde_json::to_string(timestamps)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&sidecar, body)?;
    Ok(sidecar)
}
