//! Highlight clip extraction and reel concatenation.
//!
//! Per highlight timestamp a clip of the configured length is cut, centered
//! on the timestamp and clamped so it never starts before zero. Clip names
//! are deterministic and sequential so the gallery can enumerate them.

use std::path::{Path, PathBuf};

use crate::paths;
use crate::pipeline::ffmpeg::Transcoder;

#[derive(Debug, Clone, Default)]
pub struct ClipJobResult {
    pub clips: Vec<PathBuf>,
    pub failures: u32,
}

/// Clip window `(start_secs, length_secs)` for a highlight at `offset_ms`.
fn clip_window(offset_ms: u64, length_secs: u32) -> (f64, f64) {
    let length = f64::from(length_secs);
    let center = offset_ms as f64 / 1000.0;
    let start = (center - length / 2.0).max(0.0);
    (start, length)
}

/// Extracts one clip per highlight. Clips are cut from `video` (the final,
/// possibly muxed file) but named after `base` like every other derived
/// artifact. A failed clip is logged and counted; the remaining clips still
/// run.
pub fn extract_clips(
    transcoder: &dyn Transcoder,
    video: &Path,
    base: &Path,
    highlights: &[u64],
    clip_length_secs: u32,
) -> ClipJobResult {
    let mut result = ClipJobResult::default();
    for (i, &offset_ms) in highlights.iter().enumerate() {
        let (start, length) = clip_window(offset_ms, clip_length_secs);
        let out = paths::clip_path(base, i + 1);
        match transcoder.extract_clip(video, start, length, &out) {
            Ok(()) => {
                tracing::info!(
                    target: "pipeline",
                    "clip {} extracted at {}ms -> {:?}",
                    i + 1,
                    offset_ms,
                    out
                );
                result.clips.push(out);
            }
            Err(e) => {
                tracing::warn!(target: "pipeline", "clip {} failed: {}", i + 1, e);
                result.failures += 1;
            }
        }
    }
    result
}

/// Concatenates successfully extracted clips into `{base}_reel.mp4`.
pub fn concat_reel(
    transcoder: &dyn Transcoder,
    base: &Path,
    clips: &[PathBuf],
) -> Result<PathBuf, crate::errors::TranscodeError> {
    let reel = paths::reel_path(base);
    transcoder.concat(clips, &reel)?;
    Ok(reel)
}
