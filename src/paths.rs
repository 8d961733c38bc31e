//! Output file naming contract.
//!
//! Primary recordings are named `{prefix}_{yyyy-MM-dd_HH-mm-ss}.mp4`. Every
//! derived artifact (muxed, trimmed, thumbnail, highlight sidecar, clips,
//! reel) is a deterministic function of the base name so downstream consumers
//! can locate them without a side-channel index.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// File extensions that mark a recording as still being written.
/// The retention sweep must never delete these.
pub const IN_PROGRESS_EXTENSIONS: [&str; 3] = ["tmp", "part", "lock"];

/// Default recordings directory, following the platform video dir with an
/// XDG-style data fallback.
pub fn default_recordings_dir() -> PathBuf {
    if let Some(videos) = dirs::video_dir() {
        return videos.join("reelcap");
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelcap")
        .join("recordings")
}

pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn timestamped_basename(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", prefix, at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Allocates a collision-free output path for a new recording.
///
/// Two sessions started within the same second get distinct names via a
/// numeric suffix.
pub fn allocate_output_path(dir: &Path, prefix: &str) -> io::Result<PathBuf> {
    ensure_dir(dir)?;
    let base = timestamped_basename(prefix, Local::now());
    let candidate = dir.join(format!("{base}.mp4"));
    if !candidate.exists() {
        return Ok(candidate);
    }
    for n in 2..1000 {
        let candidate = dir.join(format!("{base}_{n}.mp4"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "could not allocate a unique recording name",
    ))
}

fn with_derived_name(video: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    video.with_file_name(format!("{stem}{suffix}.{ext}"))
}

/// `{base}_with_audio.mp4`, output of the audio/video mux step.
pub fn muxed_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_with_audio", "mp4")
}

/// `{base}_trimmed.mp4`, temporary target of the auto-trim step before the
/// atomic replace of the final file.
pub fn trimmed_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_trimmed", "mp4")
}

/// `{base}_thumbnail.png`
pub fn thumbnail_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_thumbnail", "png")
}

/// `{base}_highlights.json`
pub fn highlights_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_highlights", "json")
}

/// `{base}_clip_NN.mp4`, 1-based and zero-padded so clips sort in order.
pub fn clip_path(video: &Path, index: usize) -> PathBuf {
    with_derived_name(video, &format!("_clip_{index:02}"), "mp4")
}

/// `{base}_reel.mp4`, concatenation of extracted highlight clips.
pub fn reel_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_reel", "mp4")
}

/// `{base}_report.json`, post-processing pipeline report.
pub fn report_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_report", "json")
}

/// Raw PCM sink for the microphone capture unit. The `tmp` extension marks
/// it as in-progress for the retention sweep.
pub fn mic_pcm_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_mic", "pcm.tmp")
}

/// Raw PCM sink for the internal playback capture unit.
pub fn internal_pcm_path(video: &Path) -> PathBuf {
    with_derived_name(video, "_internal", "pcm.tmp")
}

/// Encoded AAC elementary stream derived from a PCM sink path.
pub fn encoded_audio_path(pcm: &Path) -> PathBuf {
    pcm.with_extension("m4a")
}

/// True when the file carries an in-progress marker extension.
pub fn is_in_progress(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IN_PROGRESS_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn basename_follows_contract() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 30).unwrap();
        assert_eq!(
            timestamped_basename("Recording", at),
            "Recording_2026-03-07_09-05-30"
        );
    }

    #[test]
    fn derived_names_are_deterministic() {
        let video = Path::new("/tmp/rec/Recording_2026-03-07_09-05-30.mp4");
        assert_eq!(
            muxed_path(video).file_name().unwrap(),
            "Recording_2026-03-07_09-05-30_with_audio.mp4"
        );
        assert_eq!(
            thumbnail_path(video).file_name().unwrap(),
            "Recording_2026-03-07_09-05-30_thumbnail.png"
        );
        assert_eq!(
            highlights_path(video).file_name().unwrap(),
            "Recording_2026-03-07_09-05-30_highlights.json"
        );
        assert_eq!(
            clip_path(video, 3).file_name().unwrap(),
            "Recording_2026-03-07_09-05-30_clip_03.mp4"
        );
        assert_eq!(
            reel_path(video).file_name().unwrap(),
            "Recording_2026-03-07_09-05-30_reel.mp4"
        );
    }

    #[test]
    fn allocate_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = allocate_output_path(dir.path(), "Recording").unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = allocate_output_path(dir.path(), "Recording").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn in_progress_markers() {
        assert!(is_in_progress(Path::new("/a/b.pcm.tmp")));
        assert!(is_in_progress(Path::new("/a/b.part")));
        assert!(is_in_progress(Path::new("/a/b.lock")));
        assert!(!is_in_progress(Path::new("/a/b.mp4")));
    }
}
