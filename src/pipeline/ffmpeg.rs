//! External transcoding tool invocations.
//!
//! Everything that re-encodes, muxes or probes media goes through the
//! [`Transcoder`] trait; `FfmpegTranscoder` implements it by shelling out to
//! `ffmpeg`/`ffprobe`. Video streams are always copied, never re-encoded.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use once_cell::sync::OnceCell;

use crate::backend::AudioSourceSpec;
use crate::errors::TranscodeError;

/// Audio/video post-capture operations, each mapping to one tool run.
pub trait Transcoder: Send + Sync {
    /// Encode a raw 16-bit little-endian PCM file to an AAC stream.
    fn encode_pcm_to_aac(
        &self,
        pcm: &Path,
        spec: &AudioSourceSpec,
        out: &Path,
    ) -> Result<(), TranscodeError>;

    /// Mux one or two encoded audio streams against a finalized video
    /// container. Video is stream-copied; two audio inputs are merged into
    /// a single stereo track.
    fn mux(&self, video: &Path, audio: &[PathBuf], out: &Path) -> Result<(), TranscodeError>;

    /// Container duration in seconds.
    fn probe_duration(&self, file: &Path) -> Result<f64, TranscodeError>;

    /// Lossless trim (stream copy) from `start_secs` to `end_secs`.
    fn trim(
        &self,
        input: &Path,
        start_secs: f64,
        end_secs: f64,
        out: &Path,
    ) -> Result<(), TranscodeError>;

    /// Extract a single representative frame as a PNG.
    fn thumbnail(&self, video: &Path, at_secs: f64, out: &Path) -> Result<(), TranscodeError>;

    /// Lossless clip extraction of `length_secs` starting at `start_secs`.
    fn extract_clip(
        &self,
        video: &Path,
        start_secs: f64,
        length_secs: f64,
        out: &Path,
    ) -> Result<(), TranscodeError>;

    /// Stream-copy concatenation of clips into a single file.
    fn concat(&self, clips: &[PathBuf], out: &Path) -> Result<(), TranscodeError>;
}

static FFMPEG_AVAILABLE: OnceCell<bool> = OnceCell::new();

/// Checks once per process that ffmpeg is on PATH.
pub fn check_ffmpeg() -> Result<(), TranscodeError> {
    let available = *FFMPEG_AVAILABLE.get_or_init(|| {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    });
    if available {
        Ok(())
    } else {
        Err(TranscodeError::ToolNotFound)
    }
}

fn run(program: &str, args: &[String]) -> Result<Output, TranscodeError> {
    tracing::debug!(target: "pipeline", "{} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| TranscodeError::Io(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        tracing::error!(target: "pipeline", "{} failed: {}", program, stderr);
        return Err(TranscodeError::ProcessFailed {
            exit_code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }
    Ok(output)
}

fn arg_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Result<Self, TranscodeError> {
        check_ffmpeg()?;
        Ok(Self)
    }
}

impl Transcoder for FfmpegTranscoder {
    fn encode_pcm_to_aac(
        &self,
        pcm: &Path,
        spec: &AudioSourceSpec,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            spec.sample_rate.to_string(),
            "-ac".to_string(),
            spec.channels.to_string(),
            "-i".to_string(),
            arg_path(pcm),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            arg_path(out),
        ];
        run("ffmpeg", &args).map(|_| ())
    }

    fn mux(&self, video: &Path, audio: &[PathBuf], out: &Path) -> Result<(), TranscodeError> {
        let mut args = vec!["-y".to_string(), "-i".to_string(), arg_path(video)];
        for a in audio {
            args.push("-i".to_string());
            args.push(arg_path(a));
        }

        match audio.len() {
            0 => {
                return Err(TranscodeError::Io(
                    "mux requires at least one audio input".to_string(),
                ))
            }
            1 => {
                args.extend([
                    "-map".to_string(),
                    "0:v".to_string(),
                    "-map".to_string(),
                    "1:a".to_string(),
                    "-c:v".to_string(),
                    "copy".to_string(),
                    "-c:a".to_string(),
                    "copy".to_string(),
                ]);
            }
            _ => {
                args.extend([
                    "-filter_complex".to_string(),
                    "[1:a][2:a]amerge=inputs=2[aout]".to_string(),
                    "-map".to_string(),
                    "0:v".to_string(),
                    "-map".to_string(),
                    "[aout]".to_string(),
                    "-c:v".to_string(),
                    "copy".to_string(),
                    "-c:a".to_string(),
                    "aac".to_string(),
                    "-ac".to_string(),
                    "2".to_string(),
                ]);
            }
        }

        args.extend([
            "-shortest".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            arg_path(out),
        ]);
        run("ffmpeg", &args).map(|_| ())
    }

    fn probe_duration(&self, file: &Path) -> Result<f64, TranscodeError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            arg_path(file),
        ];
        let output = run("ffprobe", &args)?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|_| TranscodeError::BadProbeOutput(text.trim().to_string()))
    }

    fn trim(
        &self,
        input: &Path,
        start_secs: f64,
        end_secs: f64,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            arg_path(input),
            "-ss".to_string(),
            format!("{start_secs:.3}"),
            "-to".to_string(),
            format!("{end_secs:.3}"),
            "-c".to_string(),
            "copy".to_string(),
            arg_path(out),
        ];
        run("ffmpeg", &args).map(|_| ())
    }

    fn thumbnail(&self, video: &Path, at_secs: f64, out: &Path) -> Result<(), TranscodeError> {
        let args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format!("{at_secs:.3}"),
            "-i".to_string(),
            arg_path(video),
            "-vframes".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            "scale=320:-1".to_string(),
            arg_path(out),
        ];
        run("ffmpeg", &args).map(|_| ())
    }

    fn extract_clip(
        &self,
        video: &Path,
        start_secs: f64,
        length_secs: f64,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        let args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format!("{start_secs:.3}"),
            "-i".to_string(),
            arg_path(video),
            "-t".to_string(),
            format!("{length_secs:.3}"),
            "-c".to_string(),
            "copy".to_string(),
            arg_path(out),
        ];
        run("ffmpeg", &args).map(|_| ())
    }

    fn concat(&self, clips: &[PathBuf], out: &Path) -> Result<(), TranscodeError> {
        if clips.is_empty() {
            return Err(TranscodeError::Io("concat requires clips".to_string()));
        }
        let list_path = out.with_extension("concat.txt");
        let mut list = String::new();
        for clip in clips {
            // concat demuxer list format; single quotes escaped per ffmpeg rules.
            let escaped = arg_path(clip).replace('\'', "'\\''");
            list.push_str(&format!("file '{escaped}'\n"));
        }
        std::fs::write(&list_path, list).map_err(|e| TranscodeError::Io(e.to_string()))?;

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            arg_path(&list_path),
            "-c".to_string(),
            "copy".to_string(),
            arg_path(out),
        ];
        let result = run("ffmpeg", &args).map(|_| ());
        if let Err(e) = std::fs::remove_file(&list_path) {
            tracing::debug!(target: "pipeline", "concat list cleanup failed: {}", e);
        }
        result
    }
}
