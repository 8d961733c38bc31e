//! Post-processing pipeline: everything that happens to a recording after
//! the session released its hardware.
//!
//! The mux stage gates the rest (they operate on the muxed file); after it,
//! every stage is independent and best-effort: a failure is recorded in the
//! report and never rolls back earlier artifacts or aborts unrelated stages.
//! The pipeline runs in the background and may overlap the next session.

pub mod backup;
pub mod cleanup;
pub mod clips;
pub mod ffmpeg;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::AudioSourceSpec;
use crate::config::RecordingConfig;
use crate::highlights;
use crate::paths;
use crate::session::coordinator::SessionEvent;
use backup::BackupProvider;
use ffmpeg::Transcoder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Mux,
    Trim,
    Thumbnail,
    Highlights,
    Clips,
    Reel,
    Backup,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum StageStatus {
    Succeeded,
    Failed(String),
    Skipped(String),
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub session_id: String,
    /// The file consumers should play. Stays on the pre-mux video when the
    /// mux was skipped or failed.
    pub final_video: PathBuf,
    pub stages: Vec<StageResult>,
}

impl PipelineReport {
    fn new(session_id: String, final_video: PathBuf) -> Self {
        Self {
            session_id,
            final_video,
            stages: Vec::new(),
        }
    }

    fn push(&mut self, stage: Stage, status: StageStatus) {
        self.stages.push(StageResult { stage, status });
    }

    pub fn status_of(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.status)
    }

    pub fn mux_failed(&self) -> Option<&str> {
        match self.status_of(Stage::Mux) {
            Some(StageStatus::Failed(reason)) => Some(reason),
            _ => None,
        }
    }
}

/// Everything the pipeline needs from a finished session.
#[derive(Clone, Debug)]
pub struct PipelineInput {
    pub session_id: String,
    pub config: RecordingConfig,
    /// The video-only container written during capture. Also the naming
    /// base for every derived artifact.
    pub video_path: PathBuf,
    /// Whether the container writer ever started. When false the video
    /// file holds no usable stream and the pipeline does nothing.
    pub container_finalized: bool,
    pub mic_pcm: Option<(PathBuf, AudioSourceSpec)>,
    pub internal_pcm: Option<(PathBuf, AudioSourceSpec)>,
    pub highlights: Vec<u64>,
}

#[derive(Clone)]
pub struct PostProcessor {
    transcoder: Arc<dyn Transcoder>,
    backup: Option<Arc<dyn BackupProvider>>,
    events: broadcast::Sender<SessionEvent>,
}

struct MediaOutcome {
    report: PipelineReport,
    final_video: PathBuf,
    thumbnail: Option<PathBuf>,
    duration_secs: Option<f64>,
}

impl PostProcessor {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        backup: Option<Arc<dyn BackupProvider>>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transcoder,
            backup,
            events,
        }
    }

    /// Runs all stages and returns the report. Emits `MuxFailed` and
    /// `PipelineFinished` events along the way.
    pub async fn run(&self, input: PipelineInput) -> PipelineReport {
        let this = self.clone();
        let media_input = input.clone();
        let outcome = match tokio::task::spawn_blocking(move || this.run_media_stages(media_input))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(target: "pipeline", "media stage task panicked: {}", e);
                let mut report =
                    PipelineReport::new(input.session_id.clone(), input.video_path.clone());
                report.push(Stage::Mux, StageStatus::Failed("pipeline task failed".into()));
                return report;
            }
        };

        let MediaOutcome {
            mut report,
            final_video,
            thumbnail,
            duration_secs: _,
        } = outcome;

        if let Some(reason) = report.mux_failed() {
            let _ = self.events.send(SessionEvent::MuxFailed {
                session_id: input.session_id.clone(),
                error: reason.to_string(),
            });
        }

        let mux_usable = !matches!(report.status_of(Stage::Mux), Some(StageStatus::Failed(_)))
            && input.container_finalized;

        // Clip extraction and backup are independent jobs; run them
        // concurrently with each other.
        let clip_task = {
            let run_clips = mux_usable
                && input.config.auto_highlight_detection
                && input.config.auto_highlight_clip_extraction
                && !input.highlights.is_empty();
            let this = self.clone();
            let final_video = final_video.clone();
            let base = input.video_path.clone();
            let highlights = input.highlights.clone();
            let clip_len = input.config.highlight_clip_length_seconds;
            let reel_enabled = input.config.auto_highlight_reel_generation;
            async move {
                if !run_clips {
                    return vec![
                        (Stage::Clips, StageStatus::Skipped("disabled".into())),
                        (Stage::Reel, StageStatus::Skipped("disabled".into())),
                    ];
                }
                let result = tokio::task::spawn_blocking(move || {
                    let job = clips::extract_clips(
                        this.transcoder.as_ref(),
                        &final_video,
                        &base,
                        &highlights,
                        clip_len,
                    );
                    let mut statuses = Vec::new();
                    statuses.push((
                        Stage::Clips,
                        if job.clips.is_empty() {
                            StageStatus::Failed(format!("{} clip(s) failed", job.failures))
                        } else if job.failures > 0 {
                            StageStatus::Failed(format!(
                                "{} of {} clip(s) failed",
                                job.failures,
                                job.failures as usize + job.clips.len()
                            ))
                        } else {
                            StageStatus::Succeeded
                        },
                    ));
                    if reel_enabled && !job.clips.is_empty() {
                        match clips::concat_reel(this.transcoder.as_ref(), &base, &job.clips) {
                            Ok(_) => statuses.push((Stage::Reel, StageStatus::Succeeded)),
                            Err(e) => {
                                statuses.push((Stage::Reel, StageStatus::Failed(e.to_string())))
                            }
                        }
                    } else {
                        statuses
                            .push((Stage::Reel, StageStatus::Skipped("disabled".into())));
                    }
                    statuses
                })
                .await;
                result.unwrap_or_else(|_| {
                    vec![(Stage::Clips, StageStatus::Failed("clip task failed".into()))]
                })
            }
        };

        let backup_task = {
            let enabled = mux_usable && input.config.cloud_backup_enabled;
            let provider = self.backup.clone();
            let final_video = final_video.clone();
            let thumbnail = thumbnail.clone();
            async move {
                if !enabled {
                    return (Stage::Backup, StageStatus::Skipped("disabled".into()));
                }
                let Some(provider) = provider else {
                    return (
                        Stage::Backup,
                        StageStatus::Skipped("no provider registered".into()),
                    );
                };
                match backup::dispatch(
                    provider.as_ref(),
                    &final_video,
                    thumbnail.as_deref(),
                    backup::DEFAULT_MAX_ATTEMPTS,
                    backup::DEFAULT_BASE_DELAY,
                )
                .await
                {
                    Ok(()) => (Stage::Backup, StageStatus::Succeeded),
                    Err(e) => (Stage::Backup, StageStatus::Failed(e.to_string())),
                }
            }
        };

        let (clip_statuses, backup_status) = tokio::join!(clip_task, backup_task);
        for (stage, status) in clip_statuses {
            report.push(stage, status);
        }
        report.push(backup_status.0, backup_status.1);

        report.final_video = final_video;
        self.persist_report(&input.video_path, &report);
        let _ = self.events.send(SessionEvent::PipelineFinished {
            session_id: report.session_id.clone(),
            report: report.clone(),
        });
        report
    }

    /// Mux, trim, thumbnail and highlight stages; sequential because they
    /// operate on the same final file.
    fn run_media_stages(&self, input: PipelineInput) -> MediaOutcome {
        let base = input.video_path.clone();
        let mut report = PipelineReport::new(input.session_id.clone(), base.clone());

        if !input.container_finalized {
            let reason = "container never started".to_string();
            for stage in [Stage::Mux, Stage::Trim, Stage::Thumbnail, Stage::Highlights] {
                report.push(stage, StageStatus::Skipped(reason.clone()));
            }
            return MediaOutcome {
                report,
                final_video: base,
                thumbnail: None,
                duration_secs: None,
            };
        }

        let mut final_video = base.clone();
        let mux_status = self.mux_stage(&input, &mut final_video);
        let mux_failed = matches!(mux_status, StageStatus::Failed(_));
        report.push(Stage::Mux, mux_status);

        if mux_failed {
            let reason = "mux failed".to_string();
            for stage in [Stage::Trim, Stage::Thumbnail, Stage::Highlights] {
                report.push(stage, StageStatus::Skipped(reason.clone()));
            }
            return MediaOutcome {
                report,
                final_video: base,
                thumbnail: None,
                duration_secs: None,
            };
        }

        let mut duration = self.transcoder.probe_duration(&final_video).ok();

        let trim_status = self.trim_stage(&input, &base, &final_video, &mut duration);
        report.push(Stage::Trim, trim_status);

        let (thumbnail_status, thumbnail) = self.thumbnail_stage(&base, &final_video, duration);
        report.push(Stage::Thumbnail, thumbnail_status);

        let highlight_status = if input.config.auto_highlight_detection {
            if input.highlights.is_empty() {
                StageStatus::Skipped("no highlights detected".into())
            } else {
                match highlights::write_sidecar(&base, &input.highlights) {
                    Ok(sidecar) => {
                        tracing::info!(target: "pipeline", "highlights persisted to {:?}", sidecar);
                        StageStatus::Succeeded
                    }
                    Err(e) => StageStatus::Failed(e.to_string()),
                }
            }
        } else {
            StageStatus::Skipped("disabled".into())
        };
        report.push(Stage::Highlights, highlight_status);

        MediaOutcome {
            report,
            final_video,
            thumbnail,
            duration_secs: duration,
        }
    }

    fn mux_stage(&self, input: &PipelineInput, final_video: &mut PathBuf) -> StageStatus {
        let mut audio_inputs: Vec<(&PathBuf, &AudioSourceSpec)> = Vec::new();
        for pcm in [&input.mic_pcm, &input.internal_pcm].into_iter().flatten() {
            // A unit that failed mid-session may have left a short or empty
            // sink; only usable audio participates in the mux.
            let usable = std::fs::metadata(&pcm.0).map(|m| m.len() > 0).unwrap_or(false);
            if usable {
                audio_inputs.push((&pcm.0, &pcm.1));
            } else {
                // An empty sink would otherwise sit under its in-progress
                // extension forever, out of the retention sweep's reach.
                tracing::warn!(target: "pipeline", "discarding unusable audio sink {:?}", pcm.0);
                if let Err(e) = std::fs::remove_file(&pcm.0) {
                    tracing::debug!(target: "pipeline", "sink cleanup failed: {}", e);
                }
            }
        }

        if audio_inputs.is_empty() {
            return StageStatus::Skipped("no audio captured".into());
        }

        let mut encoded = Vec::new();
        for (pcm, spec) in &audio_inputs {
            let out = paths::encoded_audio_path(pcm);
            if let Err(e) = self.transcoder.encode_pcm_to_aac(pcm, spec, &out) {
                tracing::error!(target: "pipeline", "audio encode failed for {:?}: {}", pcm, e);
                return StageStatus::Failed(format!("audio encode failed: {e}"));
            }
            encoded.push(out);
        }

        let muxed = paths::muxed_path(&input.video_path);
        if let Err(e) = self.transcoder.mux(&input.video_path, &encoded, &muxed) {
            tracing::error!(target: "pipeline", "mux failed: {}", e);
            return StageStatus::Failed(format!("mux failed: {e}"));
        }
        *final_video = muxed;

        // Intermediates are expendable once the muxed file exists; cleanup
        // failures never fail the stage.
        for intermediate in audio_inputs
            .iter()
            .map(|(pcm, _)| (*pcm).clone())
            .chain(encoded)
        {
            if let Err(e) = std::fs::remove_file(&intermediate) {
                tracing::debug!(target: "pipeline", "cleanup of {:?} failed: {}", intermediate, e);
            }
        }
        StageStatus::Succeeded
    }

    fn trim_stage(
        &self,
        input: &PipelineInput,
        base: &Path,
        final_video: &Path,
        duration: &mut Option<f64>,
    ) -> StageStatus {
        let start = f64::from(input.config.auto_trim_start_seconds);
        let end = f64::from(input.config.auto_trim_end_seconds);
        if !input.config.auto_trim_enabled || (start <= 0.0 && end <= 0.0) {
            return StageStatus::Skipped("disabled".into());
        }

        let Some(total) = *duration else {
            return StageStatus::Failed("duration probe failed".into());
        };
        let trim_end = (total - end).max(start + 1.0);
        let trimmed = paths::trimmed_path(base);

        match self.transcoder.trim(final_video, start, trim_end, &trimmed) {
            Ok(()) => match std::fs::rename(&trimmed, final_video) {
                Ok(()) => {
                    *duration = Some(trim_end - start);
                    StageStatus::Succeeded
                }
                Err(e) => {
                    let _ = std::fs::remove_file(&trimmed);
                    StageStatus::Failed(format!("replace failed: {e}"))
                }
            },
            Err(e) => {
                tracing::warn!(target: "pipeline", "auto-trim failed, keeping untrimmed: {}", e);
                StageStatus::Failed(e.to_string())
            }
        }
    }

    fn thumbnail_stage(
        &self,
        base: &Path,
        final_video: &Path,
        duration: Option<f64>,
    ) -> (StageStatus, Option<PathBuf>) {
        let thumb = paths::thumbnail_path(base);
        // Pseudo-random timestamp in the first third avoids always grabbing
        // a black opening frame.
        let at = match duration {
            Some(d) if d > 1.0 => rand::thread_rng().gen_range(0.0..d / 3.0),
            _ => 0.0,
        };
        match self.transcoder.thumbnail(final_video, at, &thumb) {
            Ok(()) => (StageStatus::Succeeded, Some(thumb)),
            Err(e) => {
                tracing::warn!(target: "pipeline", "thumbnail failed: {}", e);
                (StageStatus::Failed(e.to_string()), None)
            }
        }
    }

    fn persist_report(&self, base: &Path, report: &PipelineReport) {
        let path = paths::report_path(base);
        match serde_json::to_string_pretty(report) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&path, body) {
                    tracing::debug!(target: "pipeline", "report write failed: {}", e);
                }
            }
            Err(e) => tracing::debug!(target: "pipeline", "report serialize failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TranscodeError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubTranscoder {
        duration: f64,
        fail_thumbnail: bool,
        trim_calls: Mutex<Vec<(f64, f64)>>,
    }

    impl Transcoder for StubTranscoder {
        fn encode_pcm_to_aac(
            &self,
            _pcm: &Path,
            _spec: &AudioSourceSpec,
            out: &Path,
        ) -> Result<(), TranscodeError> {
            std::fs::write(out, b"aac").map_err(|e| TranscodeError::Io(e.to_string()))
        }

        fn mux(
            &self,
            _video: &Path,
            _audio: &[PathBuf],
            out: &Path,
        ) -> Result<(), TranscodeError> {
            std::fs::write(out, b"muxed").map_err(|e| TranscodeError::Io(e.to_string()))
        }

        fn probe_duration(&self, _file: &Path) -> Result<f64, TranscodeError> {
            Ok(self.duration)
        }

        fn trim(
            &self,
            _input: &Path,
            start: f64,
            end: f64,
            out: &Path,
        ) -> Result<(), TranscodeError> {
            self.trim_calls.lock().unwrap().push((start, end));
            std::fs::write(out, b"trimmed").map_err(|e| TranscodeError::Io(e.to_string()))
        }

        fn thumbnail(&self, _video: &Path, _at: f64, out: &Path) -> Result<(), TranscodeError> {
            if self.fail_thumbnail {
                return Err(TranscodeError::ProcessFailed {
                    exit_code: 1,
                    stderr: "no video stream".to_string(),
                });
            }
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

    fn input_with_audio(dir: &Path, config: RecordingConfig) -> PipelineInput {
        let video = dir.join("Recording_2026-01-01_09-00-00.mp4");
        std::fs::write(&video, b"video").unwrap();
        let pcm = paths::mic_pcm_path(&video);
        std::fs::write(&pcm, b"pcm-bytes").unwrap();
        PipelineInput {
            session_id: "s1".to_string(),
            config,
            video_path: video,
            container_finalized: true,
            mic_pcm: Some((pcm, AudioSourceSpec::microphone(44_100, 1))),
            internal_pcm: None,
            highlights: Vec::new(),
        }
    }

    fn processor(transcoder: Arc<StubTranscoder>) -> PostProcessor {
        let (events, _) = broadcast::channel(16);
        PostProcessor::new(transcoder, None, events)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trim_bounds_and_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 60.0,
            ..Default::default()
        });
        let config = RecordingConfig {
            auto_trim_enabled: true,
            auto_trim_start_seconds: 2,
            auto_trim_end_seconds: 5,
            ..Default::default()
        };
        let input = input_with_audio(dir.path(), config);
        let base = input.video_path.clone();

        let report = processor(transcoder.clone()).run(input).await;

        assert_eq!(report.status_of(Stage::Trim), Some(&StageStatus::Succeeded));
        // trim_end = max(60 - 5, 2 + 1)
        assert_eq!(*transcoder.trim_calls.lock().unwrap(), vec![(2.0, 55.0)]);
        // The trimmed file replaced the muxed final in place.
        assert_eq!(report.final_video, paths::muxed_path(&base));
        assert_eq!(std::fs::read(&report.final_video).unwrap(), b"trimmed");
        assert!(!paths::trimmed_path(&base).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_recording_still_trims_at_least_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 4.0,
            ..Default::default()
        });
        let config = RecordingConfig {
            auto_trim_enabled: true,
            auto_trim_start_seconds: 3,
            auto_trim_end_seconds: 3,
            ..Default::default()
        };
        let input = input_with_audio(dir.path(), config);

        processor(transcoder.clone()).run(input).await;

        // duration - end would be 1.0, below start; floor kicks in at start + 1.
        assert_eq!(*transcoder.trim_calls.lock().unwrap(), vec![(3.0, 4.0)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn thumbnail_failure_does_not_block_highlights() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 30.0,
            fail_thumbnail: true,
            ..Default::default()
        });
        let config = RecordingConfig {
            auto_highlight_detection: true,
            ..Default::default()
        };
        let mut input = input_with_audio(dir.path(), config);
        input.highlights = vec![4000, 9000];
        let base = input.video_path.clone();

        let report = processor(transcoder).run(input).await;

        assert!(matches!(
            report.status_of(Stage::Thumbnail),
            Some(StageStatus::Failed(_))
        ));
        assert_eq!(
            report.status_of(Stage::Highlights),
            Some(&StageStatus::Succeeded)
        );
        assert!(paths::highlights_path(&base).exists());
        assert!(paths::report_path(&base).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_audio_sink_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 30.0,
            ..Default::default()
        });
        let mut input = input_with_audio(dir.path(), RecordingConfig::default());
        let pcm = input.mic_pcm.as_ref().map(|(p, _)| p.clone()).unwrap();
        std::fs::write(&pcm, b"").unwrap();
        input.internal_pcm = None;

        let report = processor(transcoder).run(input).await;

        assert!(matches!(
            report.status_of(Stage::Mux),
            Some(StageStatus::Skipped(_))
        ));
        // The dead sink is removed instead of lingering as an
        // in-progress file the retention sweep must skip.
        assert!(!pcm.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unstarted_container_skips_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 30.0,
            ..Default::default()
        });
        let mut input = input_with_audio(dir.path(), RecordingConfig::default());
        input.container_finalized = false;
        let base = input.video_path.clone();

        let report = processor(transcoder).run(input).await;

        assert_eq!(report.final_video, base);
        for result in &report.stages {
            assert!(
                matches!(result.status, StageStatus::Skipped(_)),
                "{:?} should be skipped",
                result.stage
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clips_and_reel_extracted_for_highlights() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(StubTranscoder {
            duration: 120.0,
            ..Default::default()
        });
        let config = RecordingConfig {
            auto_highlight_detection: true,
            auto_highlight_clip_extraction: true,
            auto_highlight_reel_generation: true,
            ..Default::default()
        };
        let mut input = input_with_audio(dir.path(), config);
        input.highlights = vec![10_000, 40_000];
        let base = input.video_path.clone();

        let report = processor(transcoder).run(input).await;

        assert_eq!(report.status_of(Stage::Clips), Some(&StageStatus::Succeeded));
        assert_eq!(report.status_of(Stage::Reel), Some(&StageStatus::Succeeded));
        assert!(paths::clip_path(&base, 1).exists());
        assert!(paths::clip_path(&base, 2).exists());
        assert!(paths::reel_path(&base).exists());
    }
}
