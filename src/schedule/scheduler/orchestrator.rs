use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cleanup::{remove_files, CleanupScheduler};
use super::runner::{Interrupt, StageRunner};
use crate::error::ErrorInfo;
use crate::schedule::processors::render::output_path;
use crate::schedule::processors::StageSet;
use crate::schedule::types::{Artifacts, Job, JobStatus, OutputFiles, Stage, TimedSegment};
use crate::storage::job::JobStore;

/// Files a running job owns.
#[derive(Debug, Default)]
struct Workspace {
    /// Downloaded or trimmed audio
    audio: Option<PathBuf>,
    upload: Option<PathBuf>,
    rendered: Vec<PathBuf>,
}

impl Workspace {
    fn all_files(&self) -> Vec<PathBuf> {
        self.audio
            .iter()
            .chain(self.upload.iter())
            .chain(self.rendered.iter())
            .cloned()
            .collect()
    }
}

/// Drives one job through download, transcription, translation and
/// rendering, then writes exactly one terminal state.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    stages: StageSet,
    cleanup: Arc<CleanupScheduler>,
    output_dir: PathBuf,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        stages: StageSet,
        cleanup: Arc<CleanupScheduler>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            stages,
            cleanup,
            output_dir: output_dir.into(),
        }
    }

    pub async fn run(&self, job_id: &str, cancel: CancellationToken) {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Job {} disappeared before it started: {}", job_id, e);
                return;
            }
        };

        let mut workspace = Workspace {
            upload: job.source.upload_path().map(|path| path.to_path_buf()),
            ..Workspace::default()
        };
        let runner = StageRunner::new(job_id, self.store.clone(), cancel);

        match self.drive(&runner, &job, &mut workspace).await {
            Ok(artifacts) => self.complete(&runner, artifacts, workspace).await,
            Err(interrupt) => self.abort(&runner, interrupt, workspace).await,
        }
    }

    async fn drive(&self, runner: &StageRunner, job: &Job, workspace: &mut Workspace) -> Result<Artifacts, Interrupt> {
        let downloader = self.stages.downloader.clone();
        let source = job.source.clone();
        let time_range = job.time_range;
        let audio = runner
            .run(Stage::Download, |ctx| async move {
                downloader.extract(&source, time_range, &ctx).await
            })
            .await?;
        if audio.owned {
            workspace.audio = Some(audio.path.clone());
        }

        let title = audio.title.clone();
        {
            let title = title.clone();
            runner.write(move |job| job.title = Some(title)).await?;
        }

        let transcriber = self.stages.transcriber.clone();
        let audio_path = audio.path.clone();
        let transcript = runner
            .run(Stage::Transcribe, |ctx| async move {
                let segments = transcriber.transcribe(&audio_path, &ctx).await?;
                normalize_transcript(segments)
            })
            .await?;

        let translator = self.stages.translator.clone();
        let source_segments = transcript.clone();
        let translation = runner
            .run(Stage::Translate, |ctx| async move {
                let translated = translator.translate(&source_segments, &ctx).await?;
                align_translation(&source_segments, translated)
            })
            .await?;

        let renderers = self.stages.renderers.clone();
        let output_dir = self.output_dir.clone();
        let segments = translation.clone();
        let time_offset = job.time_offset();
        let job_id = runner.job_id().to_string();
        let rendered = &mut workspace.rendered;
        let files = runner
            .run(Stage::Render, |ctx| async move {
                let mut files = OutputFiles::default();
                let total = renderers.len().max(1);
                for (i, renderer) in renderers.iter().enumerate() {
                    if ctx.is_cancelled() {
                        bail!("rendering interrupted by cancellation");
                    }
                    let target = output_path(&output_dir, renderer.kind(), &title, &job_id);
                    rendered.push(target.clone());
                    let written = renderer.render(&segments, &title, &target, time_offset).await?;
                    if written != target {
                        rendered.push(written.clone());
                    }
                    files.set(renderer.kind(), written);
                    ctx.report((5 + 90 * (i + 1) / total) as u8).await;
                }
                Ok(files)
            })
            .await?;

        runner.checkpoint()?;
        Ok(Artifacts {
            transcript,
            translation,
            files,
        })
    }

    async fn complete(&self, runner: &StageRunner, artifacts: Artifacts, workspace: Workspace) {
        let job_id = runner.job_id().to_string();
        let result = runner
            .finalize(move |job| {
                job.status = JobStatus::Completed;
                job.progress.complete_all();
                job.artifacts = Some(artifacts);
                job.error = None;
                job.message = Some("Processing completed".to_string());
            })
            .await;

        match result {
            Ok(job) if job.status == JobStatus::Completed => {
                info!("Job {} -> {} [{}]", job_id, job.status, job.progress);
                if let Some(upload) = workspace.upload {
                    self.cleanup.schedule(&job_id, vec![upload]);
                }
                if let Some(audio) = &workspace.audio {
                    remove_files(std::slice::from_ref(audio)).await;
                }
            }
            Ok(job) => {
                warn!("Job {} was already {} when it completed", job_id, job.status);
                remove_files(&workspace.all_files()).await;
            }
            Err(e) => {
                warn!("Could not record completion of job {}: {}", job_id, e);
                remove_files(&workspace.all_files()).await;
            }
        }
    }

    async fn abort(&self, runner: &StageRunner, interrupt: Interrupt, workspace: Workspace) {
        let job_id = runner.job_id().to_string();
        // partial files go before the terminal state becomes visible
        remove_files(&workspace.all_files()).await;

        let result = match interrupt {
            Interrupt::Cancelled => {
                runner
                    .finalize(|job| {
                        job.status = JobStatus::Cancelled;
                        job.artifacts = None;
                        job.message = Some("Job cancelled".to_string());
                    })
                    .await
            }
            Interrupt::Failed { stage, message } => {
                runner
                    .finalize(move |job| {
                        job.status = JobStatus::Failed;
                        job.artifacts = None;
                        job.message = Some(format!("{} failed", stage.spec().message));
                        job.error = Some(ErrorInfo::stage_failure(stage, message));
                    })
                    .await
            }
            Interrupt::Lost(e) => {
                warn!("Job {} stopped tracking: {}", job_id, e);
                return;
            }
        };

        match result {
            Ok(job) if job.status == JobStatus::Cancelled => {
                warn!("Job {} -> {} [{}]", job_id, job.status, job.progress)
            }
            Ok(job) => error!("Job {} -> {} [{}]", job_id, job.status, job.progress),
            Err(e) => warn!("Could not finalize job {}: {}", job_id, e),
        }
    }
}

/// Orders segments by start time and drops the ones with no text or no
/// duration.
pub fn normalize_transcript(segments: Vec<TimedSegment>) -> Result<Vec<TimedSegment>> {
    let mut kept: Vec<TimedSegment> = segments
        .into_iter()
        .filter(|s| s.start.is_finite() && s.end.is_finite() && s.end > s.start)
        .map(|s| TimedSegment::new(s.start, s.end, s.text.trim()))
        .filter(|s| !s.text.is_empty())
        .collect();
    kept.sort_by(|a, b| a.start.total_cmp(&b.start));

    if kept.is_empty() {
        bail!("transcription produced no usable segments");
    }
    Ok(kept)
}

/// Pairs each translated line with the timing of its transcript segment.
pub fn align_translation(transcript: &[TimedSegment], translated: Vec<TimedSegment>) -> Result<Vec<TimedSegment>> {
    if translated.len() != transcript.len() {
        bail!(
            "translation returned {} segments for {} transcript segments",
            translated.len(),
            transcript.len()
        );
    }
    Ok(transcript
        .iter()
        .zip(translated)
        .map(|(source, target)| TimedSegment::new(source.start, source.end, target.text.trim()))
        .collect())
}
