pub mod download;
pub mod render;
pub mod transcribe;
pub mod translate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::schedule::types::{ArtifactKind, JobSource, Stage, TimeRange, TimedSegment};
use crate::storage::job::JobStore;

pub use download::YtDlpDownloader;
pub use render::{MarkdownRenderer, PdfRenderer, SrtRenderer};
pub use transcribe::{HttpTranscriber, SimulatedTranscriber};
pub use translate::ChatTranslator;

/// Audio ready for transcription.
#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub path: PathBuf,
    pub title: String,
    /// Whether `path` is a scratch file created for the job. An upload that
    /// was not trimmed is handed through as-is and is not owned.
    pub owned: bool,
}

/// Per-call context handed to a collaborator: the job it works for, a way to
/// report incremental progress and the job's cancellation token.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: String,
    pub stage: Stage,
    cancel: CancellationToken,
    store: Option<Arc<dyn JobStore>>,
}

impl StageContext {
    pub fn new(job_id: impl Into<String>, stage: Stage, cancel: CancellationToken, store: Arc<dyn JobStore>) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            cancel,
            store: Some(store),
        }
    }

    /// A context that reports nowhere, for calls made outside a job.
    pub fn detached(stage: Stage) -> Self {
        Self {
            job_id: String::new(),
            stage,
            cancel: CancellationToken::new(),
            store: None,
        }
    }

    /// Same context, reporting as `job_id`.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raises this stage's progress. Capped at 99: only the orchestrator
    /// marks a stage as done.
    pub async fn report(&self, percent: u8) {
        let Some(store) = &self.store else {
            return;
        };
        let stage = self.stage;
        let percent = percent.min(99);
        if let Err(e) = store
            .update(&self.job_id, Box::new(move |job| job.progress.raise(stage, percent)))
            .await
        {
            debug!("Dropping progress report for job {}: {}", self.job_id, e);
        }
    }
}

#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Produces a local audio file for `source`, trimmed to `time_range`.
    async fn extract(
        &self,
        source: &JobSource,
        time_range: Option<TimeRange>,
        ctx: &StageContext,
    ) -> Result<ExtractedAudio>;

    /// Checks that a remote source is reachable and returns its title.
    async fn lookup_title(&self, url: &str) -> Result<String>;
}

#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    async fn transcribe(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<TimedSegment>>;
}

#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Returns one translated segment per input segment, in order.
    async fn translate(&self, segments: &[TimedSegment], ctx: &StageContext) -> Result<Vec<TimedSegment>>;
}

#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    fn kind(&self) -> ArtifactKind;

    async fn render(
        &self,
        segments: &[TimedSegment],
        title: &str,
        output_path: &Path,
        time_offset: f64,
    ) -> Result<PathBuf>;
}

/// The collaborators a job runs through.
#[derive(Clone)]
pub struct StageSet {
    pub downloader: Arc<dyn Downloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub renderers: Vec<Arc<dyn Renderer>>,
}

/// Wires the production collaborators from configuration.
pub fn build_stages(config: &Config) -> Result<StageSet> {
    let transcriber: Arc<dyn Transcriber> = if config.use_simulation {
        tracing::warn!("Speech provider not configured, using simulated transcription");
        Arc::new(SimulatedTranscriber::new())
    } else {
        Arc::new(HttpTranscriber::new(config.transcribe.clone())?)
    };

    Ok(StageSet {
        downloader: Arc::new(YtDlpDownloader::new(
            config.ytdlp_path.clone(),
            config.ffmpeg_path.clone(),
            config.temp_dir.clone(),
        )),
        transcriber,
        translator: Arc::new(ChatTranslator::new(config.translate.clone())?),
        renderers: vec![
            Arc::new(PdfRenderer::new(config.translate.target_language.clone())),
            Arc::new(MarkdownRenderer::new(config.translate.target_language.clone())),
            Arc::new(SrtRenderer),
        ],
    })
}
