use std::path::{Path, PathBuf};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::error::{ErrorInfo, JobError};

/// One ordered step of the pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Download,
    Transcribe,
    Translate,
    Render,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub const STAGE_COUNT: usize = 4;

/// Static description of a stage: the status it runs under, its progress key
/// and the progress it shows as soon as it starts.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub stage: Stage,
    pub status: JobStatus,
    pub key: &'static str,
    pub initial_progress: u8,
    pub message: &'static str,
}

/// Pipeline order. Insertion order of the progress mapping follows this table.
pub static STAGE_TABLE: [StageSpec; STAGE_COUNT] = [
    StageSpec {
        stage: Stage::Download,
        status: JobStatus::Downloading,
        key: "extracting",
        initial_progress: 10,
        message: "Downloading audio",
    },
    StageSpec {
        stage: Stage::Transcribe,
        status: JobStatus::Transcribing,
        key: "transcribing",
        initial_progress: 5,
        message: "Transcribing audio",
    },
    StageSpec {
        stage: Stage::Translate,
        status: JobStatus::Translating,
        key: "translating",
        initial_progress: 5,
        message: "Translating transcription",
    },
    StageSpec {
        stage: Stage::Render,
        status: JobStatus::GeneratingDocuments,
        key: "generating",
        initial_progress: 5,
        message: "Generating output documents",
    },
];

impl Stage {
    pub fn index(self) -> usize {
        match self {
            Stage::Download => 0,
            Stage::Transcribe => 1,
            Stage::Translate => 2,
            Stage::Render => 3,
        }
    }

    pub fn spec(self) -> &'static StageSpec {
        &STAGE_TABLE[self.index()]
    }

    pub fn status(self) -> JobStatus {
        self.spec().status
    }

    pub fn key(self) -> &'static str {
        self.spec().key
    }

    pub fn all() -> impl Iterator<Item = Stage> {
        STAGE_TABLE.iter().map(|spec| spec.stage)
    }
}

/// Verifies the stage table once at startup: every row sits at its own index,
/// statuses strictly follow pipeline order, keys are unique and the initial
/// progress is a small nonzero value.
pub fn check_stage_table() -> Result<(), String> {
    let mut previous_rank = JobStatus::Initiated.rank();
    for (i, spec) in STAGE_TABLE.iter().enumerate() {
        if spec.stage.index() != i {
            return Err(format!("stage {} is listed at position {}", spec.stage, i));
        }
        let rank = spec.status.rank();
        if rank <= previous_rank {
            return Err(format!("stage {} runs under out-of-order status {}", spec.stage, spec.status));
        }
        previous_rank = rank;
        if STAGE_TABLE[..i].iter().any(|other| other.key == spec.key) {
            return Err(format!("duplicate progress key: {}", spec.key));
        }
        if spec.initial_progress == 0 || spec.initial_progress >= 100 {
            return Err(format!("stage {} has invalid initial progress {}", spec.stage, spec.initial_progress));
        }
    }
    if JobStatus::Completed.rank() <= previous_rank {
        return Err("COMPLETED must follow the last stage".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initiated,
    Downloading,
    Transcribing,
    Translating,
    GeneratingDocuments,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Position in the forward pipeline; side states sit after COMPLETED.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Initiated => 0,
            JobStatus::Downloading => 1,
            JobStatus::Transcribing => 2,
            JobStatus::Translating => 3,
            JobStatus::GeneratingDocuments => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => 6,
            JobStatus::Cancelled => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether a job currently in `self` may be written with `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        match next {
            JobStatus::Failed | JobStatus::Cancelled => true,
            _ => next.rank() >= self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Initiated => "INITIATED",
            JobStatus::Downloading => "DOWNLOADING",
            JobStatus::Transcribing => "TRANSCRIBING",
            JobStatus::Translating => "TRANSLATING",
            JobStatus::GeneratingDocuments => "GENERATING_DOCUMENTS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = String;
    fn try_from(status: &str) -> Result<Self, Self::Error> {
        match status {
            "INITIATED" => Ok(JobStatus::Initiated),
            "DOWNLOADING" => Ok(JobStatus::Downloading),
            "TRANSCRIBING" => Ok(JobStatus::Transcribing),
            "TRANSLATING" => Ok(JobStatus::Translating),
            "GENERATING_DOCUMENTS" => Ok(JobStatus::GeneratingDocuments),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {}", status)),
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage completion percentages, in pipeline order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageProgress([u8; STAGE_COUNT]);

impl StageProgress {
    pub fn get(&self, stage: Stage) -> u8 {
        self.0[stage.index()]
    }

    /// Raises a stage's progress; never lowers it.
    pub fn raise(&mut self, stage: Stage, percent: u8) {
        let slot = &mut self.0[stage.index()];
        *slot = (*slot).max(percent.min(100));
    }

    pub fn bump(&mut self, stage: Stage, delta: u8) {
        let slot = &mut self.0[stage.index()];
        *slot = slot.saturating_add(delta).min(100);
    }

    pub fn complete(&mut self, stage: Stage) {
        self.0[stage.index()] = 100;
    }

    pub fn complete_all(&mut self) {
        self.0 = [100; STAGE_COUNT];
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, u8)> + '_ {
        Stage::all().map(move |stage| (stage, self.get(stage)))
    }
}

impl Display for StageProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (stage, percent)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", stage.key(), percent)?;
        }
        Ok(())
    }
}

impl Serialize for StageProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(STAGE_COUNT))?;
        for (stage, percent) in self.iter() {
            map.serialize_entry(stage.key(), &percent)?;
        }
        map.end()
    }
}

/// One utterance or subtitle line, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TimedSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self { start, end, text: text.into() }
    }
}

/// Optional trim window applied to the source audio, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Result<Self, JobError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Builds a range from optional bounds; both or neither must be given.
    pub fn from_bounds(start: Option<f64>, end: Option<f64>) -> Result<Option<Self>, JobError> {
        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            _ => Err(JobError::invalid_input("startTime and endTime must be given together")),
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(JobError::invalid_input("startTime and endTime must be numbers in seconds"));
        }
        if self.start < 0.0 {
            return Err(JobError::invalid_input("startTime must not be negative"));
        }
        if self.start >= self.end {
            return Err(JobError::invalid_input("startTime must be less than endTime"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum JobSource {
    Url(String),
    Upload(PathBuf),
}

impl JobSource {
    pub fn upload_path(&self) -> Option<&Path> {
        match self {
            JobSource::Upload(path) => Some(path),
            JobSource::Url(_) => None,
        }
    }
}

impl Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSource::Url(url) => write!(f, "{}", url),
            JobSource::Upload(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What a caller submits: the source plus an optional trim window.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub source: JobSource,
    pub time_range: Option<TimeRange>,
}

impl JobRequest {
    pub fn url(url: impl Into<String>) -> Self {
        Self { source: JobSource::Url(url.into()), time_range: None }
    }

    pub fn upload(path: impl Into<PathBuf>) -> Self {
        Self { source: JobSource::Upload(path.into()), time_range: None }
    }

    pub fn with_time_range(mut self, time_range: Option<TimeRange>) -> Self {
        self.time_range = time_range;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Pdf,
    Markdown,
    Srt,
}

impl ArtifactKind {
    pub fn all() -> [ArtifactKind; 3] {
        [ArtifactKind::Pdf, ArtifactKind::Markdown, ArtifactKind::Srt]
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Markdown => "md",
            ArtifactKind::Srt => "srt",
        }
    }

    /// Sub-directory of the output dir the documents are written to.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Markdown => "markdown",
            ArtifactKind::Srt => "srt",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "application/pdf",
            ArtifactKind::Markdown => "text/markdown; charset=utf-8",
            ArtifactKind::Srt => "application/x-subrip",
        }
    }
}

impl TryFrom<&str> for ArtifactKind {
    type Error = JobError;
    fn try_from(kind: &str) -> Result<Self, Self::Error> {
        match kind.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ArtifactKind::Pdf),
            "markdown" | "md" => Ok(ArtifactKind::Markdown),
            "srt" => Ok(ArtifactKind::Srt),
            other => Err(JobError::invalid_input(format!(
                "Invalid file type '{}'. Must be pdf, markdown or srt",
                other
            ))),
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFiles {
    pub pdf: Option<PathBuf>,
    pub markdown: Option<PathBuf>,
    pub srt: Option<PathBuf>,
}

impl OutputFiles {
    pub fn get(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        match kind {
            ArtifactKind::Pdf => self.pdf.as_ref(),
            ArtifactKind::Markdown => self.markdown.as_ref(),
            ArtifactKind::Srt => self.srt.as_ref(),
        }
    }

    pub fn set(&mut self, kind: ArtifactKind, path: PathBuf) {
        match kind {
            ArtifactKind::Pdf => self.pdf = Some(path),
            ArtifactKind::Markdown => self.markdown = Some(path),
            ArtifactKind::Srt => self.srt = Some(path),
        }
    }
}

/// Outputs of a completed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    pub transcript: Vec<TimedSegment>,
    pub translation: Vec<TimedSegment>,
    pub files: OutputFiles,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(rename = "jobId")]
    pub id: String,
    pub status: JobStatus,
    pub progress: StageProgress,
    pub source: JobSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub title: Option<String>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Initiated,
            progress: StageProgress::default(),
            source: request.source,
            time_range: request.time_range,
            title: None,
            message: Some("Job initiated".to_string()),
            artifacts: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Offset added to rendered timestamps so they match the untrimmed source.
    pub fn time_offset(&self) -> f64 {
        self.time_range.map(|range| range.start).unwrap_or(0.0)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status,
            title: self.title.clone(),
            progress: self.progress,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    #[serde(rename = "jobId")]
    pub id: String,
    pub status: JobStatus,
    pub title: Option<String>,
    pub progress: StageProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
