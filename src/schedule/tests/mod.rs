use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;

use super::processors::{MarkdownRenderer, PdfRenderer, SrtRenderer};
use super::*;
use crate::config::Config;
use crate::error::{ErrorKind, JobError};
use crate::storage::job::{InMemoryJobStore, JobMutator, JobStore};

// 测试辅助：记录每次写入后的快照，用于检查状态机不变量
pub(crate) struct RecordingStore {
    inner: InMemoryJobStore,
    log: Arc<StdMutex<Vec<Job>>>,
    fail_before_next_update: AtomicBool,
}

impl RecordingStore {
    fn new(capacity: usize) -> Self {
        Self {
            inner: InMemoryJobStore::new(capacity),
            log: Arc::new(StdMutex::new(Vec::new())),
            fail_before_next_update: AtomicBool::new(false),
        }
    }

    /// The next `update` first lands a FAILED write, as if the pipeline
    /// failed just before it.
    fn fail_before_next_update(&self) {
        self.fail_before_next_update.store(true, Ordering::SeqCst);
    }

    fn snapshots(&self, job_id: &str) -> Vec<Job> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, request: JobRequest) -> String {
        let id = self.inner.create(request).await;
        if let Ok(job) = self.inner.get(&id).await {
            self.log.lock().unwrap().push(job);
        }
        id
    }

    async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        self.inner.get(job_id).await
    }

    async fn update(&self, job_id: &str, mutator: JobMutator) -> Result<Job, JobError> {
        if self.fail_before_next_update.swap(false, Ordering::SeqCst) {
            self.inner
                .update(job_id, Box::new(|job| job.status = JobStatus::Failed))
                .await?;
        }

        // 在记录锁内追加快照，保证顺序与写入顺序一致
        let log = self.log.clone();
        self.inner
            .update(
                job_id,
                Box::new(move |job| {
                    mutator(job);
                    log.lock().unwrap().push(job.clone());
                }),
            )
            .await
    }

    async fn list(&self, limit: usize) -> Vec<JobSummary> {
        self.inner.list(limit).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        self.inner.delete(job_id).await
    }
}

#[derive(Default)]
pub(crate) struct Calls {
    download: AtomicUsize,
    transcribe: AtomicUsize,
    translate: AtomicUsize,
}

impl Calls {
    fn total(&self) -> usize {
        self.download.load(Ordering::SeqCst)
            + self.transcribe.load(Ordering::SeqCst)
            + self.translate.load(Ordering::SeqCst)
    }
}

struct FakeDownloader {
    temp_dir: PathBuf,
    calls: Arc<Calls>,
    fail_with: Option<String>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn extract(
        &self,
        source: &JobSource,
        _time_range: Option<TimeRange>,
        ctx: &StageContext,
    ) -> Result<ExtractedAudio> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        let path = self.temp_dir.join(format!("{}.mp3", ctx.job_id));
        tokio::fs::write(&path, b"fake audio").await?;
        ctx.report(50).await;

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }

        let title = match source {
            JobSource::Url(_) => "Fake Lecture".to_string(),
            JobSource::Upload(_) => "Uploaded Audio: fake".to_string(),
        };
        Ok(ExtractedAudio { path, title, owned: true })
    }

    async fn lookup_title(&self, _url: &str) -> Result<String> {
        Ok("Fake Lecture".to_string())
    }
}

struct FakeTranscriber {
    calls: Arc<Calls>,
    fail_with: Option<String>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &Path, ctx: &StageContext) -> Result<Vec<TimedSegment>> {
        self.calls.transcribe.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }
        ctx.report(40).await;
        Ok(vec![
            TimedSegment::new(3.5, 7.8, "اليوم سنتحدث عن أهمية اللغة العربية"),
            TimedSegment::new(0.0, 3.2, "مرحبا بكم في هذا الفيديو"),
            TimedSegment::new(8.0, 8.0, "لا شيء"),
        ])
    }
}

struct FakeTranslator {
    calls: Arc<Calls>,
    fail_with: Option<String>,
    long_text: bool,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, segments: &[TimedSegment], ctx: &StageContext) -> Result<Vec<TimedSegment>> {
        self.calls.translate.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }
        ctx.report(50).await;
        Ok(segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let text = if self.long_text {
                    format!("Segment {} {}", i, "lorem ipsum ".repeat(200))
                } else {
                    format!("Translated segment {}", i)
                };
                TimedSegment::new(s.start, s.end, text)
            })
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct Options {
    fail_download: Option<&'static str>,
    fail_transcribe: Option<&'static str>,
    fail_translate: Option<&'static str>,
    gate: Option<Arc<Notify>>,
    long_text: bool,
    capacity: Option<usize>,
    cleanup_delay: Option<Duration>,
    permissive_source: bool,
}

pub(crate) struct TestEnv {
    pub(crate) supervisor: Arc<JobSupervisor>,
    pub(crate) store: Arc<RecordingStore>,
    pub(crate) calls: Arc<Calls>,
    pub(crate) config: Config,
    _root: tempfile::TempDir,
}

// 测试辅助函数：创建测试环境
pub(crate) fn setup_test_environment(options: Options) -> Result<TestEnv> {
    let root = tempfile::tempdir()?;
    let mut config = Config::for_root(root.path());
    if let Some(delay) = options.cleanup_delay {
        config.upload_cleanup_delay = delay;
    }
    if options.permissive_source {
        config.source_url_pattern = r"^[\w:/.?=&-]+$".to_string();
    }
    config.ensure_dirs()?;

    let calls = Arc::new(Calls::default());
    let stages = StageSet {
        downloader: Arc::new(FakeDownloader {
            temp_dir: config.temp_dir.clone(),
            calls: calls.clone(),
            fail_with: options.fail_download.map(str::to_string),
            gate: options.gate.clone(),
        }),
        transcriber: Arc::new(FakeTranscriber {
            calls: calls.clone(),
            fail_with: options.fail_transcribe.map(str::to_string),
        }),
        translator: Arc::new(FakeTranslator {
            calls: calls.clone(),
            fail_with: options.fail_translate.map(str::to_string),
            long_text: options.long_text,
        }),
        renderers: vec![
            Arc::new(PdfRenderer::new("English")),
            Arc::new(MarkdownRenderer::new("English")),
            Arc::new(SrtRenderer),
        ],
    };

    let store = Arc::new(RecordingStore::new(options.capacity.unwrap_or(100)));
    let supervisor = Arc::new(JobSupervisor::new(&config, store.clone(), stages)?);
    Ok(TestEnv {
        supervisor,
        store,
        calls,
        config,
        _root: root,
    })
}

pub(crate) const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

pub(crate) async fn wait_for_terminal(supervisor: &JobSupervisor, job_id: &str) -> Result<Job> {
    for _ in 0..500 {
        let job = supervisor.status(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("job {} did not finish", job_id))
}

async fn wait_until_gone(path: &Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn wait_for_status(supervisor: &JobSupervisor, job_id: &str, status: JobStatus) -> Result<()> {
    for _ in 0..500 {
        if supervisor.status(job_id).await?.status == status {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("job {} never reached {}", job_id, status))
}

/// Forward-only status, monotonic per-stage progress and no later stage
/// ahead of an unfinished earlier one.
fn assert_invariants(snapshots: &[Job]) {
    assert!(!snapshots.is_empty());
    assert_eq!(snapshots[0].status, JobStatus::Initiated);

    for pair in snapshots.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        assert!(!before.status.is_terminal(), "write after terminal state {}", before.status);
        assert!(
            before.status.can_transition_to(after.status),
            "status went from {} to {}",
            before.status,
            after.status
        );
        for stage in Stage::all() {
            assert!(
                after.progress.get(stage) >= before.progress.get(stage),
                "{} progress decreased: {} -> {}",
                stage,
                before.progress,
                after.progress
            );
        }
    }

    for job in snapshots {
        if job.status == JobStatus::Completed {
            assert!(job.progress.iter().all(|(_, percent)| percent == 100));
            continue;
        }
        let values: Vec<u8> = job.progress.iter().map(|(_, percent)| percent).collect();
        for later in 1..values.len() {
            if values[later] > 0 {
                assert!(
                    values[..later].iter().all(|&earlier| earlier == 100),
                    "stage {} started before earlier stages finished: {}",
                    later,
                    job.progress
                );
            }
        }
    }
}

#[tokio::test]
async fn test_complete_job_lifecycle() -> Result<()> {
    // 1. 设置测试环境
    let env = setup_test_environment(Options::default())?;

    // 2. 提交任务
    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    assert_eq!(env.supervisor.status(&job_id).await?.status, JobStatus::Initiated);

    // 3. 等待任务完成
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.title.as_deref(), Some("Fake Lecture"));
    assert!(job.error.is_none());
    assert!(job.progress.iter().all(|(_, percent)| percent == 100));

    // 4. 验证结果
    let artifacts = env.supervisor.results(&job_id).await?;
    assert_eq!(artifacts.transcript.len(), 2, "zero-length segment is dropped");
    assert_eq!(artifacts.transcript[0].start, 0.0, "segments are ordered by start");
    assert_eq!(artifacts.translation.len(), artifacts.transcript.len());
    for (source, target) in artifacts.transcript.iter().zip(&artifacts.translation) {
        assert_eq!((source.start, source.end), (target.start, target.end));
    }
    for kind in ArtifactKind::all() {
        let path = artifacts.files.get(kind).expect("document rendered");
        assert!(path.exists(), "{} missing", path.display());
        assert!(path.starts_with(env.config.output_dir.join(kind.dir_name())));
    }

    // 5. 下载的临时音频在完成后删除
    assert!(wait_until_gone(&env.config.temp_dir.join(format!("{}.mp3", job_id))).await);

    assert_eq!(env.calls.download.load(Ordering::SeqCst), 1);
    assert_eq!(env.calls.transcribe.load(Ordering::SeqCst), 1);
    assert_eq!(env.calls.translate.load(Ordering::SeqCst), 1);
    assert_invariants(&env.store.snapshots(&job_id));
    Ok(())
}

#[tokio::test]
async fn test_stage_failure_marks_job_failed() -> Result<()> {
    let env = setup_test_environment(Options {
        fail_translate: Some("provider unreachable"),
        permissive_source: true,
        ..Options::default()
    })?;

    let job_id = env.supervisor.submit(JobRequest::url("valid-source")).await?;
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("failed job carries error info");
    assert_eq!(error.message, "provider unreachable");
    assert_eq!(error.kind, ErrorKind::StageFailure);
    assert_eq!(error.stage, Some(Stage::Translate));
    assert!(job.artifacts.is_none());

    // 两个阶段成功，第三个阶段失败
    assert_eq!(job.progress.get(Stage::Download), 100);
    assert_eq!(job.progress.get(Stage::Transcribe), 100);
    assert!(job.progress.get(Stage::Translate) < 100);
    assert_eq!(job.progress.get(Stage::Render), 0);

    match env.supervisor.results(&job_id).await {
        Err(JobError::NotReady { status, .. }) => assert_eq!(status, JobStatus::Failed),
        other => panic!("expected NotReady, got {:?}", other),
    }
    assert!(!env.config.temp_dir.join(format!("{}.mp3", job_id)).exists());
    assert_invariants(&env.store.snapshots(&job_id));
    Ok(())
}

#[tokio::test]
async fn test_transcribe_failure_stops_pipeline() -> Result<()> {
    let env = setup_test_environment(Options {
        fail_transcribe: Some("audio unreadable"),
        ..Options::default()
    })?;

    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.map(|e| e.stage), Some(Some(Stage::Transcribe)));
    assert_eq!(env.calls.translate.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_first_stage() -> Result<()> {
    let env = setup_test_environment(Options::default())?;

    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    env.supervisor.cancel(&job_id).await?;

    let job = wait_for_terminal(&env.supervisor, &job_id).await?;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(env.calls.total(), 0, "no stage may run after an immediate cancel");
    assert!(job.progress.iter().all(|(_, percent)| percent == 0));

    // 重复取消是幂等的
    let again = env.supervisor.cancel(&job_id).await?;
    assert_eq!(again.status, JobStatus::Cancelled);
    assert_invariants(&env.store.snapshots(&job_id));
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_stage_in_flight() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let env = setup_test_environment(Options {
        gate: Some(gate.clone()),
        ..Options::default()
    })?;

    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    wait_for_status(&env.supervisor, &job_id, JobStatus::Downloading).await?;

    let snapshot = env.supervisor.cancel(&job_id).await?;
    assert_eq!(snapshot.status, JobStatus::Downloading, "cancellation is cooperative");

    // 让进行中的阶段自然结束
    gate.notify_one();
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(env.calls.download.load(Ordering::SeqCst), 1);
    assert_eq!(env.calls.transcribe.load(Ordering::SeqCst), 0);
    assert!(job.artifacts.is_none());
    assert!(!env.config.temp_dir.join(format!("{}.mp3", job_id)).exists());
    assert_invariants(&env.store.snapshots(&job_id));
    Ok(())
}

#[tokio::test]
async fn test_cancel_terminal_job_is_invalid_state() -> Result<()> {
    let env = setup_test_environment(Options::default())?;
    let completed = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    let before = wait_for_terminal(&env.supervisor, &completed).await?;

    assert!(matches!(
        env.supervisor.cancel(&completed).await,
        Err(JobError::InvalidState { status: JobStatus::Completed, .. })
    ));
    let after = env.supervisor.status(&completed).await?;
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.updated_at, before.updated_at);

    let env = setup_test_environment(Options {
        fail_download: Some("video is private"),
        ..Options::default()
    })?;
    let failed = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    wait_for_terminal(&env.supervisor, &failed).await?;
    assert!(matches!(
        env.supervisor.cancel(&failed).await,
        Err(JobError::InvalidState { status: JobStatus::Failed, .. })
    ));
    assert_eq!(env.supervisor.status(&failed).await?.status, JobStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_cancel_racing_a_failure_is_invalid_state() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let env = setup_test_environment(Options {
        gate: Some(gate.clone()),
        ..Options::default()
    })?;

    // 1. 任务停在下载阶段，进度写入已完成
    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    for _ in 0..500 {
        if env.supervisor.status(&job_id).await?.progress.get(Stage::Download) == 50 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(env.supervisor.status(&job_id).await?.status, JobStatus::Downloading);

    // 2. 取消读取快照之后、写入之前，任务失败
    env.store.fail_before_next_update();
    assert!(matches!(
        env.supervisor.cancel(&job_id).await,
        Err(JobError::InvalidState { status: JobStatus::Failed, .. })
    ));

    gate.notify_one();
    assert_eq!(wait_for_terminal(&env.supervisor, &job_id).await?.status, JobStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_unknown_job_is_not_found() -> Result<()> {
    let env = setup_test_environment(Options::default())?;
    assert!(matches!(env.supervisor.status("nope").await, Err(JobError::NotFound(_))));
    assert!(matches!(env.supervisor.cancel("nope").await, Err(JobError::NotFound(_))));
    assert!(matches!(env.supervisor.results("nope").await, Err(JobError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_creates_no_job() -> Result<()> {
    let env = setup_test_environment(Options::default())?;

    let rejected = vec![
        JobRequest::url(""),
        JobRequest::url("   "),
        JobRequest::url("https://example.com/video.mp4"),
        JobRequest::url(VIDEO_URL).with_time_range(Some(TimeRange { start: 10.0, end: 5.0 })),
        JobRequest::url(VIDEO_URL).with_time_range(Some(TimeRange { start: -1.0, end: 5.0 })),
        JobRequest::upload(env.config.audio_upload_dir().join("missing.mp3")),
    ];
    for request in rejected {
        let result = env.supervisor.submit(request.clone()).await;
        assert!(
            matches!(result, Err(JobError::InvalidInput(_))),
            "{:?} should be rejected, got {:?}",
            request,
            result
        );
    }

    let empty_upload = env.config.audio_upload_dir().join("empty.mp3");
    std::fs::write(&empty_upload, b"")?;
    assert!(matches!(
        env.supervisor.submit(JobRequest::upload(&empty_upload)).await,
        Err(JobError::InvalidInput(_))
    ));

    assert!(env.supervisor.recent(10).await.is_empty());
    assert_eq!(env.calls.total(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_keep_invariants() -> Result<()> {
    let env = setup_test_environment(Options::default())?;

    let mut ids = Vec::new();
    for i in 0..6 {
        let url = format!("https://www.youtube.com/watch?v=video{:05}", i);
        ids.push(env.supervisor.submit(JobRequest::url(url)).await?);
    }
    for id in &ids {
        let job = wait_for_terminal(&env.supervisor, id).await?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_invariants(&env.store.snapshots(id));
    }
    assert_eq!(env.calls.download.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_title_jobs_get_distinct_documents() -> Result<()> {
    let env = setup_test_environment(Options::default())?;

    // 同一个视频同时提交两次，标题相同
    let (first, second) = tokio::join!(
        env.supervisor.submit(JobRequest::url(VIDEO_URL)),
        env.supervisor.submit(JobRequest::url(VIDEO_URL)),
    );
    let (first, second) = (first?, second?);
    assert_ne!(first, second);

    wait_for_terminal(&env.supervisor, &first).await?;
    wait_for_terminal(&env.supervisor, &second).await?;
    let first_files = env.supervisor.results(&first).await?.files;
    let second_files = env.supervisor.results(&second).await?.files;

    for kind in ArtifactKind::all() {
        let a = first_files.get(kind).expect("first job rendered");
        let b = second_files.get(kind).expect("second job rendered");
        assert_ne!(a, b, "{} documents collide", kind);
        assert!(a.exists() && b.exists());
    }
    assert!(env.supervisor.preview(&first, ArtifactKind::Markdown).await?.starts_with("# Fake Lecture"));
    assert!(env.supervisor.preview(&second, ArtifactKind::Markdown).await?.starts_with("# Fake Lecture"));
    Ok(())
}

#[tokio::test]
async fn test_store_bound_keeps_most_recent_jobs() -> Result<()> {
    let env = setup_test_environment(Options {
        capacity: Some(2),
        ..Options::default()
    })?;

    let mut ids = Vec::new();
    for i in 0..3 {
        let url = format!("https://www.youtube.com/watch?v=bound{:05}", i);
        let id = env.supervisor.submit(JobRequest::url(url)).await?;
        wait_for_terminal(&env.supervisor, &id).await?;
        ids.push(id);
    }

    let recent = env.supervisor.recent(10).await;
    assert_eq!(recent.len(), 2);
    assert!(env.supervisor.recent(0).await.is_empty());
    assert_eq!(env.supervisor.recent(1).await.len(), 1);
    assert_eq!(recent[0].id, ids[2]);
    assert_eq!(recent[1].id, ids[1]);
    assert!(recent[0].updated_at >= recent[1].updated_at);
    assert!(matches!(env.supervisor.status(&ids[0]).await, Err(JobError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_upload_cleanup_is_deferred() -> Result<()> {
    let env = setup_test_environment(Options {
        cleanup_delay: Some(Duration::from_millis(300)),
        ..Options::default()
    })?;
    let upload = env.config.audio_upload_dir().join("upload-1-test.mp3");
    std::fs::write(&upload, b"uploaded audio")?;

    let job_id = env.supervisor.submit(JobRequest::upload(&upload)).await?;
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.title.as_deref(), Some("Uploaded Audio: fake"));

    // 完成后上传文件仍保留一段时间
    assert!(upload.exists());
    assert!(env.supervisor.cleanup().is_scheduled(&job_id));

    assert!(wait_until_gone(&upload).await);
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_is_removed_before_terminal_state() -> Result<()> {
    let env = setup_test_environment(Options {
        fail_transcribe: Some("audio unreadable"),
        ..Options::default()
    })?;
    let upload = env.config.audio_upload_dir().join("upload-2-test.mp3");
    std::fs::write(&upload, b"uploaded audio")?;

    let job_id = env.supervisor.submit(JobRequest::upload(&upload)).await?;
    let job = wait_for_terminal(&env.supervisor, &job_id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(!upload.exists(), "partial files are removed before FAILED is visible");
    assert!(!env.supervisor.cleanup().is_scheduled(&job_id));
    Ok(())
}

#[tokio::test]
async fn test_preview_and_artifact_paths() -> Result<()> {
    let env = setup_test_environment(Options {
        long_text: true,
        ..Options::default()
    })?;

    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    assert!(matches!(
        env.supervisor.preview(&job_id, ArtifactKind::Markdown).await,
        Err(JobError::NotReady { status: JobStatus::Initiated, .. })
    ));
    wait_for_terminal(&env.supervisor, &job_id).await?;

    let preview = env.supervisor.preview(&job_id, ArtifactKind::Markdown).await?;
    assert!(preview.starts_with("# Fake Lecture"));
    assert!(preview.ends_with("..."));
    assert_eq!(preview.chars().count(), 2003);

    let srt = env.supervisor.preview(&job_id, ArtifactKind::Srt).await?;
    assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:03,200"));

    let pdf = env.supervisor.preview(&job_id, ArtifactKind::Pdf).await?;
    assert!(pdf.contains("Fake Lecture"));

    let path = env.supervisor.artifact_path(&job_id, ArtifactKind::Pdf).await?;
    std::fs::remove_file(&path)?;
    assert!(matches!(
        env.supervisor.artifact_path(&job_id, ArtifactKind::Pdf).await,
        Err(JobError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_validate_url() -> Result<()> {
    let env = setup_test_environment(Options::default())?;
    assert_eq!(env.supervisor.validate_url(VIDEO_URL).await?, "Fake Lecture");
    assert!(matches!(
        env.supervisor.validate_url("https://vimeo.com/1").await,
        Err(JobError::InvalidInput(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_cancels_active_jobs() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let env = setup_test_environment(Options {
        gate: Some(gate.clone()),
        ..Options::default()
    })?;

    let job_id = env.supervisor.submit(JobRequest::url(VIDEO_URL)).await?;
    wait_for_status(&env.supervisor, &job_id, JobStatus::Downloading).await?;

    let shutdown = env.supervisor.shutdown(Duration::from_secs(5));
    let release = async {
        sleep(Duration::from_millis(50)).await;
        gate.notify_one();
    };
    tokio::join!(shutdown, release);

    assert_eq!(env.supervisor.status(&job_id).await?.status, JobStatus::Cancelled);
    Ok(())
}
