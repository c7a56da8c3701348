use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Downloader, ExtractedAudio, StageContext};
use crate::schedule::types::{JobSource, TimeRange};

/// Fetches remote audio with yt-dlp and trims it with ffmpeg.
pub struct YtDlpDownloader {
    ytdlp: String,
    ffmpeg: String,
    temp_dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(ytdlp: impl Into<String>, ffmpeg: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffmpeg: ffmpeg.into(),
            temp_dir: temp_dir.into(),
        }
    }

    async fn download(&self, url: &str, ctx: &StageContext) -> Result<PathBuf> {
        let url = clean_url(url);
        let template = self.temp_dir.join(format!("{}.%(ext)s", ctx.job_id));
        let output_path = self.temp_dir.join(format!("{}.mp3", ctx.job_id));

        let mut command = Command::new(&self.ytdlp);
        command
            .arg(&url)
            .args(["--extract-audio", "--audio-format", "mp3", "--audio-quality", "0"])
            .args(["--no-playlist", "--no-warnings", "--add-metadata"])
            .arg("--output")
            .arg(&template);

        info!("Downloading audio for job {} from {}", ctx.job_id, url);
        run_command(command, &self.ytdlp, ctx.cancel_token()).await?;

        if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            bail!("yt-dlp finished but {} was not produced", output_path.display());
        }
        Ok(output_path)
    }

    async fn fetch_title(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let mut command = Command::new(&self.ytdlp);
        command
            .arg(clean_url(url))
            .args(["--get-title", "--skip-download", "--no-playlist", "--no-warnings"]);

        let output = run_command(command, &self.ytdlp, cancel).await?;
        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if title.is_empty() {
            bail!("no title reported for {}", url);
        }
        Ok(title)
    }

    async fn trim(&self, input: &Path, range: TimeRange, ctx: &StageContext) -> Result<PathBuf> {
        let extension = input.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
        let output_path = self.temp_dir.join(format!("{}_trimmed.{}", ctx.job_id, extension));

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-ss")
            .arg(range.start.to_string())
            .arg("-to")
            .arg(range.end.to_string())
            .args(["-c", "copy"])
            .arg(&output_path);

        info!("Trimming audio for job {} to {}s..{}s", ctx.job_id, range.start, range.end);
        run_command(command, &self.ffmpeg, ctx.cancel_token()).await?;
        Ok(output_path)
    }

    async fn extract_into_temp(
        &self,
        source: &JobSource,
        time_range: Option<TimeRange>,
        ctx: &StageContext,
    ) -> Result<ExtractedAudio> {
        match source {
            JobSource::Url(url) => {
                let title = match self.fetch_title(url, ctx.cancel_token()).await {
                    Ok(title) => title,
                    Err(e) => {
                        warn!("Could not read title of {}: {:#}", url, e);
                        format!("YouTube Video - {}", Utc::now().format("%Y-%m-%dT%H-%M-%S"))
                    }
                };
                ctx.report(20).await;

                let downloaded = self.download(url, ctx).await?;
                ctx.report(60).await;

                let path = match time_range {
                    Some(range) => {
                        let trimmed = self.trim(&downloaded, range, ctx).await;
                        remove_quietly(&downloaded).await;
                        trimmed?
                    }
                    None => downloaded,
                };
                Ok(ExtractedAudio { path, title, owned: true })
            }
            JobSource::Upload(upload) => {
                let stem = upload
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "audio".to_string());
                let title = format!("Uploaded Audio: {}", stem);

                if !tokio::fs::try_exists(upload).await.unwrap_or(false) {
                    bail!("uploaded file {} no longer exists", upload.display());
                }

                match time_range {
                    Some(range) => {
                        let path = self.trim(upload, range, ctx).await?;
                        Ok(ExtractedAudio { path, title, owned: true })
                    }
                    None => Ok(ExtractedAudio { path: upload.clone(), title, owned: false }),
                }
            }
        }
    }

    /// Removes whatever yt-dlp or ffmpeg left in the temp directory for a job:
    /// `.part` files, fragments, an untrimmed download, a half-written trim.
    async fn sweep_job_files(&self, job_id: &str) {
        if job_id.is_empty() {
            return;
        }
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", self.temp_dir.display(), e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let belongs_to_job = name
                .to_str()
                .and_then(|name| name.strip_prefix(job_id))
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('_'));
            if belongs_to_job {
                remove_quietly(&entry.path()).await;
            }
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn extract(
        &self,
        source: &JobSource,
        time_range: Option<TimeRange>,
        ctx: &StageContext,
    ) -> Result<ExtractedAudio> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let result = self.extract_into_temp(source, time_range, ctx).await;
        if result.is_err() {
            self.sweep_job_files(&ctx.job_id).await;
        }
        result
    }

    async fn lookup_title(&self, url: &str) -> Result<String> {
        self.fetch_title(url, &CancellationToken::new()).await
    }
}

/// Runs an external tool to completion, killing it if `cancel` fires first.
async fn run_command(mut command: Command, program: &str, cancel: &CancellationToken) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.with_context(|| format!("{} did not finish", program))?,
        _ = cancel.cancelled() => return Err(anyhow!("{} interrupted by cancellation", program)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no error output");
        bail!("{} exited with {}: {}", program, output.status, reason.trim());
    }
    Ok(output)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// Drops the `t=` start-offset parameter, which yt-dlp does not need.
pub fn clean_url(raw: &str) -> String {
    let Ok(mut url) = reqwest::Url::parse(raw) else {
        return raw.to_string();
    };
    if !url.query_pairs().any(|(key, _)| key == "t") {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "t")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}
