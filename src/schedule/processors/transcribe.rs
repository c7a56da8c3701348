use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

use super::{StageContext, Transcriber};
use crate::config::TranscribeConfig;
use crate::schedule::types::TimedSegment;

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Speech-to-text over an OpenAI-compatible `audio/transcriptions` endpoint.
pub struct HttpTranscriber {
    client: reqwest::Client,
    config: TranscribeConfig,
}

impl HttpTranscriber {
    pub fn new(config: TranscribeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client, config })
    }

    async fn request(&self, audio: &Path) -> Result<VerboseTranscription> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("speech provider API key is not configured"))?;

        let bytes = tokio::fs::read(audio)
            .await
            .with_context(|| format!("unable to read audio file {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "verbose_json")
            .part("file", Part::bytes(bytes).file_name(file_name).mime_str(audio_mime(audio))?);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .context("speech provider unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("speech provider returned {}: {}", status, body.trim());
        }
        Ok(response.json::<VerboseTranscription>().await?)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<TimedSegment>> {
        info!("Transcribing {} for job {}", audio.display(), ctx.job_id);
        ctx.report(10).await;

        let result = tokio::select! {
            result = self.request(audio) => result?,
            _ = ctx.cancel_token().cancelled() => bail!("transcription interrupted by cancellation"),
        };

        let mut segments: Vec<TimedSegment> = result
            .segments
            .into_iter()
            .map(|s| TimedSegment::new(s.start, s.end, s.text.trim()))
            .collect();

        // provider returned plain text only
        if segments.is_empty() && !result.text.trim().is_empty() {
            warn!("Provider returned no segments for job {}, using full text", ctx.job_id);
            let end = result.duration.filter(|d| *d > 0.0).unwrap_or(1.0);
            segments.push(TimedSegment::new(0.0, end, result.text.trim()));
        }

        info!("Transcribed {} segments for job {}", segments.len(), ctx.job_id);
        Ok(segments)
    }
}

const SAMPLE_SEGMENTS: [(f64, f64, &str); 10] = [
    (0.0, 3.2, "مرحبا بكم في هذا الفيديو التعليمي"),
    (3.5, 7.8, "اليوم سنتحدث عن أهمية اللغة العربية في العالم الرقمي"),
    (8.1, 14.5, "تعتبر اللغة العربية من أكثر اللغات انتشارًا على مستوى العالم"),
    (15.0, 20.3, "وهناك أكثر من ٤٢٢ مليون شخص يتحدثون اللغة العربية كلغة أولى"),
    (21.0, 27.5, "في هذا الفيديو، سنتعلم كيفية استخدام التكنولوجيا لدعم المحتوى العربي"),
    (28.0, 35.2, "ومن أهم التطورات الحديثة في هذا المجال هي أنظمة التعرف على الكلام والترجمة الآلية"),
    (36.0, 42.5, "لقد تحسنت هذه الأنظمة بشكل كبير في السنوات الأخيرة بفضل تقنيات الذكاء الاصطناعي"),
    (43.0, 48.8, "الآن يمكننا تحويل الكلام العربي المنطوق إلى نص مكتوب بدقة عالية"),
    (49.3, 55.7, "كما يمكننا ترجمة هذا النص إلى لغات أخرى مثل الإنجليزية بسهولة"),
    (56.2, 63.5, "هذه التقنيات تساعد في نشر المحتوى العربي على نطاق أوسع وتسهيل الوصول إليه"),
];

/// Offline stand-in for the speech provider. Returns a fixed Arabic sample.
#[derive(Debug, Default)]
pub struct SimulatedTranscriber {
    delay: Duration,
}

impl SimulatedTranscriber {
    pub fn new() -> Self {
        Self { delay: Duration::from_millis(500) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Transcriber for SimulatedTranscriber {
    async fn transcribe(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<TimedSegment>> {
        info!("Simulating transcription of {} for job {}", audio.display(), ctx.job_id);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = ctx.cancel_token().cancelled() => bail!("transcription interrupted by cancellation"),
        }
        ctx.report(50).await;

        Ok(SAMPLE_SEGMENTS
            .iter()
            .map(|(start, end, text)| TimedSegment::new(*start, *end, *text))
            .collect())
    }
}

/// MIME type announced for an audio file, by extension.
fn audio_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}
