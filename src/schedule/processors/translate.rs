use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{StageContext, Translator};
use crate::config::TranslateConfig;
use crate::schedule::types::TimedSegment;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

static NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\s*[.)]\s*").unwrap());

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Batch translator over an OpenAI-compatible `chat/completions` endpoint.
///
/// Segments are sent `batch_size` at a time as a numbered list and the reply
/// must carry exactly one line per segment. Requests from every job share one
/// rate limiter.
pub struct ChatTranslator {
    client: reqwest::Client,
    config: TranslateConfig,
    limiter: Arc<DirectRateLimiter>,
}

impl ChatTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| anyhow!("TRANSLATE_REQUESTS_PER_SECOND must be at least 1"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            config,
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a skilled translator from {} to {}. Provide accurate, natural-sounding translations.",
            self.config.source_language, self.config.target_language
        )
    }

    fn batch_prompt(&self, batch: &[TimedSegment]) -> String {
        let numbered = batch
            .iter()
            .enumerate()
            .map(|(i, segment)| format!("{}. {}", i + 1, segment.text))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Translate the following {} text segments to {}.\n\
             Keep the same meaning and style. Return ONLY the translations in the same order,\n\
             one per line, without adding any explanation or additional text:\n\n{}",
            self.config.source_language, self.config.target_language, numbered
        )
    }

    async fn translate_batch(&self, batch: &[TimedSegment]) -> Result<Vec<String>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("translation provider API key is not configured"))?;

        self.limiter.until_ready().await;

        let body = json!({
            "model": self.config.model,
            "temperature": 0.3,
            "max_tokens": 1000,
            "messages": [
                { "role": "system", "content": self.system_prompt() },
                { "role": "user", "content": self.batch_prompt(batch) },
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("translation provider unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("translation provider returned {}: {}", status, text.trim());
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("translation provider returned no choices"))?;

        parse_numbered_lines(&content, batch.len())
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, segments: &[TimedSegment], ctx: &StageContext) -> Result<Vec<TimedSegment>> {
        info!("Translating {} segments for job {}", segments.len(), ctx.job_id);

        let batch_size = self.config.batch_size.max(1);
        let batch_count = segments.len().div_ceil(batch_size).max(1);
        let mut translated = Vec::with_capacity(segments.len());

        for (index, batch) in segments.chunks(batch_size).enumerate() {
            if ctx.is_cancelled() {
                bail!("translation interrupted by cancellation");
            }

            let lines = tokio::select! {
                lines = self.translate_batch(batch) => {
                    lines.with_context(|| format!("batch {} of {} failed", index + 1, batch_count))?
                }
                _ = ctx.cancel_token().cancelled() => bail!("translation interrupted by cancellation"),
            };

            translated.extend(
                batch
                    .iter()
                    .zip(lines)
                    .map(|(segment, text)| TimedSegment::new(segment.start, segment.end, text)),
            );

            let percent = 5 + (90 * (index + 1) / batch_count) as u8;
            debug!("Job {} translated batch {}/{}", ctx.job_id, index + 1, batch_count);
            ctx.report(percent).await;
        }

        Ok(translated)
    }
}

/// Splits a numbered reply into exactly `expected` lines with the numbering
/// removed.
pub fn parse_numbered_lines(reply: &str, expected: usize) -> Result<Vec<String>> {
    let lines: Vec<String> = reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| NUMBERING.replace(line, "").trim().to_string())
        .collect();

    if lines.len() != expected {
        bail!(
            "expected {} translated lines but the provider returned {}",
            expected,
            lines.len()
        );
    }
    if let Some(blank) = lines.iter().position(|line| line.is_empty()) {
        bail!("translated line {} is empty", blank + 1);
    }
    Ok(lines)
}
