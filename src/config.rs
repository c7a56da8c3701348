//! Environment-driven configuration.
//!
//! Every key is read from the process environment first and from `.env`
//! second; unset keys fall back to the defaults below.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_SOURCE_URL_PATTERN: &str = r"^https?://(www\.|m\.)?(youtube\.com|youtu\.be)/.+";
const DEFAULT_TRANSCRIBE_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_TRANSLATE_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Speech-to-text provider settings.
#[derive(Clone, Debug)]
pub struct TranscribeConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub language: String,
}

/// Chat-completion translation provider settings.
#[derive(Clone, Debug)]
pub struct TranslateConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub batch_size: usize,
    pub requests_per_second: u32,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Uploaded audio lands in `<upload_dir>/audio`
    pub upload_dir: PathBuf,
    /// Rendered documents, one sub-directory per kind
    pub output_dir: PathBuf,
    /// Downloaded and trimmed audio
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_jobs_in_memory: usize,
    pub upload_cleanup_delay: Duration,
    pub max_upload_bytes: usize,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub source_url_pattern: String,
    pub transcribe: TranscribeConfig,
    pub translate: TranslateConfig,
    pub use_simulation: bool,
}

/// Reads a key from the environment, then from `.env`.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .or_else(|_| dotenv::var(key))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let openai_key = var("OPENAI_API_KEY");
        let transcribe_key = var("TRANSCRIBE_API_KEY").or_else(|| openai_key.clone());
        // 没有语音服务密钥时默认使用模拟转写
        let use_simulation = parse_or("USE_SIMULATION", transcribe_key.is_none())?;

        let config = Self {
            host: var_or("HOST", "127.0.0.1"),
            port: parse_or("PORT", 4000)?,
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "uploads")),
            output_dir: PathBuf::from(var_or("OUTPUT_DIR", "outputs")),
            temp_dir: PathBuf::from(var_or("TEMP_DIR", "temp")),
            log_dir: PathBuf::from(var_or("LOG_DIR", "logs")),
            max_jobs_in_memory: parse_or::<usize>("MAX_JOBS_IN_MEMORY", 100)?.max(1),
            upload_cleanup_delay: Duration::from_secs(parse_or("UPLOAD_CLEANUP_DELAY_SECS", 3600)?),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            ytdlp_path: var_or("YTDLP_PATH", "yt-dlp"),
            ffmpeg_path: var_or("FFMPEG_PATH", "ffmpeg"),
            source_url_pattern: var_or("SOURCE_URL_PATTERN", DEFAULT_SOURCE_URL_PATTERN),
            transcribe: TranscribeConfig {
                api_key: transcribe_key,
                endpoint: var_or("TRANSCRIBE_ENDPOINT", DEFAULT_TRANSCRIBE_ENDPOINT),
                model: var_or("TRANSCRIBE_MODEL", "whisper-1"),
                language: var_or("TRANSCRIBE_LANGUAGE", "ar"),
            },
            translate: TranslateConfig {
                api_key: openai_key,
                endpoint: var_or("TRANSLATE_ENDPOINT", DEFAULT_TRANSLATE_ENDPOINT),
                model: var_or("TRANSLATE_MODEL", "gpt-3.5-turbo"),
                batch_size: parse_or::<usize>("TRANSLATE_BATCH_SIZE", 5)?.max(1),
                requests_per_second: parse_or::<u32>("TRANSLATE_REQUESTS_PER_SECOND", 5)?.max(1),
                source_language: var_or("SOURCE_LANGUAGE", "Arabic"),
                target_language: var_or("TARGET_LANGUAGE", "English"),
            },
            use_simulation,
        };

        regex::Regex::new(&config.source_url_pattern)
            .with_context(|| format!("invalid SOURCE_URL_PATTERN: {}", config.source_url_pattern))?;

        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn audio_upload_dir(&self) -> PathBuf {
        self.upload_dir.join("audio")
    }

    /// Creates every directory the service writes to.
    pub fn ensure_dirs(&self) -> Result<()> {
        let mut dirs = vec![
            self.audio_upload_dir(),
            self.temp_dir.clone(),
            self.log_dir.clone(),
        ];
        dirs.extend(
            crate::schedule::types::ArtifactKind::all()
                .iter()
                .map(|kind| self.output_dir.join(kind.dir_name())),
        );
        for dir in dirs {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Settings for tests and local tooling: everything under `root`,
    /// simulated transcription, no provider keys.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
            temp_dir: root.join("temp"),
            log_dir: root.join("logs"),
            max_jobs_in_memory: 100,
            upload_cleanup_delay: Duration::from_secs(3600),
            max_upload_bytes: 50 * 1024 * 1024,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            source_url_pattern: DEFAULT_SOURCE_URL_PATTERN.to_string(),
            transcribe: TranscribeConfig {
                api_key: None,
                endpoint: DEFAULT_TRANSCRIBE_ENDPOINT.to_string(),
                model: "whisper-1".to_string(),
                language: "ar".to_string(),
            },
            translate: TranslateConfig {
                api_key: None,
                endpoint: DEFAULT_TRANSLATE_ENDPOINT.to_string(),
                model: "gpt-3.5-turbo".to_string(),
                batch_size: 5,
                requests_per_second: 5,
                source_language: "Arabic".to_string(),
                target_language: "English".to_string(),
            },
            use_simulation: true,
        }
    }
}
