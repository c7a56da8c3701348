use std::path::Path;

use serde::{Deserialize, Serialize};

/// Envelope for every JSON response of the HTTP surface.
#[derive(Debug, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when
/// anything was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Name an uploaded file is stored under: `upload-<millis>-<uuid><ext>`.
/// The extension is taken from the client's filename, `.mp3` when it has none.
pub fn upload_file_name(original: Option<&str>) -> String {
    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| ".mp3".to_string());

    format!(
        "upload-{}-{}{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4(),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_preview("abcdefghijkl", 10), "abcdefghij...");

        // 按字符截断，不会切断多字节字符
        let arabic = "مرحبا بكم";
        assert_eq!(truncate_preview(arabic, 5), "مرحبا...");
    }

    #[test]
    fn test_upload_file_name() {
        let name = upload_file_name(Some("lecture.WAV"));
        assert!(name.starts_with("upload-"));
        assert!(name.ends_with(".wav"));

        assert!(upload_file_name(None).ends_with(".mp3"));
        assert!(upload_file_name(Some("no_extension")).ends_with(".mp3"));
        assert!(upload_file_name(Some("../../etc/passwd.m4a/..")).ends_with(".mp3"));
        assert_ne!(upload_file_name(None), upload_file_name(None));
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"], 42);
        assert!(ok["error"].is_null());

        let err = serde_json::to_value(ApiResponse::<()>::error("boom")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "boom");
    }
}
