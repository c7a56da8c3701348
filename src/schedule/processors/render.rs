use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::info;

use super::Renderer;
use crate::schedule::types::{ArtifactKind, TimedSegment};

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 40;
const FONT_SIZE: i64 = 12;
const TITLE_SIZE: i64 = 16;
const LEADING: i64 = 18;
const WRAP_AT: usize = 90;

/// `m:ss`, as used in Markdown and PDF documents.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// `HH:MM:SS,mmm`, as used in SRT cues.
pub fn format_srt_time(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        millis / 3_600_000,
        (millis / 60_000) % 60,
        (millis / 1000) % 60,
        millis % 1000
    )
}

/// Makes a title safe to use as a file name.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' ') { c } else { '_' })
        .take(100)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "transcript".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<output_dir>/<kind>/<sanitized title>_<millis>_<job id>.<ext>`. The job
/// id keeps documents of jobs with the same title apart.
pub fn output_path(output_dir: &Path, kind: ArtifactKind, title: &str, job_id: &str) -> PathBuf {
    let job_id: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    output_dir.join(kind.dir_name()).join(format!(
        "{}_{}_{}.{}",
        sanitize_title(title),
        Utc::now().timestamp_millis(),
        job_id,
        kind.extension()
    ))
}

fn timestamp_label(segment: &TimedSegment, offset: f64) -> String {
    format!(
        "[{} - {}]",
        format_clock(segment.start + offset),
        format_clock(segment.end + offset)
    )
}

async fn write_document(path: &Path, contents: Vec<u8>) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}

pub struct MarkdownRenderer {
    language: String,
}

impl MarkdownRenderer {
    pub fn new(language: impl Into<String>) -> Self {
        Self { language: language.into() }
    }

    pub fn render_to_string(&self, segments: &[TimedSegment], title: &str, time_offset: f64) -> String {
        let mut markdown = format!("# {}\n\n## {} Transcript with Timestamps\n\n", title.trim(), self.language);
        for segment in segments {
            let _ = write!(markdown, "**{}** {}\n\n", timestamp_label(segment, time_offset), segment.text);
        }
        markdown
    }
}

#[async_trait]
impl Renderer for MarkdownRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Markdown
    }

    async fn render(&self, segments: &[TimedSegment], title: &str, output_path: &Path, time_offset: f64) -> Result<PathBuf> {
        let markdown = self.render_to_string(segments, title, time_offset);
        let path = write_document(output_path, markdown.into_bytes()).await?;
        info!("Markdown document saved to {}", path.display());
        Ok(path)
    }
}

pub struct SrtRenderer;

impl SrtRenderer {
    pub fn render_to_string(segments: &[TimedSegment], time_offset: f64) -> String {
        let mut srt = String::new();
        for (index, segment) in segments.iter().enumerate() {
            let _ = write!(
                srt,
                "{}\n{} --> {}\n{}\n\n",
                index + 1,
                format_srt_time(segment.start + time_offset),
                format_srt_time(segment.end + time_offset),
                segment.text.trim()
            );
        }
        srt
    }
}

#[async_trait]
impl Renderer for SrtRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Srt
    }

    async fn render(&self, segments: &[TimedSegment], _title: &str, output_path: &Path, time_offset: f64) -> Result<PathBuf> {
        let srt = Self::render_to_string(segments, time_offset);
        let path = write_document(output_path, srt.into_bytes()).await?;
        info!("SRT subtitles saved to {}", path.display());
        Ok(path)
    }
}

/// Plain Helvetica PDF, one timestamped paragraph per segment.
pub struct PdfRenderer {
    language: String,
}

impl PdfRenderer {
    pub fn new(language: impl Into<String>) -> Self {
        Self { language: language.into() }
    }

    fn build(&self, segments: &[TimedSegment], title: &str, time_offset: f64) -> Result<Vec<u8>> {
        let mut lines: Vec<(i64, String)> = vec![
            (TITLE_SIZE, title.trim().to_string()),
            (FONT_SIZE, format!("{} Transcript with Timestamps", self.language)),
            (FONT_SIZE, String::new()),
        ];
        for segment in segments {
            let paragraph = format!("{} {}", timestamp_label(segment, time_offset), segment.text.trim());
            lines.extend(wrap_words(&paragraph, WRAP_AT).into_iter().map(|line| (FONT_SIZE, line)));
        }

        // 超出下边距时换页
        let mut pages: Vec<Vec<u8>> = Vec::new();
        let mut content = Vec::new();
        let mut y = PAGE_HEIGHT - MARGIN;
        for (size, line) in lines {
            if y < MARGIN {
                pages.push(std::mem::take(&mut content));
                y = PAGE_HEIGHT - MARGIN;
            }
            if !line.is_empty() {
                content.extend_from_slice(format!("BT /F1 {} Tf {} {} Td (", size, MARGIN, y).as_bytes());
                content.extend(encode_pdf_text(&line));
                content.extend_from_slice(b") Tj ET\n");
            }
            y -= LEADING;
        }
        pages.push(content);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let kids: Vec<ObjectId> = pages
            .into_iter()
            .map(|content| {
                let content_id = doc.add_object(Stream::new(dictionary! {}, content));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                    "Resources" => resources_id,
                    "Contents" => content_id,
                })
            })
            .collect();

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids.into_iter().map(Object::from).collect::<Vec<_>>(),
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).context("failed to serialize PDF")?;
        Ok(buffer)
    }
}

#[async_trait]
impl Renderer for PdfRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Pdf
    }

    async fn render(&self, segments: &[TimedSegment], title: &str, output_path: &Path, time_offset: f64) -> Result<PathBuf> {
        let renderer = PdfRenderer::new(self.language.clone());
        let segments = segments.to_vec();
        let title = title.to_string();
        let bytes = tokio::task::spawn_blocking(move || renderer.build(&segments, &title, time_offset))
            .await
            .context("PDF rendering task panicked")??;

        let path = write_document(output_path, bytes).await?;
        info!("PDF saved to {}", path.display());
        Ok(path)
    }
}

/// Greedy word wrap; words longer than `width` get a line of their own.
fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Latin-1 bytes for a PDF literal string. Characters the standard font
/// cannot show become `?`.
fn encode_pdf_text(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                bytes.push(b'\\');
                bytes.push(c as u8);
            }
            c if (c as u32) < 0x20 => bytes.push(b' '),
            c if (c as u32) <= 0xFF => bytes.push(c as u32 as u8),
            _ => bytes.push(b'?'),
        }
    }
    bytes
}
