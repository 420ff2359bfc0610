//! Transcript persistence.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::info;

/// Metadata written alongside the transcript text.
#[derive(Debug, Clone, Default)]
pub struct TranscriptMeta {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub audio_seconds: f64,
}

/// Writes a finished transcript somewhere durable.
#[async_trait::async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Persists the transcript, returning the written path.
    async fn save(&self, text: &str, meta: &TranscriptMeta) -> Result<PathBuf>;
}

fn render(text: &str, meta: &TranscriptMeta, now: DateTime<Local>) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# Transcript {}\n\n", now.format("%Y-%m-%d %H:%M")));
    doc.push_str(&format!("- Session: {}\n", meta.session_id));
    if let Some(started) = meta.started_at {
        doc.push_str(&format!("- Started: {}\n", started.to_rfc3339()));
    }
    doc.push_str(&format!("- Audio: {:.0} s\n\n", meta.audio_seconds));
    doc.push_str(text.trim());
    doc.push('\n');
    doc
}

/// Markdown files named `{prefix}-YYYY-MM-DD-HHMM.md` in one directory.
pub struct MarkdownStore {
    directory: PathBuf,
    prefix: String,
}

impl MarkdownStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl TranscriptStore for MarkdownStore {
    async fn save(&self, text: &str, meta: &TranscriptMeta) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("failed to create {}", self.directory.display()))?;

        let now = Local::now();
        let mut path = self
            .directory
            .join(format!("{}-{}.md", self.prefix, now.format("%Y-%m-%d-%H%M")));
        // A second save in the same minute gets a seconds-qualified name
        // instead of clobbering the first.
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self
                .directory
                .join(format!("{}-{}.md", self.prefix, now.format("%Y-%m-%d-%H%M%S")));
        }

        let doc = render(text, meta, now);
        tokio::fs::write(&path, doc)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("transcript saved to {}", path.display());
        Ok(path)
    }
}

/// Writes every transcript to one caller-chosen path.
pub struct FixedPathStore {
    path: PathBuf,
}

impl FixedPathStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl TranscriptStore for FixedPathStore {
    async fn save(&self, text: &str, meta: &TranscriptMeta) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let doc = render(text, meta, Local::now());
        tokio::fs::write(&self.path, doc)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        info!("transcript saved to {}", self.path.display());
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_creates_directory_and_writes_markdown() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("notes").join("transcripts");
        let store = MarkdownStore::new(&nested, "capture");

        let meta = TranscriptMeta {
            session_id: "abc-123".to_string(),
            started_at: Some(Utc::now()),
            audio_seconds: 12.4,
        };
        let path = store.save("hello there", &meta).await.unwrap();

        assert!(path.starts_with(&nested));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("capture-"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("hello there"));
        assert!(body.contains("abc-123"));
    }

    #[tokio::test]
    async fn test_second_save_in_the_same_minute_gets_its_own_file() {
        let dir = TempDir::new().unwrap();
        let store = MarkdownStore::new(dir.path(), "capture");
        let meta = TranscriptMeta::default();

        let first = store.save("one", &meta).await.unwrap();
        let second = store.save("two", &meta).await.unwrap();

        assert_ne!(first, second);
        assert!(std::fs::read_to_string(&second).unwrap().contains("two"));
    }

    #[test]
    fn test_render_skips_missing_start_time() {
        let meta = TranscriptMeta {
            session_id: "s".to_string(),
            started_at: None,
            audio_seconds: 0.0,
        };
        let doc = render("text", &meta, Local::now());
        assert!(!doc.contains("Started:"));
        assert!(doc.ends_with("text\n"));
    }

    #[tokio::test]
    async fn test_fixed_path_store_writes_exactly_where_asked() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out").join("note.md");
        let store = FixedPathStore::new(&target);

        let path = store.save("pinned", &TranscriptMeta::default()).await.unwrap();
        assert_eq!(path, target);
        assert!(std::fs::read_to_string(&target).unwrap().contains("pinned"));
    }
}
