//! Local document loading
//!
//! Recursively scans a directory and reads every file with a supported
//! extension into a RawSource. Other files are skipped silently (counted
//! in metrics, logged at debug).

use crate::errors::IngestionError;
use async_trait::async_trait;
use caseforge_common::errors::Result;
use caseforge_common::metrics::record_skip;
use caseforge_common::model::{ContentType, RawContent, RawSource, SourceId};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// File extensions the filesystem loader reads
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "html", "htm", "pdf"];

/// Loads local sources for local and hybrid source modes
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Vec<RawSource>>;
}

/// Filesystem loader backed by walkdir
#[derive(Debug, Clone, Default)]
pub struct FsDocumentLoader {
    follow_links: bool,
}

impl FsDocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    fn scan(root: &Path, follow_links: bool) -> std::result::Result<Vec<RawSource>, IngestionError> {
        if !root.is_dir() {
            return Err(IngestionError::DirectoryNotFound(root.display().to_string()));
        }

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(root).follow_links(follow_links).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let supported = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if supported {
                paths.push(entry.into_path());
            } else {
                record_skip("unsupported_extension");
                debug!(path = %entry.path().display(), "Unsupported extension, skipping file");
            }
        }

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            match read_source(&path) {
                Ok(source) => sources.push(source),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read local document"),
            }
        }
        Ok(sources)
    }
}

fn read_source(path: &Path) -> std::result::Result<RawSource, IngestionError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let content_type = ContentType::from_extension(extension);

    let bytes = std::fs::read(path)?;
    let content = match content_type {
        ContentType::Pdf => RawContent::Binary(bytes),
        _ => RawContent::Text(String::from_utf8_lossy(&bytes).into_owned()),
    };

    let mut source = RawSource::new(
        SourceId::from_origin(&path.display().to_string()),
        content,
        content_type,
    );
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        source = source.with_title(stem);
    }
    Ok(source)
}

#[async_trait]
impl DocumentLoader for FsDocumentLoader {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn load(&self, path: &Path) -> Result<Vec<RawSource>> {
        let root = path.to_path_buf();
        let follow_links = self.follow_links;
        let sources = tokio::task::spawn_blocking(move || Self::scan(&root, follow_links))
            .await
            .map_err(|e| caseforge_common::AppError::Internal {
                message: format!("Document loader task failed: {}", e),
            })??;

        info!(count = sources.len(), "Local documents loaded");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_common::AppError;

    #[tokio::test]
    async fn test_loads_supported_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("complaint.txt"), "The plaintiff alleges...").unwrap();
        std::fs::create_dir(dir.path().join("exhibits")).unwrap();
        std::fs::write(dir.path().join("exhibits/letter.HTML"), "<p>Dunning letter</p>").unwrap();
        std::fs::write(dir.path().join("exhibits/photo.jpg"), [0xff, 0xd8]).unwrap();
        std::fs::write(dir.path().join("notes.docx"), "binary").unwrap();

        let sources = FsDocumentLoader::new().load(dir.path()).await.unwrap();
        assert_eq!(sources.len(), 2);

        let complaint = sources
            .iter()
            .find(|s| s.source_id.as_str().ends_with("complaint.txt"))
            .unwrap();
        assert_eq!(complaint.title.as_deref(), Some("complaint"));
        assert_eq!(complaint.content_type, ContentType::PlainText);

        let letter = sources
            .iter()
            .find(|s| s.source_id.as_str().ends_with("letter.HTML"))
            .unwrap();
        assert_eq!(letter.content_type, ContentType::Html);
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let err = FsDocumentLoader::new()
            .load(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Retrieval { transient: false, .. }));
    }
}
