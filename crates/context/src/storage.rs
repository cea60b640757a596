//! Context storage backends
//!
//! The session writes fetched sources, compressed contexts and its final
//! report through a [`ContextStore`]. Store errors are logged by the caller
//! and never fail a session.

use crate::session::SessionReport;
use async_trait::async_trait;
use caseforge_common::config::{StorageBackend, StorageConfig};
use caseforge_common::errors::{AppError, Result};
use caseforge_common::model::{CompressedContext, ContentType, RawContent, RawSource};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait ContextStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record_source(&self, session_id: Uuid, source: &RawSource) -> Result<()>;

    async fn record_compressed(&self, session_id: Uuid, context: &CompressedContext) -> Result<()>;

    async fn finalize(&self, session_id: Uuid, report: &SessionReport) -> Result<()>;
}

pub fn create_store(config: &StorageConfig) -> Arc<dyn ContextStore> {
    match config.backend {
        StorageBackend::Ephemeral => Arc::new(EphemeralStore::new()),
        StorageBackend::Capture => Arc::new(CaptureStore::new(config.capture_root.clone())),
    }
}

/// In-memory store; everything is dropped with the session
#[derive(Default)]
pub struct EphemeralStore {
    sources: RwLock<Vec<RawSource>>,
    compressed: RwLock<Vec<CompressedContext>>,
    report: RwLock<Option<SessionReport>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sources(&self) -> Vec<RawSource> {
        self.sources.read().await.clone()
    }

    pub async fn compressed(&self) -> Vec<CompressedContext> {
        self.compressed.read().await.clone()
    }

    pub async fn report(&self) -> Option<SessionReport> {
        self.report.read().await.clone()
    }
}

#[async_trait]
impl ContextStore for EphemeralStore {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    async fn record_source(&self, _session_id: Uuid, source: &RawSource) -> Result<()> {
        self.sources.write().await.push(source.clone());
        Ok(())
    }

    async fn record_compressed(&self, _session_id: Uuid, context: &CompressedContext) -> Result<()> {
        self.compressed.write().await.push(context.clone());
        Ok(())
    }

    async fn finalize(&self, _session_id: Uuid, report: &SessionReport) -> Result<()> {
        *self.report.write().await = Some(report.clone());
        Ok(())
    }
}

/// Writes everything under `<root>/research_<session-id>/` for inspection
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(format!("research_{}", session_id))
    }

    /// Stable file name for a source: hashed id plus a content-type extension
    pub fn source_file_name(source: &RawSource) -> String {
        let digest = hex::encode(Sha256::digest(source.source_id.as_str().as_bytes()));
        let extension = match &source.content_type {
            ContentType::PlainText | ContentType::Paged => "txt",
            ContentType::Markdown => "md",
            ContentType::Html => "html",
            ContentType::Pdf => "pdf",
            ContentType::Unknown(_) => "bin",
        };
        format!("source_{}.{}", &digest[..16], extension)
    }

    async fn write(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| AppError::Storage {
            message: format!("failed to create {}: {}", dir.display(), e),
        })?;
        let path = dir.join(name);
        tokio::fs::write(&path, bytes).await.map_err(|e| AppError::Storage {
            message: format!("failed to write {}: {}", path.display(), e),
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Captured");
        Ok(())
    }

    async fn write_json<T: Serialize + Sync>(&self, session_id: Uuid, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(&self.session_dir(session_id), name, &bytes).await
    }
}

#[async_trait]
impl ContextStore for CaptureStore {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn record_source(&self, session_id: Uuid, source: &RawSource) -> Result<()> {
        let bytes = match &source.content {
            RawContent::Text(text) => text.clone().into_bytes(),
            RawContent::Pages(pages) => pages.join("\n\u{c}\n").into_bytes(),
            RawContent::Binary(bytes) => bytes.clone(),
        };
        let name = Self::source_file_name(source);
        self.write(&self.session_dir(session_id), &name, &bytes).await
    }

    async fn record_compressed(&self, session_id: Uuid, context: &CompressedContext) -> Result<()> {
        let name = format!("compressed_{}.json", context.sub_query.id);
        self.write_json(session_id, &name, context).await
    }

    async fn finalize(&self, session_id: Uuid, report: &SessionReport) -> Result<()> {
        self.write_json(session_id, "_manifest.json", report).await
    }
}
