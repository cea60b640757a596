//! CaseForge Ingestion
//!
//! Turns raw sources into chunked text:
//! - Content-type registry and normalizers (plain text, markdown, HTML, PDF, paged)
//! - Filesystem document loader for local source modes
//! - Sliding-window chunker with character offsets

pub mod chunker;
pub mod errors;
pub mod html;
pub mod loader;
pub mod normalizer;
pub mod pdf;

pub use chunker::{chunk_document, chunk_documents, ChunkingConfig};
pub use errors::IngestionError;
pub use loader::{DocumentLoader, FsDocumentLoader};
pub use normalizer::{NormalizerRegistry, Resolution, SkipReason, SkipRecord, SourceNormalizer};
