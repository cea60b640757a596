//! Ingestion error types

use caseforge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {source_id}: {message}")]
    PdfParse { source_id: String, message: String },

    #[error("HTML parse error: {0}")]
    Html(String),

    #[error("{normalizer} cannot read {kind} content")]
    ContentMismatch {
        normalizer: &'static str,
        kind: &'static str,
    },

    #[error("Invalid chunking configuration: {0}")]
    Chunking(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Directory walk failed: {0}")]
    Walk(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Chunking(message) => AppError::Configuration { message },
            IngestionError::DirectoryNotFound(path) => {
                AppError::retrieval(path, "local document directory not found", false)
            }
            IngestionError::PdfParse { source_id, message } => {
                AppError::Normalization { source_id, message }
            }
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
