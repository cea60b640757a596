//! Error types for CaseForge
//!
//! Provides the error taxonomy used across the research pipeline:
//! - Session-fatal errors (planning, configuration)
//! - Per-source errors that degrade a single sub-query (retrieval)
//! - Per-sub-query errors that empty a single contribution (scoring)
//! - Error codes for machine-readable reporting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation & configuration (1xxx)
    ValidationError,
    ConfigurationError,

    // Planning (2xxx)
    PlanningError,

    // Retrieval (3xxx)
    RetrievalError,
    NormalizationError,
    NoSources,

    // Scoring (4xxx)
    ScoringError,

    // Upstream services (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,
    LlmError,
    Timeout,

    // Internal (9xxx)
    StorageError,
    InternalError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::ConfigurationError => 1002,

            ErrorCode::PlanningError => 2001,

            ErrorCode::RetrievalError => 3001,
            ErrorCode::NormalizationError => 3002,
            ErrorCode::NoSources => 3003,

            ErrorCode::ScoringError => 4001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::LlmError => 8004,
            ErrorCode::Timeout => 8005,

            ErrorCode::StorageError => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Planner output could not be turned into sub-queries
    #[error("Planning failed: {message}")]
    Planning { message: String },

    // A single source could not be retrieved
    #[error("Retrieval failed for {source_id}: {message}")]
    Retrieval {
        source_id: String,
        message: String,
        transient: bool,
    },

    #[error("Normalization failed for {source_id}: {message}")]
    Normalization { source_id: String, message: String },

    #[error("No sources retrieved for any sub-query")]
    NoSources,

    // The scorer failed for one sub-query
    #[error("Scoring failed for sub-query {sub_query}: {message}")]
    Scoring { sub_query: String, message: String },

    // External service errors
    #[error("{service} returned an error: {message}")]
    Upstream {
        service: String,
        message: String,
        transient: bool,
    },

    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("LLM error: {message}")]
    Llm { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Planning { .. } => ErrorCode::PlanningError,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::Normalization { .. } => ErrorCode::NormalizationError,
            AppError::NoSources => ErrorCode::NoSources,
            AppError::Scoring { .. } => ErrorCode::ScoringError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::Llm { .. } => ErrorCode::LlmError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Errors that abort the whole research session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Planning { .. }
                | AppError::Configuration { .. }
                | AppError::Validation { .. }
                | AppError::NoSources
        )
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Retrieval { transient, .. } | AppError::Upstream { transient, .. } => *transient,
            AppError::Timeout { .. } | AppError::EmbeddingTimeout { .. } => true,
            AppError::HttpClient(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Shorthand for a retrieval failure of one source
    pub fn retrieval(source_id: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        AppError::Retrieval {
            source_id: source_id.into(),
            message: message.into(),
            transient,
        }
    }
}

impl AppError {
    /// Classify a non-success HTTP status from an upstream service
    pub fn upstream_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        AppError::Upstream {
            service: service.to_string(),
            message: format!("status {}: {}", status, body),
            transient: status.is_server_error() || status.as_u16() == 429,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Structured error record, used in session reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AppError> for ErrorDetails {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::Planning { message: "bad output".into() };
        assert_eq!(err.code(), ErrorCode::PlanningError);
        assert_eq!(err.code().as_code(), 2001);
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_retrieval_error_is_recoverable() {
        let err = AppError::retrieval("https://example.com/a", "503", true);
        assert_eq!(err.code(), ErrorCode::RetrievalError);
        assert!(!err.is_session_fatal());
        assert!(err.is_transient());

        let permanent = AppError::retrieval("https://example.com/a", "404", false);
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_scoring_error_not_session_fatal() {
        let err = AppError::Scoring {
            sub_query: "sq-1".into(),
            message: "embedder down".into(),
        };
        assert!(!err.is_session_fatal());
        assert!(!err.is_transient());
        let details = ErrorDetails::from(&err);
        assert_eq!(details.code, ErrorCode::ScoringError);
        assert!(details.message.contains("sq-1"));
    }

    #[test]
    fn test_upstream_status_classification() {
        let busy = AppError::upstream_status("llm", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(busy.is_transient());
        assert_eq!(busy.code().as_code(), 8001);

        let denied = AppError::upstream_status("llm", reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(!denied.is_transient());
    }
}
