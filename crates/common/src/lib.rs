//! CaseForge Common Library
//!
//! Shared code for the CaseForge research pipeline including:
//! - Domain model (requests, sources, documents, chunks, contexts)
//! - Error types and handling
//! - Configuration management
//! - Embedding and LLM client abstractions
//! - Token estimation
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod tokens;

// Re-export commonly used types
pub use config::{AppConfig, ResearchConfig};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{CompletionRequest, LlmClient};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
