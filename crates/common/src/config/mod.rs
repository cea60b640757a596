//! Configuration management for CaseForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::model::SourceMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Default per-request research options
    #[serde(default)]
    pub research: ResearchConfig,

    /// Worker pool and fetch limits
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Relevance scorer selection
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat completion endpoint (planner, curation, report generation)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Context storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Per-request research options
#[derive(Debug, Clone, Deserialize, Serialize, Validate, PartialEq)]
#[validate(schema(function = "validate_research_config"))]
pub struct ResearchConfig {
    /// Number of sub-queries the planner must produce
    #[serde(default = "default_max_sub_queries")]
    #[validate(range(min = 1, max = 20))]
    pub max_sub_queries: usize,

    /// Descriptors fetched per sub-query
    #[serde(default = "default_max_results_per_query")]
    #[validate(range(min = 1))]
    pub max_results_per_query: usize,

    /// Minimum relevance score a chunk needs to pass the filter
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// Chunk size in characters
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 1))]
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_token_budget_per_sub_query")]
    #[validate(range(min = 1))]
    pub token_budget_per_sub_query: usize,

    #[serde(default = "default_global_token_budget")]
    #[validate(range(min = 1))]
    pub global_token_budget: usize,

    /// Chunks kept regardless of threshold when nothing passes it
    #[serde(default = "default_fallback_top_k")]
    #[validate(range(min = 1))]
    pub fallback_top_k: usize,

    #[serde(default)]
    pub source_mode: SourceMode,

    /// Directory scanned in local and hybrid modes
    #[serde(default)]
    pub local_documents_path: Option<PathBuf>,
}

fn validate_research_config(config: &ResearchConfig) -> Result<(), ValidationError> {
    if !config.similarity_threshold.is_finite() {
        return Err(ValidationError::new("similarity_threshold")
            .with_message(Cow::Borrowed("similarity_threshold must be a finite number in [0, 1]")));
    }
    if config.chunk_overlap >= config.chunk_size {
        return Err(ValidationError::new("chunk_overlap")
            .with_message(Cow::Borrowed("chunk_overlap must be smaller than chunk_size")));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConcurrencyConfig {
    /// Sub-query pipelines running at once
    #[serde(default = "default_pipeline_parallelism")]
    pub pipeline_parallelism: usize,

    /// Source fetches in flight at once, across all sub-queries
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Per sub-query pipeline stage timeout in seconds
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout_secs: u64,

    /// Per fetch attempt timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Retries for transient fetch failures
    #[serde(default = "default_fetch_retries")]
    pub fetch_max_retries: u32,

    #[serde(default = "default_fetch_backoff")]
    pub fetch_initial_backoff_ms: u64,
}

/// Which Scorer implementation a session gets
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// Cosine similarity of chunk and sub-query embeddings
    #[default]
    Embedding,
    /// Query-term coverage, no external calls
    Lexical,
    /// LLM rates whole documents
    Curation,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub scorer: ScorerKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Bearer token; omitted for local endpoints
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

/// Context storage backend
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Keep everything in memory for the session only
    #[default]
    Ephemeral,
    /// Persist fetched sources and compressed contexts to disk
    Capture,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the capture backend
    #[serde(default = "default_capture_root")]
    pub capture_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_sub_queries() -> usize { 5 }
fn default_max_results_per_query() -> usize { 10 }
fn default_similarity_threshold() -> f32 { 0.35 }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 100 }
fn default_token_budget_per_sub_query() -> usize { 2000 }
fn default_global_token_budget() -> usize { 8000 }
fn default_fallback_top_k() -> usize { 3 }
fn default_pipeline_parallelism() -> usize { 4 }
fn default_fetch_concurrency() -> usize { 8 }
fn default_pipeline_timeout() -> u64 { 120 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_fetch_retries() -> u32 { 2 }
fn default_fetch_backoff() -> u64 { 250 }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_temperature() -> f32 { 0.4 }
fn default_llm_max_tokens() -> usize { 1200 }
fn default_capture_root() -> PathBuf { std::env::temp_dir() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "caseforge".to_string() }

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub_queries: default_max_sub_queries(),
            max_results_per_query: default_max_results_per_query(),
            similarity_threshold: default_similarity_threshold(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            token_budget_per_sub_query: default_token_budget_per_sub_query(),
            global_token_budget: default_global_token_budget(),
            fallback_top_k: default_fallback_top_k(),
            source_mode: SourceMode::default(),
            local_documents_path: None,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            pipeline_parallelism: default_pipeline_parallelism(),
            fetch_concurrency: default_fetch_concurrency(),
            pipeline_timeout_secs: default_pipeline_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_max_retries: default_fetch_retries(),
            fetch_initial_backoff_ms: default_fetch_backoff(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn fetch_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_initial_backoff_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            capture_root: default_capture_root(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__RESEARCH__CHUNK_SIZE=800
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.research.chunk_size, 1000);
        assert_eq!(config.research.max_results_per_query, 10);
        assert!((config.research.similarity_threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.scoring.scorer, ScorerKind::Embedding);
        assert!(config.research.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = ResearchConfig::default();
        config.similarity_threshold = 1.5;
        assert_err!(config.validate());

        config.similarity_threshold = f32::NAN;
        assert_err!(config.validate());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = ResearchConfig::default();
        config.chunk_size = 100;
        config.chunk_overlap = 100;
        assert_err!(config.validate());

        config.chunk_overlap = 99;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = ResearchConfig::default();
        config.global_token_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("caseforge-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(
            &path,
            "[research]\nchunk_size = 800\nsource_mode = \"hybrid\"\n\n[scoring]\nscorer = \"lexical\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.research.chunk_size, 800);
        assert_eq!(config.research.chunk_overlap, 100);
        assert_eq!(config.research.source_mode, SourceMode::Hybrid);
        assert_eq!(config.scoring.scorer, ScorerKind::Lexical);

        std::fs::remove_dir_all(&dir).ok();
    }
}
