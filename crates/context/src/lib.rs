//! CaseForge Context Engine
//!
//! Research sessions that turn one query into a bounded, relevance-ranked,
//! citation-traceable context:
//! - Sub-query planning
//! - Concurrent, deduplicated retrieval with a per-session fetch cache
//! - Chunk scoring, threshold filtering and per-sub-query budgets
//! - Cross-sub-query aggregation under a global budget
//! - Hand-off to report generation

pub mod aggregator;
pub mod budget;
pub mod compressor;
pub mod gateway;
pub mod planner;
pub mod retrieval;
pub mod scoring;
pub mod session;
pub mod storage;

pub use aggregator::ContextAggregator;
pub use compressor::ContextCompressor;
pub use gateway::{LlmReportGenerator, ReportGenerator, SynthesisGateway, SynthesisHandoff, SynthesisResult};
pub use planner::QueryPlanner;
pub use retrieval::{Fetcher, HttpFetcher, RetrievalCoordinator, Retriever, StaticRetriever};
pub use scoring::{create_scorer, Scorer, ScoringGranularity};
pub use session::{
    ReadySession, ResearchSession, RetrievalStatus, SessionOutcome, SessionReport, SessionState,
    SubQueryStatus,
};
pub use storage::{create_store, CaptureStore, ContextStore, EphemeralStore};
