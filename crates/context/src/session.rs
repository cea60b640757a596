//! Research session state machine
//!
//! ```text
//! CREATED -> PLANNING -> RETRIEVING -> COMPRESSING -> AGGREGATING -> READY_FOR_SYNTHESIS -> DONE
//!               |            |
//!               +-> FAILED <-+
//! ```
//!
//! A session fails only when planning fails, or when no sub-query found a
//! usable source and there are no case documents to fall back on. Every
//! other failure (a dead source, a timed-out pipeline, a scorer error) is
//! contained in the affected sub-query and shows up in the report.
//!
//! Each sub-query runs retrieve then compress as one pipeline under its own
//! deadline, so a slow sibling never delays another pipeline's compression.
//! The join after all pipelines is where the session decides between
//! FAILED (no sources) and COMPRESSING; the COMPRESSING state then collects
//! the per-pipeline results for aggregation.

use crate::aggregator::ContextAggregator;
use crate::compressor::ContextCompressor;
use crate::gateway::{load_case_documents, CaseDocumentError, SynthesisGateway, SynthesisHandoff, SynthesisResult};
use crate::planner::QueryPlanner;
use crate::retrieval::{CachedSource, FetchFailure, Fetcher, RetrievalCoordinator, Retriever, SubQueryRetrieval};
use crate::scoring::Scorer;
use crate::storage::{ContextStore, EphemeralStore};
use caseforge_common::config::ConcurrencyConfig;
use caseforge_common::errors::{AppError, ErrorDetails, Result};
use caseforge_common::metrics::{record_session, StageTimer};
use caseforge_common::model::{
    AggregatedContext, CompressedContext, ResearchRequest, SourceId, SubQuery, TruncationEvent,
};
use caseforge_ingestion::{DocumentLoader, FsDocumentLoader, SkipRecord, SourceNormalizer};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    Planning,
    Retrieving,
    Compressing,
    Aggregating,
    ReadyForSynthesis,
    Done,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Planning)
                | (Planning, Retrieving)
                | (Planning, Failed)
                | (Retrieving, Compressing)
                | (Retrieving, Failed)
                | (Compressing, Aggregating)
                | (Aggregating, ReadyForSynthesis)
                | (ReadyForSynthesis, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Planning => "planning",
            SessionState::Retrieving => "retrieving",
            SessionState::Compressing => "compressing",
            SessionState::Aggregating => "aggregating",
            SessionState::ReadyForSynthesis => "ready_for_synthesis",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQueryStatus {
    /// Produced a non-empty compressed context
    Succeeded,
    /// No source text for this sub-query
    Empty,
    /// Pipeline exceeded its timeout; excluded from aggregation
    TimedOut,
    /// Scorer failed; contributes nothing
    ScoringFailed,
}

impl SubQueryStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, SubQueryStatus::TimedOut | SubQueryStatus::ScoringFailed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryReport {
    pub sub_query: SubQuery,
    pub status: SubQueryStatus,
    pub sources: Vec<SourceId>,
    pub fetch_failures: Vec<FetchFailure>,
    pub skipped: Vec<SkipRecord>,
    pub chunks_produced: usize,
    pub chunks_kept: usize,
    pub fallback_used: bool,
    pub error: Option<String>,
}

impl SubQueryReport {
    fn new(sub_query: SubQuery, status: SubQueryStatus) -> Self {
        Self {
            sub_query,
            status,
            sources: Vec::new(),
            fetch_failures: Vec::new(),
            skipped: Vec::new(),
            chunks_produced: 0,
            chunks_kept: 0,
            fallback_used: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStats {
    /// Descriptors requested, summed over sub-queries
    pub requested: usize,
    /// Distinct sources actually fetched
    pub fetched: usize,
    pub cache_hits: usize,
    /// Distinct sources that failed after retries
    pub failed: usize,
}

/// How retrieval ended for a session that reached synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    Completed,
    /// No sub-query found a source; the hand-off carries case documents only
    EmptyWithCaseDocuments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub query: String,
    pub state: SessionState,
    pub sub_queries: Vec<SubQueryReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub fetch: FetchStats,
    pub truncations: Vec<TruncationEvent>,
    pub retrieval_status: Option<RetrievalStatus>,
    /// Local files that could not be normalized
    pub local_skipped: Vec<SkipRecord>,
    pub local_load_error: Option<String>,
    pub case_document_errors: Vec<CaseDocumentError>,
    pub failure: Option<ErrorDetails>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionReport {
    fn new(session_id: Uuid, query: &str) -> Self {
        Self {
            session_id,
            query: query.to_string(),
            state: SessionState::Created,
            sub_queries: Vec::new(),
            succeeded: 0,
            failed: 0,
            fetch: FetchStats::default(),
            truncations: Vec::new(),
            retrieval_status: None,
            local_skipped: Vec::new(),
            local_load_error: None,
            case_document_errors: Vec::new(),
            failure: None,
            transitions: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(AppError::Internal {
                message: format!(
                    "invalid session transition {} -> {}",
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }
        info!(session_id = %self.session_id, from = self.state.as_str(), to = to.as_str(), "Session state changed");
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn fail(&mut self, err: &AppError) {
        error!(session_id = %self.session_id, state = self.state.as_str(), error = %err, "Session failed");
        if self.state != SessionState::Failed {
            self.transitions.push(StateTransition {
                from: self.state,
                to: SessionState::Failed,
                at: Utc::now(),
            });
            self.state = SessionState::Failed;
        }
        self.failure = Some(ErrorDetails::from(err));
        self.finished_at = Some(Utc::now());
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }
}

/// A session that reached READY_FOR_SYNTHESIS
pub struct ReadySession {
    pub report: SessionReport,
    pub context: AggregatedContext,
    pub handoff: SynthesisHandoff,
    store: Arc<dyn ContextStore>,
}

impl ReadySession {
    /// Forward the hand-off to report generation and move to DONE.
    ///
    /// On a generator error the session stays READY_FOR_SYNTHESIS.
    pub async fn synthesize(mut self, gateway: &SynthesisGateway) -> Result<(SessionReport, SynthesisResult)> {
        let result = gateway.forward(&self.handoff).await?;
        self.report.transition(SessionState::Done)?;
        if let Err(e) = self.store.finalize(self.report.session_id, &self.report).await {
            warn!(error = %e, store = self.store.name(), "Failed to finalize store");
        }
        Ok((self.report, result))
    }
}

pub enum SessionOutcome {
    Ready(Box<ReadySession>),
    Failed(SessionReport),
}

impl SessionOutcome {
    pub fn report(&self) -> &SessionReport {
        match self {
            SessionOutcome::Ready(ready) => &ready.report,
            SessionOutcome::Failed(report) => report,
        }
    }
}

/// Builder for [`ResearchSession`]; capabilities are injected here and
/// live for exactly one session.
pub struct ResearchSessionBuilder {
    request: ResearchRequest,
    planner: Option<QueryPlanner>,
    retriever: Option<Arc<dyn Retriever>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    loader: Option<Arc<dyn DocumentLoader>>,
    scorer: Option<Arc<dyn Scorer>>,
    store: Option<Arc<dyn ContextStore>>,
    normalizer: Option<Arc<SourceNormalizer>>,
    concurrency: ConcurrencyConfig,
}

impl ResearchSessionBuilder {
    pub fn planner(mut self, planner: QueryPlanner) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<SourceNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Validate the request and wire the pipeline. Configuration problems
    /// surface here, before the session starts.
    pub fn build(self) -> Result<ResearchSession> {
        self.request.validate()?;

        let c = &self.concurrency;
        if c.pipeline_parallelism == 0 || c.fetch_concurrency == 0 || c.pipeline_timeout_secs == 0 {
            return Err(AppError::Configuration {
                message: "pipeline_parallelism, fetch_concurrency and pipeline_timeout_secs must be at least 1"
                    .to_string(),
            });
        }

        let missing = |what: &str| AppError::Configuration {
            message: format!("research session requires a {}", what),
        };
        let planner = self.planner.ok_or_else(|| missing("query planner"))?;
        let scorer = self.scorer.ok_or_else(|| missing("scorer"))?;

        let mode = self.request.config.source_mode;
        let (retriever, fetcher) = if mode.uses_web() {
            let retriever = self.retriever.ok_or_else(|| missing("retriever for web sources"))?;
            let fetcher = self.fetcher.ok_or_else(|| missing("fetcher for web sources"))?;
            (Some(retriever), Some(fetcher))
        } else {
            (None, None)
        };
        let loader = if mode.uses_local() {
            Some(
                self.loader
                    .unwrap_or_else(|| Arc::new(FsDocumentLoader::new()) as Arc<dyn DocumentLoader>),
            )
        } else {
            None
        };

        let compressor = ContextCompressor::new(scorer, &self.request.config)?;
        let aggregator = ContextAggregator::new(self.request.config.global_token_budget);
        let normalizer = self.normalizer.unwrap_or_default();
        let coordinator = RetrievalCoordinator::new(retriever, fetcher, normalizer, self.concurrency.clone());

        Ok(ResearchSession {
            id: Uuid::new_v4(),
            request: self.request,
            planner,
            coordinator,
            loader,
            compressor,
            aggregator,
            store: self.store.unwrap_or_else(|| Arc::new(EphemeralStore::new())),
            concurrency: self.concurrency,
        })
    }
}

/// What one sub-query pipeline produced
struct PipelineResult {
    sub_query: SubQuery,
    /// `None` when retrieval itself timed out
    retrieval: Option<SubQueryRetrieval>,
    outcome: CompressionOutcome,
}

enum CompressionOutcome {
    Compressed(CompressedContext),
    ScoringFailed(AppError),
    TimedOut,
}

pub struct ResearchSession {
    id: Uuid,
    request: ResearchRequest,
    planner: QueryPlanner,
    coordinator: RetrievalCoordinator,
    loader: Option<Arc<dyn DocumentLoader>>,
    compressor: ContextCompressor,
    aggregator: ContextAggregator,
    store: Arc<dyn ContextStore>,
    concurrency: ConcurrencyConfig,
}

impl ResearchSession {
    pub fn builder(request: ResearchRequest) -> ResearchSessionBuilder {
        ResearchSessionBuilder {
            request,
            planner: None,
            retriever: None,
            fetcher: None,
            loader: None,
            scorer: None,
            store: None,
            normalizer: None,
            concurrency: ConcurrencyConfig::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session up to READY_FOR_SYNTHESIS (or FAILED)
    #[instrument(skip(self), fields(session_id = %self.id, mode = ?self.request.config.source_mode))]
    pub async fn run(mut self) -> SessionOutcome {
        let started = std::time::Instant::now();
        let mut report = SessionReport::new(self.id, &self.request.query);

        let outcome = self.execute(&mut report).await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok((context, handoff)) => {
                record_session(duration, SessionState::ReadyForSynthesis.as_str());
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    chunks = context.chunks.len(),
                    tokens = context.token_count,
                    duration_secs = duration,
                    "Session ready for synthesis"
                );
                self.finalize(&report).await;
                SessionOutcome::Ready(Box::new(ReadySession {
                    report,
                    context,
                    handoff,
                    store: self.store,
                }))
            }
            Err(e) => {
                report.fail(&e);
                record_session(duration, SessionState::Failed.as_str());
                self.finalize(&report).await;
                SessionOutcome::Failed(report)
            }
        }
    }

    async fn finalize(&self, report: &SessionReport) {
        if let Err(e) = self.store.finalize(self.id, report).await {
            warn!(error = %e, store = self.store.name(), "Failed to finalize store");
        }
    }

    async fn execute(&mut self, report: &mut SessionReport) -> Result<(AggregatedContext, SynthesisHandoff)> {
        // PLANNING
        report.transition(SessionState::Planning)?;
        let timer = StageTimer::start("plan");
        let sub_queries = self
            .planner
            .generate(
                &self.request.query,
                self.request.case_context.as_ref(),
                self.request.config.max_sub_queries,
            )
            .await?;
        timer.finish();

        // RETRIEVING
        report.transition(SessionState::Retrieving)?;
        let timer = StageTimer::start("pipelines");
        self.load_local_sources(report).await;
        let (case_documents, case_document_errors) = load_case_documents(&self.request.case_documents).await;
        report.case_document_errors = case_document_errors;

        let results = self.run_pipelines(&sub_queries).await;
        self.record_fetch_stats(report, &results).await;
        timer.finish();

        let any_sources = results
            .iter()
            .any(|r| r.retrieval.as_ref().map(|s| s.has_sources()).unwrap_or(false));
        let retrieval_status = if any_sources {
            RetrievalStatus::Completed
        } else if !case_documents.is_empty() {
            warn!("No sources for any sub-query, continuing with case documents only");
            RetrievalStatus::EmptyWithCaseDocuments
        } else {
            return Err(AppError::NoSources);
        };
        report.retrieval_status = Some(retrieval_status);

        // COMPRESSING
        report.transition(SessionState::Compressing)?;
        let contexts = self.collect_contexts(report, results).await;

        // AGGREGATING
        report.transition(SessionState::Aggregating)?;
        let timer = StageTimer::start("aggregate");
        let context = self.aggregator.aggregate(&contexts);
        report
            .truncations
            .extend(contexts.iter().filter_map(|c| c.truncation.clone()));
        report.truncations.extend(context.truncation.clone());
        timer.finish();

        let handoff = SynthesisHandoff {
            session_id: self.id,
            query: self.request.query.clone(),
            case_context: self.request.case_context.clone(),
            context: context.clone(),
            case_documents,
            retrieval_status,
        };
        report.transition(SessionState::ReadyForSynthesis)?;
        Ok((context, handoff))
    }

    async fn load_local_sources(&mut self, report: &mut SessionReport) {
        let (Some(loader), Some(path)) = (
            self.loader.as_ref(),
            self.request.config.local_documents_path.as_ref(),
        ) else {
            return;
        };

        match loader.load(path).await {
            Ok(sources) => {
                self.coordinator.add_local_sources(sources).await;
                // Only local entries exist in the cache at this point
                report.local_skipped = self
                    .coordinator
                    .cache()
                    .snapshot()
                    .await
                    .into_iter()
                    .filter_map(|(_, cached)| match cached {
                        CachedSource::Skipped(skip) => Some(skip),
                        _ => None,
                    })
                    .collect();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Local documents could not be loaded");
                report.local_load_error = Some(e.to_string());
            }
        }
    }

    /// Run every sub-query's retrieve -> compress pipeline, at most
    /// `pipeline_parallelism` at a time, each bounded by its own deadline
    async fn run_pipelines(&self, sub_queries: &[SubQuery]) -> Vec<PipelineResult> {
        let coordinator = &self.coordinator;
        let compressor = &self.compressor;
        let pipeline_timeout = self.concurrency.pipeline_timeout();
        let max_results = self.request.config.max_results_per_query;

        let mut results: Vec<PipelineResult> = stream::iter(sub_queries.iter().cloned())
            .map(|sub_query| async move {
                let deadline = Instant::now() + pipeline_timeout;
                let timer = StageTimer::start("retrieve");
                let retrieval = match timeout_at(deadline, coordinator.retrieve(&sub_query, max_results)).await {
                    Ok(retrieval) => {
                        timer.finish();
                        retrieval
                    }
                    Err(_) => {
                        warn!(sub_query = %sub_query.id, timeout = ?pipeline_timeout, "Retrieval timed out, excluding sub-query");
                        return PipelineResult {
                            sub_query,
                            retrieval: None,
                            outcome: CompressionOutcome::TimedOut,
                        };
                    }
                };

                let timer = StageTimer::start("compress");
                let compression = compressor.compress(&sub_query, &retrieval.documents);
                let outcome = match timeout_at(deadline, compression).await {
                    Ok(Ok(context)) => CompressionOutcome::Compressed(context),
                    Ok(Err(e)) => CompressionOutcome::ScoringFailed(e),
                    Err(_) => CompressionOutcome::TimedOut,
                };
                timer.finish();

                PipelineResult {
                    sub_query,
                    retrieval: Some(retrieval),
                    outcome,
                }
            })
            .buffer_unordered(self.concurrency.pipeline_parallelism)
            .collect()
            .await;

        results.sort_by_key(|r| r.sub_query.id);
        results
    }

    async fn record_fetch_stats(&self, report: &mut SessionReport, results: &[PipelineResult]) {
        for r in results.iter().filter_map(|r| r.retrieval.as_ref()) {
            report.fetch.requested += r.requested;
            report.fetch.cache_hits += r.cache_hits;
        }

        let cache = self.coordinator.cache();
        let snapshot = cache.snapshot().await;
        let failed = snapshot
            .iter()
            .filter(|(_, cached)| matches!(cached, CachedSource::Failed(_)))
            .count();
        report.fetch.failed = failed;
        report.fetch.fetched = cache.misses().saturating_sub(failed);

        for (source_id, cached) in &snapshot {
            if let CachedSource::Ready { raw, .. } = cached {
                if let Err(e) = self.store.record_source(self.id, raw).await {
                    warn!(source = %source_id, error = %e, store = self.store.name(), "Failed to record source");
                }
            }
        }
    }

    /// Turn pipeline results into per-sub-query reports and the contexts
    /// that go to aggregation; timed-out pipelines contribute nothing
    async fn collect_contexts(
        &self,
        report: &mut SessionReport,
        results: Vec<PipelineResult>,
    ) -> Vec<CompressedContext> {
        let mut contexts = Vec::with_capacity(results.len());
        for result in results {
            let sub_query = result.sub_query;
            let mut entry = SubQueryReport::new(sub_query.clone(), SubQueryStatus::Empty);
            if let Some(retrieval) = result.retrieval {
                entry.sources = retrieval.sources;
                entry.fetch_failures = retrieval.failures;
                entry.skipped = retrieval.skipped;
                entry.error = retrieval.retriever_error;
            }

            match result.outcome {
                CompressionOutcome::Compressed(context) => {
                    entry.status = if context.is_empty() {
                        SubQueryStatus::Empty
                    } else {
                        SubQueryStatus::Succeeded
                    };
                    entry.chunks_produced = context.stats.chunks_produced;
                    entry.chunks_kept = context.stats.chunks_kept;
                    entry.fallback_used = context.stats.fallback_used;
                    if let Err(e) = self.store.record_compressed(self.id, &context).await {
                        warn!(sub_query = %sub_query.id, error = %e, "Failed to record compressed context");
                    }
                    contexts.push(context);
                }
                CompressionOutcome::ScoringFailed(e) => {
                    warn!(sub_query = %sub_query.id, error = %e, "Scoring failed, sub-query contributes nothing");
                    entry.status = SubQueryStatus::ScoringFailed;
                    entry.error = Some(e.to_string());
                    contexts.push(CompressedContext::empty(sub_query, self.compressor.scorer_name()));
                }
                CompressionOutcome::TimedOut => {
                    warn!(sub_query = %sub_query.id, "Sub-query pipeline timed out");
                    entry.status = SubQueryStatus::TimedOut;
                    entry.error = Some("pipeline timed out".to_string());
                }
            }
            report.sub_queries.push(entry);
        }

        report.succeeded = report
            .sub_queries
            .iter()
            .filter(|s| s.status == SubQueryStatus::Succeeded)
            .count();
        report.failed = report.sub_queries.iter().filter(|s| s.status.is_failure()).count();
        contexts
    }
}
