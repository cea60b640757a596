//! Retrieval Coordinator
//!
//! Per sub-query: ask the Retriever for descriptors, fetch each one through
//! the session cache, normalize, and return the resulting Documents. Fetches
//! from every sub-query share one semaphore, so `fetch_concurrency` is a
//! global cap. A failed fetch drops that source only.

use super::cache::{CachedSource, FetchCache, FetchFailure};
use super::{Fetcher, Retriever};
use backoff::{future::retry, ExponentialBackoffBuilder};
use caseforge_common::config::ConcurrencyConfig;
use caseforge_common::errors::AppError;
use caseforge_common::metrics::record_fetch;
use caseforge_common::model::{Document, RawSource, SourceDescriptor, SourceId, SubQuery};
use caseforge_ingestion::{SkipRecord, SourceNormalizer};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// What one sub-query's retrieval produced
#[derive(Debug, Clone)]
pub struct SubQueryRetrieval {
    pub sub_query: SubQuery,
    /// Documents of every usable source, grouped by source in retrieval order
    pub documents: Vec<Document>,
    /// Sources that produced Documents
    pub sources: Vec<SourceId>,
    pub failures: Vec<FetchFailure>,
    pub skipped: Vec<SkipRecord>,
    /// Distinct descriptors requested (web only)
    pub requested: usize,
    /// Requests served by the session cache
    pub cache_hits: usize,
    /// Retriever failure, if any; the sub-query continues with local sources
    pub retriever_error: Option<String>,
}

impl SubQueryRetrieval {
    fn empty(sub_query: SubQuery) -> Self {
        Self {
            sub_query,
            documents: Vec::new(),
            sources: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            requested: 0,
            cache_hits: 0,
            retriever_error: None,
        }
    }

    fn absorb(&mut self, source_id: SourceId, cached: CachedSource) {
        match cached {
            CachedSource::Ready { documents, .. } => {
                self.documents.extend(documents.iter().cloned());
                self.sources.push(source_id);
            }
            CachedSource::Skipped(skip) => self.skipped.push(skip),
            CachedSource::Failed(failure) => self.failures.push(failure),
        }
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }
}

pub struct RetrievalCoordinator {
    retriever: Option<Arc<dyn Retriever>>,
    fetch: Option<SourceFetch>,
    normalizer: Arc<SourceNormalizer>,
    cache: Arc<FetchCache>,
    /// Local sources included for every sub-query
    local_sources: Vec<SourceId>,
}

impl RetrievalCoordinator {
    pub fn new(
        retriever: Option<Arc<dyn Retriever>>,
        fetcher: Option<Arc<dyn Fetcher>>,
        normalizer: Arc<SourceNormalizer>,
        config: ConcurrencyConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.fetch_concurrency.max(1)));
        let fetch = fetcher.map(|fetcher| SourceFetch {
            fetcher,
            normalizer: Arc::clone(&normalizer),
            permits,
            config,
        });
        Self {
            retriever,
            fetch,
            normalizer,
            cache: Arc::new(FetchCache::new()),
            local_sources: Vec::new(),
        }
    }

    pub fn cache(&self) -> &Arc<FetchCache> {
        &self.cache
    }

    /// Normalize local sources once and register them for every sub-query
    pub async fn add_local_sources(&mut self, sources: Vec<RawSource>) {
        for raw in sources {
            let source_id = raw.source_id.clone();
            let cached = normalize(&self.normalizer, raw);
            self.cache.insert(source_id.clone(), cached).await;
            if !self.local_sources.contains(&source_id) {
                self.local_sources.push(source_id);
            }
        }
        info!(count = self.local_sources.len(), "Local sources registered");
    }

    /// Retrieve, fetch and normalize sources for one sub-query.
    ///
    /// Never fails: retriever and fetch errors are recorded on the result.
    #[instrument(skip(self), fields(sub_query = %sub_query.id))]
    pub async fn retrieve(&self, sub_query: &SubQuery, max_results: usize) -> SubQueryRetrieval {
        let mut result = SubQueryRetrieval::empty(sub_query.clone());

        let descriptors = match (&self.retriever, &self.fetch) {
            (Some(retriever), Some(_)) => match retriever.retrieve(sub_query, max_results).await {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    warn!(error = %e, "Retriever failed, continuing without web sources");
                    result.retriever_error = Some(e.to_string());
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        // Same source listed twice for one sub-query counts once
        let mut seen = HashSet::new();
        let descriptors: Vec<SourceDescriptor> = descriptors
            .into_iter()
            .filter(|d| !d.origin.trim().is_empty())
            .filter(|d| seen.insert(d.source_id()))
            .take(max_results)
            .collect();
        result.requested = descriptors.len();

        let fetched = join_all(descriptors.iter().map(|d| self.fetch_cached(d))).await;
        for (descriptor, (cached, hit)) in descriptors.iter().zip(fetched) {
            if hit {
                result.cache_hits += 1;
            }
            result.absorb(descriptor.source_id(), cached);
        }

        for source_id in &self.local_sources {
            if result.sources.contains(source_id) {
                continue;
            }
            if let Some(cached) = self.cache.get(source_id).await {
                // Local skips are reported once, at registration
                if cached.is_ready() {
                    result.absorb(source_id.clone(), cached);
                }
            }
        }

        info!(
            requested = result.requested,
            sources = result.sources.len(),
            documents = result.documents.len(),
            failures = result.failures.len(),
            skipped = result.skipped.len(),
            cache_hits = result.cache_hits,
            "Sub-query retrieval finished"
        );
        result
    }

    async fn fetch_cached(&self, descriptor: &SourceDescriptor) -> (CachedSource, bool) {
        let source_id = descriptor.source_id();
        let fetch = self.fetch.clone();
        let owned = descriptor.clone();
        let (cached, hit) = self
            .cache
            .get_or_init(&source_id, move || async move {
                match fetch {
                    Some(fetch) => fetch.run(owned).await,
                    None => CachedSource::Failed(FetchFailure {
                        source_id: owned.source_id(),
                        message: "no fetcher configured".to_string(),
                        attempts: 0,
                        timed_out: false,
                    }),
                }
            })
            .await;
        if hit {
            record_fetch("cache_hit", true);
            debug!(source = %source_id, "Fetch served from session cache");
        }
        (cached, hit)
    }
}

fn normalize(normalizer: &SourceNormalizer, raw: RawSource) -> CachedSource {
    match normalizer.normalize(&raw) {
        Ok(documents) => CachedSource::Ready {
            raw: Arc::new(raw),
            documents: Arc::new(documents),
        },
        Err(skip) => CachedSource::Skipped(skip),
    }
}

/// One source fetch with retries, run on its own task so it outlives the
/// pipeline that started it. Permits come from the session-wide semaphore.
#[derive(Clone)]
struct SourceFetch {
    fetcher: Arc<dyn Fetcher>,
    normalizer: Arc<SourceNormalizer>,
    permits: Arc<Semaphore>,
    config: ConcurrencyConfig,
}

impl SourceFetch {
    async fn run(self, descriptor: SourceDescriptor) -> CachedSource {
        let source_id = descriptor.source_id();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.fetch_initial_backoff())
            .with_max_elapsed_time(None)
            .build();
        let max_retries = self.config.fetch_max_retries;
        let timeout = self.config.fetch_timeout();
        let fetcher = &self.fetcher;
        let permits = &self.permits;
        let descriptor = &descriptor;

        let mut attempts = 0u32;
        let outcome = retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            let source_id = &source_id;
            async move {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(backoff::Error::permanent(AppError::Internal {
                            message: "fetch semaphore closed".to_string(),
                        }))
                    }
                };

                let result = match tokio::time::timeout(timeout, fetcher.fetch(descriptor)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout {
                        operation: format!("fetch {}", source_id),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };

                match result {
                    Ok(fetched) => Ok(fetched),
                    Err(e) if e.is_transient() && attempt <= max_retries => {
                        warn!(source = %source_id, attempt, error = %e, "Fetch failed, retrying");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await;

        match outcome {
            Ok(fetched) => {
                record_fetch("ok", false);
                let raw = RawSource::from_fetched(descriptor, fetched);
                debug!(source = %source_id, bytes = raw.content.byte_len(), "Source fetched");
                normalize(&self.normalizer, raw)
            }
            Err(e) => {
                let timed_out = matches!(e, AppError::Timeout { .. });
                record_fetch(if timed_out { "timeout" } else { "failed" }, false);
                warn!(source = %source_id, attempts, error = %e, "Fetch failed, dropping source");
                CachedSource::Failed(FetchFailure {
                    source_id,
                    message: e.to_string(),
                    attempts,
                    timed_out,
                })
            }
        }
    }
}
