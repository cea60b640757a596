//! Per-session source cache
//!
//! One entry per normalized SourceId. The first task to request a key spawns
//! the fetch (and normalization); every requester, the first included,
//! awaits a shared handle to that task. Dropping a requester (a pipeline
//! timing out) never cancels the fetch, so later requesters reuse it instead
//! of starting over. Failures are cached too, so a dead source is tried once
//! per session.

use caseforge_common::model::{Document, RawSource, SourceId};
use caseforge_ingestion::SkipRecord;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

/// Why a source could not be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub source_id: SourceId,
    pub message: String,
    pub attempts: u32,
    pub timed_out: bool,
}

/// Cached result for one source
#[derive(Debug, Clone)]
pub enum CachedSource {
    /// Fetched and normalized
    Ready {
        raw: Arc<RawSource>,
        documents: Arc<Vec<Document>>,
    },
    /// Fetched, but normalization produced nothing usable
    Skipped(SkipRecord),
    /// Fetch failed after retries
    Failed(FetchFailure),
}

impl CachedSource {
    pub fn documents(&self) -> &[Document] {
        match self {
            CachedSource::Ready { documents, .. } => documents,
            _ => &[],
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CachedSource::Ready { .. })
    }
}

type SharedFetch = Shared<BoxFuture<'static, CachedSource>>;

#[derive(Default)]
pub struct FetchCache {
    entries: Mutex<HashMap<SourceId, SharedFetch>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached entry for `source_id`, spawning `init` only if no
    /// other task has produced (or is producing) it. The flag is true when
    /// the result came from the cache.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get_or_init<F, Fut>(&self, source_id: &SourceId, init: F) -> (CachedSource, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedSource> + Send + 'static,
    {
        let (shared, hit) = {
            let mut entries = self.entries.lock().await;
            match entries.get(source_id) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let shared = spawn_shared(source_id.clone(), init());
                    entries.insert(source_id.clone(), shared.clone());
                    (shared, false)
                }
            }
        };

        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        (shared.await, hit)
    }

    /// Insert an already-available entry (local documents). Existing
    /// entries are kept.
    pub async fn insert(&self, source_id: SourceId, value: CachedSource) {
        let mut entries = self.entries.lock().await;
        // Occupied means another source claimed the id first
        entries
            .entry(source_id)
            .or_insert_with(|| future::ready(value).boxed().shared());
    }

    /// Completed entry for `source_id`; `None` while absent or in flight
    pub async fn get(&self, source_id: &SourceId) -> Option<CachedSource> {
        let entries = self.entries.lock().await;
        entries.get(source_id).and_then(completed)
    }

    /// Every completed entry, sorted by source id
    pub async fn snapshot(&self) -> Vec<(SourceId, CachedSource)> {
        let entries = self.entries.lock().await;
        let mut items: Vec<(SourceId, CachedSource)> = entries
            .iter()
            .filter_map(|(id, f)| completed(f).map(|v| (id.clone(), v)))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of fetches actually started
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Result of a finished fetch, without waiting on one still in flight.
/// Polls a clone so entries nobody awaited (a requester that was dropped,
/// an inserted local source) still report their value.
fn completed(fetch: &SharedFetch) -> Option<CachedSource> {
    fetch.clone().now_or_never()
}

/// Run `fetch` on its own task and hand back a cloneable handle to its result
fn spawn_shared<Fut>(source_id: SourceId, fetch: Fut) -> SharedFetch
where
    Fut: Future<Output = CachedSource> + Send + 'static,
{
    let handle = tokio::spawn(fetch);
    async move {
        match handle.await {
            Ok(cached) => cached,
            Err(e) => {
                error!(source = %source_id, error = %e, "Fetch task aborted");
                CachedSource::Failed(FetchFailure {
                    source_id,
                    message: format!("fetch task aborted: {}", e),
                    attempts: 0,
                    timed_out: false,
                })
            }
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn failure(id: &SourceId) -> CachedSource {
        CachedSource::Failed(FetchFailure {
            source_id: id.clone(),
            message: "boom".into(),
            attempts: 1,
            timed_out: false,
        })
    }

    #[tokio::test]
    async fn test_concurrent_requesters_share_one_init() {
        let cache = Arc::new(FetchCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = SourceId::from_origin("https://example.com/x");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let id = id.clone();
                tokio::spawn(async move {
                    let failed = failure(&id);
                    cache
                        .get_or_init(&id, move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            failed
                        })
                        .await
                })
            })
            .collect();

        let mut hit_count = 0;
        for task in tasks {
            let (_, hit) = task.await.unwrap();
            if hit {
                hit_count += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hit_count, 7);
        assert_eq!(cache.hits(), 7);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn test_insert_keeps_first_value() {
        let cache = FetchCache::new();
        let id = SourceId::from_origin("/case/a.txt");
        cache.insert(id.clone(), failure(&id)).await;
        cache
            .insert(
                id.clone(),
                CachedSource::Failed(FetchFailure {
                    source_id: id.clone(),
                    message: "second".into(),
                    attempts: 2,
                    timed_out: true,
                }),
            )
            .await;

        match cache.get(&id).await {
            Some(CachedSource::Failed(f)) => assert_eq!(f.message, "boom"),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert_eq!(cache.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_requester_does_not_restart_fetch() {
        let cache = Arc::new(FetchCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = SourceId::from_origin("https://example.com/slow");

        let slow_init = {
            let calls = Arc::clone(&calls);
            let failed = failure(&id);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                failed
            }
        };
        let first = tokio::time::timeout(Duration::from_millis(50), cache.get_or_init(&id, slow_init)).await;
        assert!(first.is_err());

        let late_calls = Arc::clone(&calls);
        let late_id = id.clone();
        let (cached, hit) = cache
            .get_or_init(&id, move || async move {
                late_calls.fetch_add(1, Ordering::SeqCst);
                CachedSource::Failed(FetchFailure {
                    source_id: late_id,
                    message: "second fetch".into(),
                    attempts: 1,
                    timed_out: false,
                })
            })
            .await;

        assert!(hit);
        match cached {
            CachedSource::Failed(f) => assert_eq!(f.message, "boom"),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_entry_is_not_in_snapshot() {
        let cache = FetchCache::new();
        let id = SourceId::from_origin("https://example.com/pending");
        let failed = failure(&id);
        let pending = cache.get_or_init(&id, move || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            failed
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), pending).await.is_err());

        assert!(cache.get(&id).await.is_none());
        assert!(cache.snapshot().await.is_empty());
    }
}
