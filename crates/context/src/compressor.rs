//! Context compression for one sub-query
//!
//! chunk -> score -> threshold filter (top-K fallback) -> rank -> budget -> format
//!
//! Only scoring suspends. A scorer failure fails the whole compression with
//! `AppError::Scoring`; unranked text is never passed through.

use crate::budget::enforce_budget;
use crate::scoring::Scorer;
use caseforge_common::config::ResearchConfig;
use caseforge_common::errors::{AppError, Result};
use caseforge_common::metrics;
use caseforge_common::model::{
    annotate_chunk, CompressedContext, CompressionStats, Document, ScoredChunk, SubQuery,
    TruncationStage,
};
use caseforge_ingestion::{chunk_documents, ChunkingConfig};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct ContextCompressor {
    scorer: Arc<dyn Scorer>,
    chunking: ChunkingConfig,
    similarity_threshold: f32,
    fallback_top_k: usize,
    token_budget: usize,
}

/// Descending score; ties broken by source, page and offset so output is stable
pub fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.source_ref.cmp(&b.chunk.source_ref))
        .then_with(|| a.chunk.page_index.cmp(&b.chunk.page_index))
        .then_with(|| a.chunk.offset.cmp(&b.chunk.offset))
}

impl ContextCompressor {
    pub fn new(scorer: Arc<dyn Scorer>, config: &ResearchConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.similarity_threshold) {
            return Err(AppError::Configuration {
                message: format!(
                    "similarity_threshold must be within [0, 1], got {}",
                    config.similarity_threshold
                ),
            });
        }
        if config.fallback_top_k == 0 || config.token_budget_per_sub_query == 0 {
            return Err(AppError::Configuration {
                message: "fallback_top_k and token_budget_per_sub_query must be at least 1".into(),
            });
        }

        Ok(Self {
            scorer,
            chunking: ChunkingConfig::from_research(config)?,
            similarity_threshold: config.similarity_threshold,
            fallback_top_k: config.fallback_top_k,
            token_budget: config.token_budget_per_sub_query,
        })
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    #[instrument(skip(self, sub_query, documents), fields(sub_query = %sub_query.id, documents = documents.len()))]
    pub async fn compress(&self, sub_query: &SubQuery, documents: &[Document]) -> Result<CompressedContext> {
        let chunks = chunk_documents(documents, &self.chunking);
        if chunks.is_empty() {
            debug!("No chunks produced, empty context");
            return Ok(CompressedContext::empty(sub_query.clone(), self.scorer.name()));
        }

        let scores = self
            .scorer
            .score_chunks(sub_query, &chunks)
            .await
            .map_err(|e| match e {
                AppError::Scoring { .. } => e,
                other => AppError::Scoring {
                    sub_query: sub_query.id.to_string(),
                    message: other.to_string(),
                },
            })?;

        if scores.len() != chunks.len() {
            return Err(AppError::Scoring {
                sub_query: sub_query.id.to_string(),
                message: format!(
                    "scorer {} returned {} scores for {} chunks",
                    self.scorer.name(),
                    scores.len(),
                    chunks.len()
                ),
            });
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(AppError::Scoring {
                sub_query: sub_query.id.to_string(),
                message: format!("scorer {} returned non-finite score {}", self.scorer.name(), bad),
            });
        }

        let chunks_produced = chunks.len();
        let scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .zip(scores)
            .map(|(chunk, score)| ScoredChunk {
                chunk,
                score: score.clamp(0.0, 1.0),
                sub_query: sub_query.id,
            })
            .collect();

        let (mut ranked, chunks_above_threshold, fallback_used) = self.filter(scored);
        ranked.sort_by(rank_order);
        if fallback_used {
            ranked.truncate(self.fallback_top_k);
            info!(
                threshold = self.similarity_threshold,
                kept = ranked.len(),
                "No chunk met the threshold, using top-K fallback"
            );
        }

        let (kept, truncation) =
            enforce_budget(ranked, self.token_budget, TruncationStage::SubQuery(sub_query.id));

        let text = kept
            .iter()
            .enumerate()
            .map(|(i, c)| annotate_chunk(i + 1, &c.chunk, c.score))
            .collect::<Vec<_>>()
            .join("\n");

        let stats = CompressionStats {
            scorer: self.scorer.name().to_string(),
            chunks_produced,
            chunks_above_threshold,
            fallback_used,
            chunks_kept: kept.len(),
            token_count: kept.iter().map(|c| c.chunk.token_count).sum(),
        };
        metrics::record_compression(&stats.scorer, chunks_produced, stats.chunks_kept, fallback_used);
        debug!(
            produced = chunks_produced,
            above_threshold = chunks_above_threshold,
            kept = stats.chunks_kept,
            tokens = stats.token_count,
            "Compression complete"
        );

        Ok(CompressedContext {
            sub_query: sub_query.clone(),
            chunks: kept,
            text,
            stats,
            truncation,
        })
    }

    /// Threshold filter. Falls back to every chunk (to be cut to top-K by
    /// the caller) when nothing passes.
    fn filter(&self, scored: Vec<ScoredChunk>) -> (Vec<ScoredChunk>, usize, bool) {
        let above: Vec<ScoredChunk> = scored
            .iter()
            .filter(|c| c.score >= self.similarity_threshold)
            .cloned()
            .collect();
        let count = above.len();
        if count > 0 {
            (above, count, false)
        } else {
            (scored, 0, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{LexicalScorer, ScoringGranularity};
    use async_trait::async_trait;
    use caseforge_common::model::{Chunk, SourceId};

    fn research(threshold: f32) -> ResearchConfig {
        ResearchConfig {
            similarity_threshold: threshold,
            chunk_size: 60,
            chunk_overlap: 10,
            token_budget_per_sub_query: 1000,
            fallback_top_k: 2,
            ..ResearchConfig::default()
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(
                SourceId::from_origin("https://law.example/fdcpa"),
                "FDCPA Standing",
                "Standing under the FDCPA requires a concrete injury to the consumer. \
                 Courts look at whether the debt collector's conduct caused real harm. \
                 Zoning ordinances are unrelated to this analysis entirely.",
            ),
            Document::new(
                SourceId::from_origin("https://law.example/zoning"),
                "Zoning",
                "Municipal zoning boards hear variance petitions on parking garages.",
            ),
        ]
    }

    struct FixedScorer(f32);

    #[async_trait]
    impl Scorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn granularity(&self) -> ScoringGranularity {
            ScoringGranularity::Chunk
        }

        async fn score(&self, _sub_query: &SubQuery, _text: &str) -> Result<f32> {
            Ok(self.0)
        }
    }

    struct BrokenScorer;

    #[async_trait]
    impl Scorer for BrokenScorer {
        fn name(&self) -> &str {
            "broken"
        }

        fn granularity(&self) -> ScoringGranularity {
            ScoringGranularity::Chunk
        }

        async fn score(&self, _sub_query: &SubQuery, _text: &str) -> Result<f32> {
            Err(AppError::Embedding {
                message: "model unavailable".into(),
            })
        }

        async fn score_chunks(&self, sub_query: &SubQuery, chunks: &[Chunk]) -> Result<Vec<f32>> {
            if chunks.is_empty() {
                return Ok(Vec::new());
            }
            self.score(sub_query, &chunks[0].text).await.map(|s| vec![s])
        }
    }

    #[tokio::test]
    async fn test_threshold_filters_and_ranks() {
        let compressor = ContextCompressor::new(Arc::new(LexicalScorer::new()), &research(0.5)).unwrap();
        let ctx = compressor
            .compress(&SubQuery::new(1, "FDCPA standing concrete injury"), &corpus())
            .await
            .unwrap();

        assert!(!ctx.is_empty());
        assert!(!ctx.stats.fallback_used);
        assert!(ctx.chunks.iter().all(|c| c.score >= 0.5));
        assert!(ctx.chunks.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ctx.text.starts_with("[1] FDCPA Standing\nOrigin: https://law.example/fdcpa"));
    }

    #[tokio::test]
    async fn test_high_threshold_falls_back_to_top_k() {
        let compressor = ContextCompressor::new(Arc::new(FixedScorer(0.3)), &research(0.9)).unwrap();
        let ctx = compressor
            .compress(&SubQuery::new(1, "anything"), &corpus())
            .await
            .unwrap();

        assert!(ctx.stats.chunks_produced >= 2);
        assert_eq!(ctx.stats.chunks_above_threshold, 0);
        assert!(ctx.stats.fallback_used);
        assert_eq!(ctx.chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_no_documents_yields_empty_context() {
        let compressor = ContextCompressor::new(Arc::new(FixedScorer(1.0)), &research(0.5)).unwrap();
        let ctx = compressor.compress(&SubQuery::new(4, "x"), &[]).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.stats.chunks_produced, 0);
        assert!(ctx.truncation.is_none());
    }

    #[tokio::test]
    async fn test_scorer_failure_is_scoring_error() {
        let compressor = ContextCompressor::new(Arc::new(BrokenScorer), &research(0.5)).unwrap();
        let err = compressor
            .compress(&SubQuery::new(2, "FDCPA"), &corpus())
            .await
            .unwrap_err();
        match err {
            AppError::Scoring { sub_query, .. } => assert_eq!(sub_query, "sq-2"),
            other => panic!("expected scoring error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nan_score_is_rejected() {
        let compressor = ContextCompressor::new(Arc::new(FixedScorer(f32::NAN)), &research(0.5)).unwrap();
        let result = compressor.compress(&SubQuery::new(1, "x"), &corpus()).await;
        assert!(matches!(result, Err(AppError::Scoring { .. })));
    }

    #[tokio::test]
    async fn test_budget_caps_tokens() {
        let mut config = research(0.0);
        config.token_budget_per_sub_query = 20;
        let compressor = ContextCompressor::new(Arc::new(FixedScorer(0.5)), &config).unwrap();
        let ctx = compressor.compress(&SubQuery::new(1, "x"), &corpus()).await.unwrap();

        assert!(ctx.token_count() <= 20);
        let event = ctx.truncation.expect("expected a truncation event");
        assert_eq!(event.stage, TruncationStage::SubQuery(ctx.sub_query.id));
        assert!(event.dropped_chunks > 0);
    }

    #[test]
    fn test_invalid_threshold_is_configuration_error() {
        let result = ContextCompressor::new(Arc::new(LexicalScorer::new()), &research(1.5));
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
