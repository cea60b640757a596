//! Context Aggregator - merges per-sub-query contexts
//!
//! Chunks with the same (source, page, offset range) collapse into one
//! entry that keeps the highest score and lists every contributing
//! sub-query. The global budget is applied to the merged, ranked set.

use crate::budget::enforce_budget;
use caseforge_common::model::{
    annotate_chunk, AggregatedChunk, AggregatedContext, ChunkKey, CompressedContext,
    TruncationStage,
};
use std::collections::HashMap;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct ContextAggregator {
    global_budget: usize,
}

impl ContextAggregator {
    pub fn new(global_budget: usize) -> Self {
        Self { global_budget }
    }

    #[instrument(skip(self, contexts), fields(contexts = contexts.len(), budget = self.global_budget))]
    pub fn aggregate(&self, contexts: &[CompressedContext]) -> AggregatedContext {
        let mut index: HashMap<ChunkKey, usize> = HashMap::new();
        let mut merged: Vec<AggregatedChunk> = Vec::new();

        for context in contexts {
            for scored in &context.chunks {
                let key = scored.chunk.key();
                match index.get(&key) {
                    Some(&pos) => {
                        let entry = &mut merged[pos];
                        if scored.score > entry.score {
                            entry.score = scored.score;
                        }
                        if !entry.sub_queries.contains(&scored.sub_query) {
                            entry.sub_queries.push(scored.sub_query);
                            entry.sub_queries.sort();
                        }
                    }
                    None => {
                        index.insert(key, merged.len());
                        merged.push(AggregatedChunk {
                            chunk: scored.chunk.clone(),
                            score: scored.score,
                            sub_queries: vec![scored.sub_query],
                        });
                    }
                }
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.source_ref.cmp(&b.chunk.source_ref))
                .then_with(|| a.chunk.page_index.cmp(&b.chunk.page_index))
                .then_with(|| a.chunk.offset.cmp(&b.chunk.offset))
        });
        let merged_chunks = merged.len();

        let (chunks, truncation) = enforce_budget(merged, self.global_budget, TruncationStage::Global);

        let text = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| annotate_chunk(i + 1, &c.chunk, c.score))
            .collect::<Vec<_>>()
            .join("\n");
        let token_count = chunks.iter().map(|c| c.chunk.token_count).sum();

        debug!(merged = merged_chunks, kept = chunks.len(), tokens = token_count, "Contexts aggregated");

        AggregatedContext {
            chunks,
            text,
            token_count,
            merged_chunks,
            truncation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_common::model::{
        Chunk, CompressionStats, OffsetRange, ScoredChunk, SourceId, SubQuery, SubQueryId,
    };
    use caseforge_common::tokens::estimate_tokens;
    use uuid::Uuid;

    fn scored(source: &str, start: usize, chars: usize, score: f32, sq: u32) -> ScoredChunk {
        let text = "y".repeat(chars);
        ScoredChunk {
            chunk: Chunk {
                document_id: Uuid::nil(),
                source_ref: SourceId::from_origin(source),
                title: source.to_string(),
                page_index: 0,
                page_count: 1,
                sequence_index: 0,
                offset: OffsetRange::new(start, start + chars),
                token_count: estimate_tokens(&text),
                text,
            },
            score,
            sub_query: SubQueryId(sq),
        }
    }

    fn context(sq: u32, chunks: Vec<ScoredChunk>) -> CompressedContext {
        CompressedContext {
            sub_query: SubQuery::new(sq, format!("q{}", sq)),
            chunks,
            text: String::new(),
            stats: CompressionStats::default(),
            truncation: None,
        }
    }

    #[test]
    fn test_same_passage_is_cited_once() {
        let x = "https://example.com/x";
        let contexts = vec![
            context(1, vec![scored(x, 0, 40, 0.6, 1)]),
            context(2, vec![scored(x, 0, 40, 0.8, 2), scored("https://example.com/y", 0, 40, 0.7, 2)]),
        ];

        let agg = ContextAggregator::new(1000).aggregate(&contexts);
        assert_eq!(agg.chunks.len(), 2);
        assert_eq!(agg.merged_chunks, 2);
        assert_eq!(agg.chunks[0].chunk.source_ref.as_str(), x);
        assert_eq!(agg.chunks[0].score, 0.8);
        assert_eq!(agg.chunks[0].sub_queries, vec![SubQueryId(1), SubQueryId(2)]);
        assert_eq!(agg.text.matches(x).count(), 1);
        assert!(agg.truncation.is_none());
    }

    #[test]
    fn test_global_budget_drops_lowest_scores() {
        let contexts = vec![
            context(1, vec![scored("/a", 0, 40, 0.9, 1), scored("/a", 40, 40, 0.2, 1)]),
            context(2, vec![scored("/b", 0, 40, 0.5, 2)]),
        ];
        let agg = ContextAggregator::new(20).aggregate(&contexts);
        assert!(agg.token_count <= 20);
        let scores: Vec<f32> = agg.chunks.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
        assert_eq!(agg.truncation.unwrap().dropped_chunks, 1);
    }

    #[test]
    fn test_never_empty_when_input_non_empty() {
        let contexts = vec![context(1, vec![scored("/big", 0, 4000, 0.4, 1)])];
        let agg = ContextAggregator::new(5).aggregate(&contexts);
        assert_eq!(agg.chunks.len(), 1);
        assert_eq!(agg.token_count, 5);
        assert!(agg.truncation.unwrap().partial_chunk);
    }

    #[test]
    fn test_all_empty_inputs() {
        let agg = ContextAggregator::new(100).aggregate(&[context(1, vec![]), context(2, vec![])]);
        assert!(agg.is_empty());
        assert_eq!(agg.token_count, 0);
    }
}
