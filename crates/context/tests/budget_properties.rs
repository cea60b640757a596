use caseforge_common::model::{
    Chunk, CompressedContext, CompressionStats, OffsetRange, ScoredChunk, SourceId, SubQuery, SubQueryId,
};
use caseforge_common::tokens::estimate_tokens;
use caseforge_context::ContextAggregator;
use proptest::prelude::*;
use uuid::Uuid;

/// (source index, start offset, length in chars, score)
type ChunkShape = (u8, u16, u16, f32);

fn build_contexts(shapes: &[Vec<ChunkShape>]) -> Vec<CompressedContext> {
    shapes
        .iter()
        .enumerate()
        .map(|(idx, chunks)| {
            let id = idx as u32 + 1;
            let chunks = chunks
                .iter()
                .map(|(source, start, len, score)| {
                    let text = "w".repeat(*len as usize);
                    ScoredChunk {
                        chunk: Chunk {
                            document_id: Uuid::nil(),
                            source_ref: SourceId::from_origin(&format!("https://s{}.example", source)),
                            title: format!("Source {}", source),
                            page_index: 0,
                            page_count: 1,
                            sequence_index: 0,
                            offset: OffsetRange::new(*start as usize, *start as usize + *len as usize),
                            token_count: estimate_tokens(&text),
                            text,
                        },
                        score: *score,
                        sub_query: SubQueryId(id),
                    }
                })
                .collect();
            CompressedContext {
                sub_query: SubQuery::new(id, format!("q{}", id)),
                chunks,
                text: String::new(),
                stats: CompressionStats::default(),
                truncation: None,
            }
        })
        .collect()
}

fn chunk_shape() -> impl Strategy<Value = ChunkShape> {
    (0u8..4, 0u16..2000, 1u16..800, 0.0f32..=1.0)
}

proptest! {
    #[test]
    fn aggregated_context_respects_global_budget(
        shapes in prop::collection::vec(prop::collection::vec(chunk_shape(), 0..6), 1..6),
        budget in 1usize..600,
    ) {
        let contexts = build_contexts(&shapes);
        let agg = ContextAggregator::new(budget).aggregate(&contexts);

        prop_assert!(agg.token_count <= budget);
        prop_assert_eq!(
            agg.token_count,
            agg.chunks.iter().map(|c| c.chunk.token_count).sum::<usize>()
        );

        let any_input = contexts.iter().any(|c| !c.chunks.is_empty());
        prop_assert_eq!(!agg.chunks.is_empty(), any_input);

        // Rank order is non-increasing
        for pair in agg.chunks.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn nothing_dropped_when_input_fits(
        shapes in prop::collection::vec(prop::collection::vec(chunk_shape(), 0..4), 1..4),
    ) {
        let contexts = build_contexts(&shapes);
        let unbounded = ContextAggregator::new(usize::MAX / 2).aggregate(&contexts);
        let total = unbounded.token_count;
        prop_assume!(total > 0);

        let exact = ContextAggregator::new(total).aggregate(&contexts);
        prop_assert_eq!(exact.chunks.len(), unbounded.merged_chunks);
        prop_assert!(exact.truncation.is_none());
    }
}
