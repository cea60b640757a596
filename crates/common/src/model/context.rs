//! Compressed (per sub-query) and aggregated (per session) contexts

use super::document::{Chunk, ChunkKey, OffsetRange, ScoredChunk};
use super::request::{SubQuery, SubQueryId};
use super::source::SourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a budget truncation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "sub_query")]
pub enum TruncationStage {
    SubQuery(SubQueryId),
    Global,
}

/// A budget cut. Observable and loggable, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationEvent {
    pub stage: TruncationStage,
    pub budget_tokens: usize,
    pub kept_chunks: usize,
    pub dropped_chunks: usize,
    pub dropped_tokens: usize,
    /// The single surviving chunk had to be cut to fit the budget
    pub partial_chunk: bool,
}

/// Counters describing one compression run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub scorer: String,
    pub chunks_produced: usize,
    pub chunks_above_threshold: usize,
    pub fallback_used: bool,
    pub chunks_kept: usize,
    pub token_count: usize,
}

/// Rank-ordered, budget-capped context for one sub-query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedContext {
    pub sub_query: SubQuery,
    pub chunks: Vec<ScoredChunk>,
    /// Annotated text blob, chunks in rank order
    pub text: String,
    pub stats: CompressionStats,
    pub truncation: Option<TruncationEvent>,
}

impl CompressedContext {
    /// Context for a sub-query that produced no chunks (or failed)
    pub fn empty(sub_query: SubQuery, scorer: impl Into<String>) -> Self {
        Self {
            sub_query,
            chunks: Vec::new(),
            text: String::new(),
            stats: CompressionStats {
                scorer: scorer.into(),
                ..CompressionStats::default()
            },
            truncation: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.token_count).sum()
    }
}

/// A surviving chunk after cross-sub-query merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedChunk {
    pub chunk: Chunk,
    /// Highest score any contributing sub-query gave this chunk
    pub score: f32,
    /// Contributing sub-queries, sorted, unique
    pub sub_queries: Vec<SubQueryId>,
}

/// Stitched, page-ordered passage of one source (read-only view)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source_ref: SourceId,
    pub title: String,
    pub page_index: u32,
    pub page_count: u32,
    pub offset: OffsetRange,
    pub text: String,
    pub sub_queries: Vec<SubQueryId>,
}

/// Deduplicated, globally budget-capped union of all CompressedContexts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedContext {
    /// Rank-ordered surviving chunks
    pub chunks: Vec<AggregatedChunk>,
    pub text: String,
    pub token_count: usize,
    /// Distinct chunks seen before the global budget was applied
    pub merged_chunks: usize,
    pub truncation: Option<TruncationEvent>,
}

impl AggregatedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Surviving chunk -> contributing sub-query ids
    pub fn provenance(&self) -> BTreeMap<ChunkKey, Vec<SubQueryId>> {
        self.chunks
            .iter()
            .map(|c| (c.chunk.key(), c.sub_queries.clone()))
            .collect()
    }

    /// Distinct sources cited, in first-rank order
    pub fn sources(&self) -> Vec<SourceId> {
        let mut seen = Vec::new();
        for c in &self.chunks {
            if !seen.contains(&c.chunk.source_ref) {
                seen.push(c.chunk.source_ref.clone());
            }
        }
        seen
    }

    /// Group surviving chunks by source and page, in page order, merging
    /// chunks whose offset ranges overlap or touch.
    pub fn passages(&self) -> Vec<Passage> {
        let mut groups: BTreeMap<(SourceId, u32), Vec<&AggregatedChunk>> = BTreeMap::new();
        for c in &self.chunks {
            groups
                .entry((c.chunk.source_ref.clone(), c.chunk.page_index))
                .or_default()
                .push(c);
        }

        let mut passages = Vec::new();
        for ((_, _), mut chunks) in groups {
            chunks.sort_by_key(|c| (c.chunk.offset.start, c.chunk.offset.end));

            let mut current: Option<Passage> = None;
            for c in chunks {
                match current.as_mut() {
                    Some(p) if p.offset.touches(&c.chunk.offset) => {
                        if c.chunk.offset.end > p.offset.end {
                            let skip = p.offset.end - c.chunk.offset.start;
                            p.text.extend(c.chunk.text.chars().skip(skip));
                            p.offset.end = c.chunk.offset.end;
                        }
                        for id in &c.sub_queries {
                            if !p.sub_queries.contains(id) {
                                p.sub_queries.push(*id);
                            }
                        }
                        p.sub_queries.sort();
                    }
                    _ => {
                        if let Some(done) = current.take() {
                            passages.push(done);
                        }
                        current = Some(Passage {
                            source_ref: c.chunk.source_ref.clone(),
                            title: c.chunk.title.clone(),
                            page_index: c.chunk.page_index,
                            page_count: c.chunk.page_count,
                            offset: c.chunk.offset,
                            text: c.chunk.text.clone(),
                            sub_queries: c.sub_queries.clone(),
                        });
                    }
                }
            }
            if let Some(done) = current {
                passages.push(done);
            }
        }
        passages
    }
}

/// Render one chunk with its source title and origin tag
pub fn annotate_chunk(rank: usize, chunk: &Chunk, score: f32) -> String {
    format!(
        "[{}] {}\nOrigin: {}\nRelevance: {:.2}\n{}\n",
        rank,
        chunk.title,
        chunk.origin_tag(),
        score,
        chunk.text
    )
}
