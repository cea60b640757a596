//! Token budget enforcement
//!
//! Items arrive in rank order. The longest prefix that fits is kept and
//! everything after the first item that does not fit is dropped, so lower
//! ranked chunks always go first. When even the top item is over budget it
//! is cut down to the budget instead of returning nothing.

use caseforge_common::metrics;
use caseforge_common::model::{AggregatedChunk, Chunk, ScoredChunk, TruncationEvent, TruncationStage};
use caseforge_common::tokens::{estimate_tokens, truncate_to_tokens};
use tracing::info;

/// Something carrying a chunk whose tokens count against a budget
pub trait Budgeted {
    fn chunk(&self) -> &Chunk;
    fn chunk_mut(&mut self) -> &mut Chunk;

    fn tokens(&self) -> usize {
        self.chunk().token_count
    }
}

impl Budgeted for ScoredChunk {
    fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.chunk
    }
}

impl Budgeted for AggregatedChunk {
    fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.chunk
    }
}

/// Cut a chunk's text to `max_tokens`, keeping its offsets consistent
pub fn truncate_chunk(chunk: &mut Chunk, max_tokens: usize) {
    let kept = truncate_to_tokens(&chunk.text, max_tokens).to_string();
    let kept_chars = kept.chars().count();
    chunk.offset.end = chunk.offset.start + kept_chars;
    chunk.token_count = estimate_tokens(&kept);
    chunk.text = kept;
}

/// Apply `budget_tokens` to rank-ordered `items`.
///
/// Returns the surviving items and a truncation event when anything was
/// dropped or cut.
pub fn enforce_budget<T: Budgeted>(
    items: Vec<T>,
    budget_tokens: usize,
    stage: TruncationStage,
) -> (Vec<T>, Option<TruncationEvent>) {
    let total = items.len();
    let mut kept: Vec<T> = Vec::with_capacity(total);
    let mut used = 0usize;
    let mut dropped_tokens = 0usize;
    let mut partial_chunk = false;

    let mut iter = items.into_iter();
    for mut item in iter.by_ref() {
        let tokens = item.tokens();
        if used + tokens <= budget_tokens {
            used += tokens;
            kept.push(item);
            continue;
        }

        if kept.is_empty() && budget_tokens > 0 {
            truncate_chunk(item.chunk_mut(), budget_tokens);
            dropped_tokens += tokens.saturating_sub(item.tokens());
            used = item.tokens();
            partial_chunk = true;
            kept.push(item);
        } else {
            dropped_tokens += tokens;
        }
        break;
    }
    let rest: Vec<T> = iter.collect();
    dropped_tokens += rest.iter().map(|i| i.tokens()).sum::<usize>();

    let dropped_chunks = total - kept.len();
    if dropped_chunks == 0 && !partial_chunk {
        return (kept, None);
    }

    let event = TruncationEvent {
        stage,
        budget_tokens,
        kept_chunks: kept.len(),
        dropped_chunks,
        dropped_tokens,
        partial_chunk,
    };

    let stage_label = match stage {
        TruncationStage::SubQuery(_) => "sub_query",
        TruncationStage::Global => "global",
    };
    metrics::record_truncation(stage_label);
    info!(
        stage = stage_label,
        budget_tokens,
        used_tokens = used,
        kept = event.kept_chunks,
        dropped = dropped_chunks,
        partial_chunk,
        "Token budget truncation"
    );

    (kept, Some(event))
}
