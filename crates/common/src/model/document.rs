//! Documents, chunks and scored chunks

use super::request::SubQueryId;
use super::source::SourceId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ordered text body derived from a RawSource.
///
/// A multi-page source yields one Document per page, all sharing
/// `source_ref`, distinguished by `page_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_ref: SourceId,
    pub title: String,
    pub text: String,
    /// Zero-based page/sequence index within the source
    pub page_index: u32,
    /// Number of pages the source produced (1 for single-page sources)
    pub page_count: u32,
}

impl Document {
    pub fn new(source_ref: SourceId, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref,
            title: title.into(),
            text: text.into(),
            page_index: 0,
            page_count: 1,
        }
    }

    pub fn page(mut self, page_index: u32, page_count: u32) -> Self {
        self.page_index = page_index;
        self.page_count = page_count;
        self
    }

    /// Length in characters (chunk offsets are character offsets)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_paged(&self) -> bool {
        self.page_count > 1
    }
}

/// Half-open character range `[start, end)` within a Document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OffsetRange {
    pub start: usize,
    pub end: usize,
}

impl OffsetRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the ranges overlap or are directly adjacent
    pub fn touches(&self, other: &OffsetRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Identity of a passage across sub-queries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub source_ref: SourceId,
    pub page_index: u32,
    pub offset: OffsetRange,
}

/// A bounded slice of exactly one Document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: Uuid,
    pub source_ref: SourceId,
    pub title: String,
    pub page_index: u32,
    pub page_count: u32,
    /// Position of this chunk within its Document
    pub sequence_index: u32,
    pub offset: OffsetRange,
    pub text: String,
    pub token_count: usize,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            source_ref: self.source_ref.clone(),
            page_index: self.page_index,
            offset: self.offset,
        }
    }

    /// Citation tag: origin plus page when the source is paged
    pub fn origin_tag(&self) -> String {
        if self.page_count > 1 {
            format!(
                "{} (page {} of {})",
                self.source_ref,
                self.page_index + 1,
                self.page_count
            )
        } else {
            self.source_ref.to_string()
        }
    }
}

/// A chunk with its relevance to one sub-query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Relevance in [0, 1]
    pub score: f32,
    pub sub_query: SubQueryId,
}
