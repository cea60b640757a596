//! Text chunking module
//!
//! Splits each Document into fixed-size, overlapping character windows.
//! Offsets are character offsets into the Document text, so the text can
//! be rebuilt from the chunks plus their ranges.

use crate::errors::IngestionError;
use caseforge_common::config::ResearchConfig;
use caseforge_common::model::{Chunk, Document, OffsetRange};
use caseforge_common::tokens::estimate_tokens;
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestionError> {
        if chunk_size == 0 {
            return Err(IngestionError::Chunking("chunk_size must be positive".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestionError::Chunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_research(config: &ResearchConfig) -> Result<Self, IngestionError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Distance between the starts of adjacent chunks
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Window ranges for a text of `char_len` characters.
///
/// The last window always ends at `char_len`; an empty text has no windows.
pub fn chunk_ranges(char_len: usize, config: &ChunkingConfig) -> Vec<OffsetRange> {
    let mut ranges = Vec::new();
    if char_len == 0 {
        return ranges;
    }

    let stride = config.stride().max(1);
    let mut start = 0;
    loop {
        let end = (start + config.chunk_size).min(char_len);
        ranges.push(OffsetRange::new(start, end));
        if end == char_len {
            break;
        }
        start += stride;
    }
    ranges
}

/// Split one Document into chunks. A chunk never crosses the Document.
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    // Byte offset of every char boundary, plus the end of the text
    let boundaries: Vec<usize> = document
        .text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(document.text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let chunks: Vec<Chunk> = chunk_ranges(char_len, config)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, offset)| {
            let text = &document.text[boundaries[offset.start]..boundaries[offset.end]];
            Chunk {
                document_id: document.id,
                source_ref: document.source_ref.clone(),
                title: document.title.clone(),
                page_index: document.page_index,
                page_count: document.page_count,
                sequence_index: sequence_index as u32,
                offset,
                text: text.to_string(),
                token_count: estimate_tokens(text),
            }
        })
        .collect();

    debug!(
        source = %document.source_ref,
        page = document.page_index,
        char_len,
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        "Document chunked"
    );

    chunks
}

/// Chunk every Document in order
pub fn chunk_documents(documents: &[Document], config: &ChunkingConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, config))
        .collect()
}

/// Rebuild a Document's text from its chunks using their offsets.
///
/// Chunks may be given in any order; overlapping characters are taken once.
pub fn reconstruct_text(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| (c.offset.start, c.offset.end));

    let mut text = String::new();
    let mut covered = 0;
    for chunk in ordered {
        if chunk.offset.end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(chunk.offset.start);
        text.extend(chunk.text.chars().skip(skip));
        covered = chunk.offset.end;
    }
    text
}
