//! Research pipeline domain model
//!
//! Request-side types are immutable inputs; everything from RawSource
//! down to ScoredChunk is session-scoped and discarded once the
//! AggregatedContext has been produced.

mod context;
mod document;
mod request;
mod source;

pub use context::{
    annotate_chunk, AggregatedChunk, AggregatedContext, CompressedContext, CompressionStats,
    Passage, TruncationEvent, TruncationStage,
};
pub use document::{Chunk, ChunkKey, Document, OffsetRange, ScoredChunk};
pub use request::{CaseContext, ResearchRequest, SourceMode, SubQuery, SubQueryId};
pub use source::{ContentType, FetchedContent, RawContent, RawSource, SourceDescriptor, SourceId};
