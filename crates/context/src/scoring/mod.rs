//! Relevance scoring
//!
//! A [`Scorer`] is constructed per session and injected into the
//! compressor. Implementations differ in granularity (per chunk or per
//! whole document) but all return one score in [0, 1] per chunk, so the
//! compressor and aggregator treat them identically.

pub mod curation;
pub mod embedding;
pub mod lexical;

pub use curation::CurationScorer;
pub use embedding::EmbeddingScorer;
pub use lexical::LexicalScorer;

use async_trait::async_trait;
use caseforge_common::config::ScorerKind;
use caseforge_common::embeddings::Embedder;
use caseforge_common::errors::{AppError, Result};
use caseforge_common::llm::LlmClient;
use caseforge_common::model::{Chunk, SubQuery};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unit a scorer judges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringGranularity {
    Chunk,
    /// Every chunk of a Document inherits the Document's score
    Document,
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    fn granularity(&self) -> ScoringGranularity;

    /// Relevance of one text to the sub-query, in [0, 1]
    async fn score(&self, sub_query: &SubQuery, text: &str) -> Result<f32>;

    /// One score per chunk, in input order
    async fn score_chunks(&self, sub_query: &SubQuery, chunks: &[Chunk]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            scores.push(self.score(sub_query, &chunk.text).await?);
        }
        Ok(scores)
    }
}

/// Build the configured scorer for one session
pub fn create_scorer(
    kind: ScorerKind,
    embedder: Option<Arc<dyn Embedder>>,
    llm: Option<Arc<dyn LlmClient>>,
) -> Result<Arc<dyn Scorer>> {
    match kind {
        ScorerKind::Embedding => {
            let embedder = embedder.ok_or_else(|| AppError::Configuration {
                message: "embedding scorer requires an embedder".to_string(),
            })?;
            Ok(Arc::new(EmbeddingScorer::new(embedder)))
        }
        ScorerKind::Lexical => Ok(Arc::new(LexicalScorer::new())),
        ScorerKind::Curation => {
            let llm = llm.ok_or_else(|| AppError::Configuration {
                message: "curation scorer requires an LLM client".to_string(),
            })?;
            Ok(Arc::new(CurationScorer::new(llm)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_scorer_requires_capabilities() {
        assert!(create_scorer(ScorerKind::Embedding, None, None).is_err());
        assert!(create_scorer(ScorerKind::Curation, None, None).is_err());
        let lexical = create_scorer(ScorerKind::Lexical, None, None).unwrap();
        assert_eq!(lexical.granularity(), ScoringGranularity::Chunk);
    }
}
