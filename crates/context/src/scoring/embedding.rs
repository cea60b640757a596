//! Cosine similarity between sub-query and chunk embeddings

use super::{Scorer, ScoringGranularity};
use async_trait::async_trait;
use caseforge_common::embeddings::{cosine_similarity, Embedder};
use caseforge_common::errors::{AppError, Result};
use caseforge_common::model::{Chunk, SubQuery};
use std::sync::Arc;
use tracing::debug;

pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
    name: String,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let name = format!("embedding:{}", embedder.model_name());
        Self { embedder, name }
    }
}

fn to_score(similarity: f32) -> f32 {
    if similarity.is_finite() {
        similarity.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[async_trait]
impl Scorer for EmbeddingScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn granularity(&self) -> ScoringGranularity {
        ScoringGranularity::Chunk
    }

    async fn score(&self, sub_query: &SubQuery, text: &str) -> Result<f32> {
        let vectors = self
            .embedder
            .embed_batch(&[sub_query.text.clone(), text.to_string()])
            .await?;
        match vectors.as_slice() {
            [query, chunk] => Ok(to_score(cosine_similarity(query, chunk))),
            _ => Err(AppError::Embedding {
                message: format!("expected 2 embeddings, got {}", vectors.len()),
            }),
        }
    }

    async fn score_chunks(&self, sub_query: &SubQuery, chunks: &[Chunk]) -> Result<Vec<f32>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(&sub_query.text).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(AppError::Embedding {
                message: format!("expected {} embeddings, got {}", chunks.len(), vectors.len()),
            });
        }

        debug!(sub_query = %sub_query.id, chunks = chunks.len(), "Chunks embedded");
        Ok(vectors
            .iter()
            .map(|v| to_score(cosine_similarity(&query, v)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_common::embeddings::HashingEmbedder;

    #[tokio::test]
    async fn test_scores_are_clamped_and_ordered() {
        let scorer = EmbeddingScorer::new(Arc::new(HashingEmbedder::new(256)));
        let sub_query = SubQuery::new(1, "FDCPA standing concrete injury");

        let related = scorer
            .score(&sub_query, "Standing under the FDCPA requires a concrete injury.")
            .await
            .unwrap();
        let unrelated = scorer
            .score(&sub_query, "Parking garage zoning variance hearing.")
            .await
            .unwrap();

        assert!((0.0..=1.0).contains(&related));
        assert!((0.0..=1.0).contains(&unrelated));
        assert!(related > unrelated);
        assert_eq!(scorer.name(), "embedding:feature-hashing");
    }

    #[test]
    fn test_non_finite_similarity_scores_zero() {
        assert_eq!(to_score(f32::NAN), 0.0);
        assert_eq!(to_score(-0.4), 0.0);
        assert_eq!(to_score(1.2), 1.0);
    }
}
