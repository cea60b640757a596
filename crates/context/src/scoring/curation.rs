//! Whole-document curation scorer
//!
//! An LLM reads each Document the sub-query retrieved and rates it 0-10.
//! Every chunk of a Document inherits that rating, normalized to [0, 1].

use super::{Scorer, ScoringGranularity};
use async_trait::async_trait;
use caseforge_common::errors::{AppError, Result};
use caseforge_common::llm::{CompletionRequest, LlmClient};
use caseforge_common::model::{Chunk, SubQuery};
use caseforge_common::tokens::truncate_to_tokens;
use caseforge_ingestion::chunker::reconstruct_text;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Upper bound on the document text sent for one rating
const MAX_DOCUMENT_TOKENS: usize = 3000;

const SYSTEM_PROMPT: &str = "You are a legal research assistant curating sources. \
Rate how useful a document is for answering a research question. \
Reply with a single integer from 0 (irrelevant) to 10 (directly on point).";

pub struct CurationScorer {
    llm: Arc<dyn LlmClient>,
    name: String,
}

impl CurationScorer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let name = format!("curation:{}", llm.model_name());
        Self { llm, name }
    }

    fn build_request(sub_query: &SubQuery, text: &str) -> CompletionRequest {
        let prompt = format!(
            "Research question: {}\n\nDocument:\n{}\n\nRating (0-10):",
            sub_query.text,
            truncate_to_tokens(text, MAX_DOCUMENT_TOKENS)
        );
        CompletionRequest::new(SYSTEM_PROMPT, prompt)
            .with_max_tokens(8)
            .with_temperature(0.0)
    }

    async fn rate(&self, sub_query: &SubQuery, text: &str) -> Result<f32> {
        let output = self
            .llm
            .complete(&Self::build_request(sub_query, text))
            .await
            .map_err(|e| AppError::Scoring {
                sub_query: sub_query.id.to_string(),
                message: format!("curation call failed: {}", e),
            })?;

        parse_rating(&output).ok_or_else(|| AppError::Scoring {
            sub_query: sub_query.id.to_string(),
            message: format!("unparseable curation rating: {:?}", output.trim()),
        })
    }
}

/// First number in the output, read as a 0-10 rating and normalized
pub fn parse_rating(output: &str) -> Option<f32> {
    let start = output.find(|c: char| c.is_ascii_digit())?;
    let number: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f32 = number.trim_end_matches('.').parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value / 10.0).clamp(0.0, 1.0))
}

#[async_trait]
impl Scorer for CurationScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn granularity(&self) -> ScoringGranularity {
        ScoringGranularity::Document
    }

    async fn score(&self, sub_query: &SubQuery, text: &str) -> Result<f32> {
        self.rate(sub_query, text).await
    }

    async fn score_chunks(&self, sub_query: &SubQuery, chunks: &[Chunk]) -> Result<Vec<f32>> {
        // Group by document, keeping first-appearance order
        let mut order: Vec<Uuid> = Vec::new();
        let mut by_document: HashMap<Uuid, Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            by_document
                .entry(chunk.document_id)
                .or_insert_with(|| {
                    order.push(chunk.document_id);
                    Vec::new()
                })
                .push(chunk.clone());
        }

        let mut ratings: HashMap<Uuid, f32> = HashMap::with_capacity(order.len());
        for document_id in &order {
            let text = by_document
                .get(document_id)
                .map(|c| reconstruct_text(c))
                .unwrap_or_default();
            let rating = self.rate(sub_query, &text).await?;
            ratings.insert(*document_id, rating);
        }

        debug!(sub_query = %sub_query.id, documents = order.len(), "Documents curated");
        Ok(chunks
            .iter()
            .map(|c| ratings.get(&c.document_id).copied().unwrap_or(0.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_common::model::{Document, SourceId};
    use caseforge_ingestion::{chunk_document, ChunkingConfig};
    use std::sync::Mutex;

    struct RatingLlm {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for RatingLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.lock().unwrap().push(request.prompt.clone());
            if request.prompt.contains("household") {
                Ok("8".into())
            } else {
                Ok("Rating: 2/10".into())
            }
        }

        fn model_name(&self) -> &str {
            "rating"
        }
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("7"), Some(0.7));
        assert_eq!(parse_rating("Rating: 10."), Some(1.0));
        assert_eq!(parse_rating("42"), Some(1.0));
        assert_eq!(parse_rating("8.5 out of 10"), Some(0.85));
        assert_eq!(parse_rating("no idea"), None);
    }

    #[tokio::test]
    async fn test_chunks_inherit_document_rating() {
        let llm = Arc::new(RatingLlm {
            calls: Mutex::new(Vec::new()),
        });
        let scorer = CurationScorer::new(llm.clone());
        let config = ChunkingConfig::new(20, 5).unwrap();

        let relevant = Document::new(
            SourceId::from_origin("/a.txt"),
            "A",
            "The debt was incurred for household purposes by the plaintiff.",
        );
        let other = Document::new(SourceId::from_origin("/b.txt"), "B", "Zoning board minutes.");
        let mut chunks = chunk_document(&relevant, &config);
        chunks.extend(chunk_document(&other, &config));

        let scores = scorer
            .score_chunks(&SubQuery::new(1, "consumer debt"), &chunks)
            .await
            .unwrap();

        assert_eq!(scores.len(), chunks.len());
        assert_eq!(llm.calls.lock().unwrap().len(), 2);
        for (chunk, score) in chunks.iter().zip(&scores) {
            let expected = if chunk.document_id == relevant.id { 0.8 } else { 0.2 };
            assert!((score - expected).abs() < 1e-6);
        }
        assert_eq!(scorer.granularity(), ScoringGranularity::Document);
    }
}
