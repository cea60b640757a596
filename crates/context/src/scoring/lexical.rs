//! Query-term coverage scorer. Deterministic, no external calls.

use super::{Scorer, ScoringGranularity};
use async_trait::async_trait;
use caseforge_common::errors::Result;
use caseforge_common::model::SubQuery;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those", "it",
    "its", "as", "do", "does", "did", "has", "have", "had", "can", "could", "will", "would",
    "should", "may", "might", "what", "which", "how", "when", "under",
];

#[derive(Debug, Clone, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn new() -> Self {
        Self
    }

    fn terms(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
            .map(str::to_string)
            .collect()
    }

    /// Fraction of distinct query terms that appear in the text
    pub fn coverage(query: &str, text: &str) -> f32 {
        let query_terms = Self::terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms = Self::terms(text);
        let matched = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
        matched as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl Scorer for LexicalScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    fn granularity(&self) -> ScoringGranularity {
        ScoringGranularity::Chunk
    }

    async fn score(&self, sub_query: &SubQuery, text: &str) -> Result<f32> {
        Ok(Self::coverage(&sub_query.text, text))
    }
}
