//! Synthesis Gateway - hand-off to report generation
//!
//! The engine's output ends here: the aggregated context, the original
//! query and any local case documents go to an external
//! [`ReportGenerator`]. Prompt wording and report format belong to the
//! generator, not to the engine.

use crate::session::RetrievalStatus;
use async_trait::async_trait;
use caseforge_common::errors::{AppError, Result};
use caseforge_common::llm::{CompletionRequest, LlmClient};
use caseforge_common::model::{AggregatedContext, CaseContext, SourceId};
use caseforge_common::tokens::estimate_tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A local case document passed to synthesis untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDocument {
    pub label: String,
    pub path: PathBuf,
    pub text: String,
}

/// A case document that could not be read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDocumentError {
    pub label: String,
    pub path: PathBuf,
    pub message: String,
}

/// Everything the report generator receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisHandoff {
    pub session_id: Uuid,
    pub query: String,
    pub case_context: Option<CaseContext>,
    pub context: AggregatedContext,
    pub case_documents: Vec<CaseDocument>,
    pub retrieval_status: RetrievalStatus,
}

/// Source behind a `[n]` marker in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based rank of the chunk in the aggregated context
    pub index: usize,
    pub source_ref: SourceId,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub report: String,
    pub citations: Vec<Citation>,
}

impl SynthesisResult {
    /// Distinct cited sources, in citation order
    pub fn cited_sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = Vec::new();
        for citation in &self.citations {
            if !sources.contains(&citation.source_ref) {
                sources.push(citation.source_ref.clone());
            }
        }
        sources
    }
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, handoff: &SynthesisHandoff) -> Result<String>;
}

/// Case documents longer than this are cut before prompting
const MAX_CASE_DOCUMENT_CHARS: usize = 12_000;

/// ReportGenerator backed by an LLM
pub struct LlmReportGenerator {
    llm: Arc<dyn LlmClient>,
    max_tokens: usize,
    temperature: f32,
}

impl LlmReportGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_tokens: 1200,
            temperature: 0.4,
        }
    }

    pub fn with_limits(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Build the synthesis prompt
    pub fn build_prompt(handoff: &SynthesisHandoff) -> String {
        let mut prompt = format!(
            "Write a research memo answering the question below using ONLY the provided research context \
            and case documents. If the context does not contain enough information, say so. \
            Cite research context with the bracketed numbers, e.g. [1], [2].\n\n\
            Question: {}\n",
            handoff.query
        );

        if let Some(ctx) = handoff.case_context.as_ref().filter(|c| !c.is_empty()) {
            if let Some(jurisdiction) = &ctx.jurisdiction {
                prompt.push_str(&format!("Jurisdiction: {}\n", jurisdiction));
            }
            if let Some(position) = &ctx.our_position {
                prompt.push_str(&format!("Our position: {}\n", position));
            }
        }

        if !handoff.case_documents.is_empty() {
            prompt.push_str("\nCase documents:\n");
            for doc in &handoff.case_documents {
                let text: String = doc.text.chars().take(MAX_CASE_DOCUMENT_CHARS).collect();
                prompt.push_str(&format!("\n--- {} ---\n{}\n", doc.label, text));
            }
        }

        prompt.push_str("\nResearch context:\n");
        if handoff.context.is_empty() {
            prompt.push_str("(no research sources were retrieved)\n");
        } else {
            prompt.push_str(&handoff.context.text);
        }

        prompt.push_str("\nMemo:");
        prompt
    }
}

#[async_trait]
impl ReportGenerator for LlmReportGenerator {
    async fn generate(&self, handoff: &SynthesisHandoff) -> Result<String> {
        let request = CompletionRequest::new(
            "You are a careful legal research assistant.",
            Self::build_prompt(handoff),
        )
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature);
        self.llm.complete(&request).await
    }
}

pub struct SynthesisGateway {
    generator: Arc<dyn ReportGenerator>,
}

impl SynthesisGateway {
    pub fn new(generator: Arc<dyn ReportGenerator>) -> Self {
        Self { generator }
    }

    #[instrument(skip(self, handoff), fields(session_id = %handoff.session_id, chunks = handoff.context.chunks.len()))]
    pub async fn forward(&self, handoff: &SynthesisHandoff) -> Result<SynthesisResult> {
        let report = self.generator.generate(handoff).await?;
        let citations = extract_citations(&report, &handoff.context)?;
        info!(
            report_tokens = estimate_tokens(&report),
            citations = citations.len(),
            "Report generated"
        );
        Ok(SynthesisResult { report, citations })
    }
}

/// Resolve `[n]` markers against the ranked chunks of the context.
///
/// Out-of-range markers are ignored; each index is reported once.
pub fn extract_citations(report: &str, context: &AggregatedContext) -> Result<Vec<Citation>> {
    let pattern = regex_lite::Regex::new(r"\[(\d+)\]").map_err(|e| AppError::Internal {
        message: format!("invalid citation pattern: {}", e),
    })?;

    let mut citations: Vec<Citation> = Vec::new();
    for cap in pattern.captures_iter(report) {
        let Some(index) = cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        if index == 0 || index > context.chunks.len() {
            continue;
        }
        if citations.iter().any(|c| c.index == index) {
            continue;
        }
        let chunk = &context.chunks[index - 1].chunk;
        citations.push(Citation {
            index,
            source_ref: chunk.source_ref.clone(),
            title: chunk.title.clone(),
        });
    }
    citations.sort_by_key(|c| c.index);
    Ok(citations)
}

/// Read case documents as text. PDFs go through the PDF extractor; other
/// files are read as UTF-8 (lossy). Unreadable files are reported, not fatal.
pub async fn load_case_documents(
    paths: &BTreeMap<String, PathBuf>,
) -> (Vec<CaseDocument>, Vec<CaseDocumentError>) {
    let mut documents = Vec::new();
    let mut errors = Vec::new();

    for (label, path) in paths {
        match read_case_document(path).await {
            Ok(text) => documents.push(CaseDocument {
                label: label.clone(),
                path: path.clone(),
                text,
            }),
            Err(message) => {
                warn!(label = %label, path = %path.display(), error = %message, "Case document unreadable");
                errors.push(CaseDocumentError {
                    label: label.clone(),
                    path: path.clone(),
                    message,
                });
            }
        }
    }

    (documents, errors)
}

async fn read_case_document(path: &PathBuf) -> std::result::Result<String, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        let pages = caseforge_ingestion::pdf::extract_pages(&bytes, &path.display().to_string())
            .map_err(|e| e.to_string())?;
        Ok(pages.join("\n\n"))
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_common::model::{AggregatedChunk, Chunk, OffsetRange, SubQueryId};
    use std::sync::Mutex;

    struct EchoLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok("Standing requires concrete injury [1]. See also [2] and [1]. Ignore [9].".into())
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn chunk(source: &str, title: &str) -> AggregatedChunk {
        AggregatedChunk {
            chunk: Chunk {
                document_id: Uuid::nil(),
                source_ref: SourceId::from_origin(source),
                title: title.into(),
                page_index: 0,
                page_count: 1,
                sequence_index: 0,
                offset: OffsetRange::new(0, 4),
                text: "text".into(),
                token_count: 1,
            },
            score: 0.9,
            sub_queries: vec![SubQueryId(1)],
        }
    }

    fn handoff(case_documents: Vec<CaseDocument>) -> SynthesisHandoff {
        SynthesisHandoff {
            session_id: Uuid::new_v4(),
            query: "Research FDCPA standing defenses".into(),
            case_context: None,
            context: AggregatedContext {
                chunks: vec![chunk("https://a.example", "A"), chunk("https://b.example", "B")],
                text: "[1] A\n[2] B\n".into(),
                token_count: 2,
                merged_chunks: 2,
                truncation: None,
            },
            case_documents,
            retrieval_status: RetrievalStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_forward_extracts_citations() {
        let llm = Arc::new(EchoLlm {
            prompts: Mutex::new(Vec::new()),
        });
        let gateway = SynthesisGateway::new(Arc::new(LlmReportGenerator::new(llm.clone())));

        let docs = vec![CaseDocument {
            label: "complaint".into(),
            path: PathBuf::from("/case/complaint.txt"),
            text: "Plaintiff Ian Bruce alleges...".into(),
        }];
        let result = gateway.forward(&handoff(docs)).await.unwrap();

        assert_eq!(result.citations.len(), 2);
        assert_eq!(result.citations[0].title, "A");
        assert_eq!(result.cited_sources().len(), 2);

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("--- complaint ---"));
        assert!(prompt.contains("Plaintiff Ian Bruce alleges..."));
        assert!(prompt.contains("Question: Research FDCPA standing defenses"));
    }

    #[tokio::test]
    async fn test_load_case_documents_records_errors() {
        let dir = tempfile::tempdir().unwrap();
        let complaint = dir.path().join("complaint.txt");
        std::fs::write(&complaint, "The complaint text").unwrap();

        let mut paths = BTreeMap::new();
        paths.insert("complaint".to_string(), complaint);
        paths.insert("missing".to_string(), dir.path().join("nope.txt"));

        let (documents, errors) = load_case_documents(&paths).await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "The complaint text");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].label, "missing");
    }
}
