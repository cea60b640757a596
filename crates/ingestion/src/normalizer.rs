//! Source normalization
//!
//! A registry maps each content type to a named [`Normalizer`]. The
//! [`SourceNormalizer`] resolves a RawSource against it and turns the
//! normalized pages into ordered Documents. Unregistered content types
//! resolve to [`Resolution::Unsupported`] and the source is dropped with a
//! [`SkipRecord`].

use crate::errors::IngestionError;
use crate::{html, pdf};
use caseforge_common::metrics::record_skip;
use caseforge_common::model::{ContentType, Document, RawContent, RawSource, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalized text of one source: one entry per page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedText {
    pub title: Option<String>,
    pub pages: Vec<String>,
}

impl NormalizedText {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            title: None,
            pages: vec![text.into()],
        }
    }
}

/// Turns raw content of one content type into text
pub trait Normalizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn normalize(&self, source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError>;
}

fn utf8_text<'a>(content: &'a RawContent, normalizer: &'static str) -> Result<std::borrow::Cow<'a, str>, IngestionError> {
    match content {
        RawContent::Text(text) => Ok(std::borrow::Cow::Borrowed(text.as_str())),
        RawContent::Binary(bytes) => Ok(String::from_utf8_lossy(bytes)),
        RawContent::Pages(_) => Err(IngestionError::ContentMismatch {
            normalizer,
            kind: "paged",
        }),
    }
}

pub struct PlainTextNormalizer;

impl Normalizer for PlainTextNormalizer {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn normalize(&self, _source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError> {
        Ok(NormalizedText::single(utf8_text(content, self.name())?.into_owned()))
    }
}

/// Markdown is kept as-is; the first `# ` heading becomes the title
pub struct MarkdownNormalizer;

impl Normalizer for MarkdownNormalizer {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn normalize(&self, _source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError> {
        let text = utf8_text(content, self.name())?;
        let title = text
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(NormalizedText {
            title,
            pages: vec![text.into_owned()],
        })
    }
}

pub struct HtmlNormalizer;

impl Normalizer for HtmlNormalizer {
    fn name(&self) -> &'static str {
        "html"
    }

    fn normalize(&self, _source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError> {
        let page = html::extract(&utf8_text(content, self.name())?)?;
        Ok(NormalizedText {
            title: page.title,
            pages: vec![page.text],
        })
    }
}

pub struct PdfNormalizer;

impl Normalizer for PdfNormalizer {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn normalize(&self, source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError> {
        match content {
            RawContent::Binary(bytes) => Ok(NormalizedText {
                title: None,
                pages: pdf::extract_pages(bytes, source_id.as_str())?,
            }),
            // Text already extracted upstream, one entry per page
            RawContent::Pages(pages) => Ok(NormalizedText {
                title: None,
                pages: pages.clone(),
            }),
            RawContent::Text(_) => Err(IngestionError::ContentMismatch {
                normalizer: self.name(),
                kind: "text",
            }),
        }
    }
}

/// Already-extracted multi-page text
pub struct PagedNormalizer;

impl Normalizer for PagedNormalizer {
    fn name(&self) -> &'static str {
        "paged"
    }

    fn normalize(&self, _source_id: &SourceId, content: &RawContent) -> Result<NormalizedText, IngestionError> {
        match content {
            RawContent::Pages(pages) => Ok(NormalizedText {
                title: None,
                pages: pages.clone(),
            }),
            RawContent::Text(text) => Ok(NormalizedText::single(text.clone())),
            RawContent::Binary(_) => Err(IngestionError::ContentMismatch {
                normalizer: self.name(),
                kind: "binary",
            }),
        }
    }
}

/// Outcome of looking a content type up in the registry
pub enum Resolution {
    Supported(Arc<dyn Normalizer>),
    Unsupported(ContentType),
}

/// Content type -> named normalizer
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    normalizers: HashMap<ContentType, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
    /// An empty registry; every type resolves to Unsupported
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain text, markdown, HTML, PDF and pre-paged text
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ContentType::PlainText, Arc::new(PlainTextNormalizer));
        registry.register(ContentType::Markdown, Arc::new(MarkdownNormalizer));
        registry.register(ContentType::Html, Arc::new(HtmlNormalizer));
        registry.register(ContentType::Pdf, Arc::new(PdfNormalizer));
        registry.register(ContentType::Paged, Arc::new(PagedNormalizer));
        registry
    }

    pub fn register(&mut self, content_type: ContentType, normalizer: Arc<dyn Normalizer>) {
        self.normalizers.insert(content_type, normalizer);
    }

    pub fn resolve(&self, content_type: &ContentType) -> Resolution {
        match self.normalizers.get(content_type) {
            Some(normalizer) => Resolution::Supported(Arc::clone(normalizer)),
            None => Resolution::Unsupported(content_type.clone()),
        }
    }

    pub fn supports(&self, content_type: &ContentType) -> bool {
        self.normalizers.contains_key(content_type)
    }
}

/// Why a source produced no Documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SkipReason {
    UnsupportedContentType,
    NormalizationFailed(String),
    EmptyContent,
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            SkipReason::UnsupportedContentType => "unsupported_content_type",
            SkipReason::NormalizationFailed(_) => "normalization_failed",
            SkipReason::EmptyContent => "empty_content",
        }
    }
}

/// A recorded skip: the source is dropped, never merged elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub source_id: SourceId,
    pub content_type: String,
    pub reason: SkipReason,
}

/// RawSource -> ordered Documents
#[derive(Clone)]
pub struct SourceNormalizer {
    registry: NormalizerRegistry,
}

impl Default for SourceNormalizer {
    fn default() -> Self {
        Self::new(NormalizerRegistry::with_defaults())
    }
}

impl SourceNormalizer {
    pub fn new(registry: NormalizerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NormalizerRegistry {
        &self.registry
    }

    /// Single-page sources yield one Document; multi-page sources yield one
    /// Document per page sharing `source_ref`, in page order.
    pub fn normalize(&self, raw: &RawSource) -> Result<Vec<Document>, SkipRecord> {
        let skip = |reason: SkipReason| {
            record_skip(reason.label());
            SkipRecord {
                source_id: raw.source_id.clone(),
                content_type: raw.content_type.label().to_string(),
                reason,
            }
        };

        let normalizer = match self.registry.resolve(&raw.content_type) {
            Resolution::Supported(normalizer) => normalizer,
            Resolution::Unsupported(content_type) => {
                debug!(
                    source = %raw.source_id,
                    content_type = content_type.label(),
                    "Unsupported content type, skipping source"
                );
                return Err(skip(SkipReason::UnsupportedContentType));
            }
        };

        let normalized = normalizer
            .normalize(&raw.source_id, &raw.content)
            .map_err(|e| {
                warn!(
                    source = %raw.source_id,
                    normalizer = normalizer.name(),
                    error = %e,
                    "Normalization failed, skipping source"
                );
                skip(SkipReason::NormalizationFailed(e.to_string()))
            })?;

        if normalized.pages.iter().all(|p| p.trim().is_empty()) {
            return Err(skip(SkipReason::EmptyContent));
        }

        let title = normalized
            .title
            .or_else(|| raw.title.clone())
            .unwrap_or_else(|| raw.source_id.to_string());
        let page_count = normalized.pages.len() as u32;

        let documents: Vec<Document> = normalized
            .pages
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                Document::new(raw.source_id.clone(), title.clone(), text).page(idx as u32, page_count)
            })
            .collect();

        debug!(
            source = %raw.source_id,
            normalizer = normalizer.name(),
            documents = documents.len(),
            "Source normalized"
        );

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(origin: &str, content: RawContent, content_type: ContentType) -> RawSource {
        RawSource::new(SourceId::from_origin(origin), content, content_type)
    }

    #[test]
    fn test_single_page_source_yields_one_document() {
        let normalizer = SourceNormalizer::default();
        let source = raw(
            "https://example.com/fdcpa",
            RawContent::Text("<html><head><title>FDCPA Standing</title></head><body><p>Spokeo applies.</p></body></html>".into()),
            ContentType::Html,
        );

        let docs = normalizer.normalize(&source).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "FDCPA Standing");
        assert_eq!(docs[0].text, "Spokeo applies.");
        assert_eq!(docs[0].page_count, 1);
    }

    #[test]
    fn test_paged_source_yields_ordered_documents() {
        let normalizer = SourceNormalizer::default();
        let source = raw(
            "/case/complaint.pdf",
            RawContent::Pages(vec!["Page one".into(), "".into(), "Page three".into()]),
            ContentType::Paged,
        )
        .with_title("Complaint");

        let docs = normalizer.normalize(&source).unwrap();
        assert_eq!(docs.len(), 3);
        for (idx, doc) in docs.iter().enumerate() {
            assert_eq!(doc.page_index, idx as u32);
            assert_eq!(doc.page_count, 3);
            assert_eq!(doc.source_ref, source.source_id);
            assert_eq!(doc.title, "Complaint");
        }
        assert_eq!(docs[2].text, "Page three");
    }

    #[test]
    fn test_unsupported_type_is_recorded_skip() {
        let normalizer = SourceNormalizer::default();
        let source = raw(
            "/case/exhibit.docx",
            RawContent::Binary(vec![0x50, 0x4b]),
            ContentType::from_extension("docx"),
        );

        let skip = normalizer.normalize(&source).unwrap_err();
        assert_eq!(skip.reason, SkipReason::UnsupportedContentType);
        assert_eq!(skip.content_type, "docx");
    }

    #[test]
    fn test_empty_registry_resolves_unsupported() {
        let registry = NormalizerRegistry::new();
        assert!(matches!(
            registry.resolve(&ContentType::PlainText),
            Resolution::Unsupported(ContentType::PlainText)
        ));
        assert!(NormalizerRegistry::with_defaults().supports(&ContentType::Pdf));
    }

    #[test]
    fn test_broken_pdf_and_blank_text_are_skipped() {
        let normalizer = SourceNormalizer::default();
        let broken = raw("/case/bad.pdf", RawContent::Binary(b"garbage".to_vec()), ContentType::Pdf);
        assert!(matches!(
            normalizer.normalize(&broken).unwrap_err().reason,
            SkipReason::NormalizationFailed(_)
        ));

        let blank = raw("/case/blank.txt", RawContent::Text("   \n".into()), ContentType::PlainText);
        assert_eq!(normalizer.normalize(&blank).unwrap_err().reason, SkipReason::EmptyContent);
    }

    #[test]
    fn test_markdown_heading_becomes_title() {
        let normalizer = SourceNormalizer::default();
        let source = raw(
            "/notes/strategy.md",
            RawContent::Text("# Defense Strategy\n\nArgue lack of standing.".into()),
            ContentType::Markdown,
        );
        let docs = normalizer.normalize(&source).unwrap();
        assert_eq!(docs[0].title, "Defense Strategy");
    }
}
