//! Source identity, content types and raw fetch results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized origin identity of a source (canonical URL or file path).
///
/// Two descriptors that normalize to the same id are the same source and
/// are fetched at most once per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn from_origin(origin: &str) -> Self {
        let trimmed = origin.trim();
        match trimmed.split_once("://") {
            Some((scheme, rest)) => Self(normalize_url(scheme, rest)),
            None => Self(normalize_path(trimmed)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_url(&self) -> bool {
        self.0.contains("://")
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_url(scheme: &str, rest: &str) -> String {
    let scheme = scheme.to_ascii_lowercase();
    let rest = rest.split('#').next().unwrap_or_default();
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (authority, path) = match location.find('/') {
        Some(idx) => (&location[..idx], &location[idx..]),
        None => (location, ""),
    };

    let mut host = authority.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => Some(":80"),
        "https" => Some(":443"),
        _ => None,
    };
    if let Some(port) = default_port {
        if host.ends_with(port) {
            host.truncate(host.len() - port.len());
        }
    }

    let path = path.trim_end_matches('/');

    let query: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .filter(|pair| !pair.to_ascii_lowercase().starts_with("utm_"))
                .collect()
        })
        .unwrap_or_default();

    if query.is_empty() {
        format!("{}://{}{}", scheme, host, path)
    } else {
        format!("{}://{}{}?{}", scheme, host, path, query.join("&"))
    }
}

fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut normalized = String::with_capacity(unified.len());
    let mut prev_slash = false;
    for ch in unified.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        normalized.push(ch);
    }

    let normalized = normalized.strip_prefix("./").unwrap_or(&normalized);
    if normalized.len() > 1 {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized.to_string()
    }
}

/// What the Retriever returns: a pointer to a source, not its content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    /// URL or file path as reported by the retriever
    pub origin: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub snippet: Option<String>,
}

impl SourceDescriptor {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            title: None,
            snippet: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::from_origin(&self.origin)
    }
}

/// Content type of a raw source, resolved against the normalizer registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    PlainText,
    Markdown,
    Html,
    Pdf,
    /// Already-extracted multi-page text
    Paged,
    /// Anything else, with the original MIME type or extension
    Unknown(String),
}

impl ContentType {
    /// Resolve from a MIME type (parameters such as charset are ignored)
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/plain" => ContentType::PlainText,
            "text/markdown" | "text/x-markdown" => ContentType::Markdown,
            "text/html" | "application/xhtml+xml" => ContentType::Html,
            "application/pdf" => ContentType::Pdf,
            _ => ContentType::Unknown(essence),
        }
    }

    /// Resolve from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" => ContentType::PlainText,
            "md" | "markdown" => ContentType::Markdown,
            "html" | "htm" => ContentType::Html,
            "pdf" => ContentType::Pdf,
            _ => ContentType::Unknown(ext),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ContentType::PlainText => "text/plain",
            ContentType::Markdown => "text/markdown",
            ContentType::Html => "text/html",
            ContentType::Pdf => "application/pdf",
            ContentType::Paged => "paged",
            ContentType::Unknown(other) => other,
        }
    }
}

/// Raw bytes or text as fetched, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RawContent {
    Text(String),
    /// One entry per page, in page order
    Pages(Vec<String>),
    Binary(Vec<u8>),
}

impl RawContent {
    pub fn byte_len(&self) -> usize {
        match self {
            RawContent::Text(text) => text.len(),
            RawContent::Pages(pages) => pages.iter().map(|p| p.len()).sum(),
            RawContent::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }
}

/// What a Fetcher returns for one descriptor
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub content: RawContent,
    pub content_type: ContentType,
    pub title: Option<String>,
}

impl FetchedContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: RawContent::Text(text.into()),
            content_type: ContentType::PlainText,
            title: None,
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self {
            content: RawContent::Text(html.into()),
            content_type: ContentType::Html,
            title: None,
        }
    }

    pub fn pages(pages: Vec<String>) -> Self {
        Self {
            content: RawContent::Pages(pages),
            content_type: ContentType::Paged,
            title: None,
        }
    }
}

/// A fetched source, scoped to one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSource {
    pub source_id: SourceId,
    pub title: Option<String>,
    pub content: RawContent,
    pub content_type: ContentType,
    pub fetched_at: DateTime<Utc>,
}

impl RawSource {
    pub fn new(source_id: SourceId, content: RawContent, content_type: ContentType) -> Self {
        Self {
            source_id,
            title: None,
            content,
            content_type,
            fetched_at: Utc::now(),
        }
    }

    /// Build from a fetch result, falling back to the descriptor title
    pub fn from_fetched(descriptor: &SourceDescriptor, fetched: FetchedContent) -> Self {
        Self {
            source_id: descriptor.source_id(),
            title: fetched.title.or_else(|| descriptor.title.clone()),
            content: fetched.content,
            content_type: fetched.content_type,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalization() {
        assert_eq!(
            SourceId::from_origin("HTTPS://Example.COM/cases/smith/#holding").as_str(),
            "https://example.com/cases/smith"
        );
        assert_eq!(
            SourceId::from_origin("https://example.com:443/a?utm_source=x&id=7").as_str(),
            "https://example.com/a?id=7"
        );
        assert_eq!(
            SourceId::from_origin("https://example.com/a?utm_medium=email"),
            SourceId::from_origin("https://example.com/a")
        );
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(
            SourceId::from_origin("./docs//motion.pdf").as_str(),
            "docs/motion.pdf"
        );
        assert_eq!(
            SourceId::from_origin("C:\\case\\complaint.txt").as_str(),
            "C:/case/complaint.txt"
        );
        assert!(!SourceId::from_origin("/tmp/x/").is_url());
    }

    #[test]
    fn test_content_type_resolution() {
        assert_eq!(ContentType::from_mime("text/html; charset=utf-8"), ContentType::Html);
        assert_eq!(ContentType::from_mime("application/PDF"), ContentType::Pdf);
        assert_eq!(ContentType::from_extension(".MD"), ContentType::Markdown);
        assert_eq!(
            ContentType::from_extension("docx"),
            ContentType::Unknown("docx".to_string())
        );
    }
}
