//! Retrieval capabilities and the coordinator that drives them
//!
//! - [`Retriever`]: sub-query -> source descriptors (search backend)
//! - [`Fetcher`]: descriptor -> raw content
//! - [`RetrievalCoordinator`]: concurrent, deduplicated fetching per session

pub mod cache;
pub mod coordinator;

pub use cache::{CachedSource, FetchCache, FetchFailure};
pub use coordinator::{RetrievalCoordinator, SubQueryRetrieval};

use async_trait::async_trait;
use caseforge_common::errors::{AppError, Result};
use caseforge_common::model::{ContentType, FetchedContent, RawContent, SourceDescriptor, SubQuery};
use std::time::Duration;

/// Finds candidate sources for a sub-query
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, sub_query: &SubQuery, max_results: usize) -> Result<Vec<SourceDescriptor>>;
}

/// Fetches the raw content behind a descriptor
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &SourceDescriptor) -> Result<FetchedContent>;
}

/// Returns the same descriptors for every sub-query (seed URLs, fixtures)
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    descriptors: Vec<SourceDescriptor>,
}

impl StaticRetriever {
    pub fn new(descriptors: Vec<SourceDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(origins.into_iter().map(SourceDescriptor::new).collect())
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _sub_query: &SubQuery, max_results: usize) -> Result<Vec<SourceDescriptor>> {
        Ok(self.descriptors.iter().take(max_results).cloned().collect())
    }
}

/// HTTP GET fetcher; the Content-Type header picks the normalizer
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Bodies above this size are rejected
    pub const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("caseforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Read the body chunk by chunk, giving up as soon as it passes
    /// `max_bytes`. A declared Content-Length over the cap is rejected
    /// before any of the body is read.
    async fn read_capped(&self, origin: &str, mut response: reqwest::Response) -> Result<Vec<u8>> {
        let too_large = |size: u64| {
            AppError::retrieval(
                origin,
                format!("body of {} bytes exceeds limit of {}", size, self.max_bytes),
                false,
            )
        };

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes as u64 {
                return Err(too_large(declared));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::retrieval(origin, e.to_string(), true))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large((body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, descriptor: &SourceDescriptor) -> Result<FetchedContent> {
        let origin = descriptor.origin.as_str();
        let response = self.client.get(origin).send().await.map_err(|e| {
            AppError::retrieval(origin, e.to_string(), e.is_timeout() || e.is_connect())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::retrieval(
                origin,
                format!("HTTP {}", status),
                status.is_server_error() || status.as_u16() == 429,
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentType::from_mime)
            .unwrap_or_else(|| {
                origin
                    .rsplit_once('.')
                    .map(|(_, ext)| ContentType::from_extension(ext))
                    .filter(|ct| !matches!(ct, ContentType::Unknown(_)))
                    .unwrap_or(ContentType::Html)
            });

        let body = self.read_capped(origin, response).await?;

        let content = match content_type {
            ContentType::Pdf | ContentType::Unknown(_) => RawContent::Binary(body),
            _ => RawContent::Text(String::from_utf8_lossy(&body).into_owned()),
        };

        Ok(FetchedContent {
            content,
            content_type,
            title: descriptor.title.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_fetcher_maps_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opinion"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<p>Opinion</p>"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let descriptor = SourceDescriptor::new(format!("{}/opinion", server.uri()));
        let fetched = fetcher.fetch(&descriptor).await.unwrap();
        assert_eq!(fetched.content_type, ContentType::Html);
        assert_eq!(fetched.content, RawContent::Text("<p>Opinion</p>".into()));
    }

    #[tokio::test]
    async fn test_http_fetcher_classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let gone = fetcher
            .fetch(&SourceDescriptor::new(format!("{}/gone", server.uri())))
            .await
            .unwrap_err();
        assert!(!gone.is_transient());

        let busy = fetcher
            .fetch(&SourceDescriptor::new(format!("{}/busy", server.uri())))
            .await
            .unwrap_err();
        assert!(busy.is_transient());
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(path("/huge"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;
        Mock::given(path("/small"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(512)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap().with_max_bytes(1024);
        let err = fetcher
            .fetch(&SourceDescriptor::new(format!("{}/huge", server.uri())))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("exceeds limit of 1024"));

        let fetched = fetcher
            .fetch(&SourceDescriptor::new(format!("{}/small", server.uri())))
            .await
            .unwrap();
        assert_eq!(fetched.content.byte_len(), 512);
    }

    #[tokio::test]
    async fn test_static_retriever_respects_max_results() {
        let retriever = StaticRetriever::from_origins(["https://a.example", "https://b.example"]);
        let sub_query = SubQuery::new(1, "anything");
        assert_eq!(retriever.retrieve(&sub_query, 1).await.unwrap().len(), 1);
    }
}
