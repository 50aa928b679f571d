use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::placeholders::markdown_images;
use super::{ContentExtractor, RawContent};
use crate::config::ExtractionConfig;
use crate::http::{read_limited_bytes, BodyError};
use crate::util::validate_fetch_url;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Authentication rejected by extraction service (HTTP {0})")]
    Auth(u16),
    #[error("Article not found (HTTP 404)")]
    NotFound,
    #[error("Extraction service rate limit or quota exceeded (HTTP {0})")]
    RateLimited(u16),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed extraction response: {0}")]
    Malformed(String),
    #[error("Invalid article URL: {0}")]
    InvalidUrl(String),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl From<BodyError> for ContentError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => ContentError::Network(e),
            BodyError::TooLarge(limit) => ContentError::ResponseTooLarge(limit),
            BodyError::Incomplete { expected, received } => ContentError::Malformed(format!(
                "truncated body ({received} of {expected} bytes)"
            )),
        }
    }
}

impl ContentError {
    fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ContentError::Auth(status),
            404 => ContentError::NotFound,
            402 | 429 => ContentError::RateLimited(status),
            other => ContentError::HttpStatus(other),
        }
    }
}

/// JSON envelope returned with `Accept: application/json`.
#[derive(Debug, Deserialize)]
struct ReaderEnvelope {
    data: ReaderData,
}

#[derive(Debug, Deserialize)]
struct ReaderData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
}

/// Client for a reader-style extraction service (`GET {base}/{article_url}`).
///
/// One request per article. Failures are returned as-is: a retry would be
/// billed again.
pub struct ReaderExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    max_bytes: usize,
    allow_private_hosts: bool,
}

impl ReaderExtractor {
    /// Build an extractor, rejecting a plain-http base URL unless it points
    /// at localhost (the API key would travel in clear text).
    pub fn new(client: reqwest::Client, config: &ExtractionConfig) -> Result<Self, ContentError> {
        let base = config.base_url.trim_end_matches('/').to_string();
        if !base.starts_with("https://") {
            let is_localhost =
                base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost");
            if !is_localhost {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS extraction base URL");
                return Err(ContentError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base, "Using non-HTTPS extraction base URL (localhost only)");
        }

        Ok(Self {
            client,
            base_url: base,
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_bytes: config.max_content_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn request(&self, target: &str) -> Result<RawContent, ContentError> {
        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, target))
            .header("Accept", "application/json")
            .header("X-Return-Format", "markdown");

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ContentError::from_status(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_bytes).await?;
        let envelope: ReaderEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| ContentError::Malformed(e.to_string()))?;

        let markdown = envelope.data.content;
        let media = markdown_images(&markdown, target);
        Ok(RawContent {
            title: envelope.data.title.filter(|t| !t.trim().is_empty()),
            markdown,
            media,
        })
    }
}

#[async_trait]
impl ContentExtractor for ReaderExtractor {
    async fn extract(&self, url: &str) -> Result<RawContent, ContentError> {
        let target = validate_fetch_url(url, self.allow_private_hosts)
            .map_err(|e| ContentError::InvalidUrl(e.to_string()))?;

        let secs = self.timeout.as_secs();
        let raw = tokio::time::timeout(self.timeout, self.request(target.as_str()))
            .await
            .map_err(|_| ContentError::Timeout(secs))??;

        tracing::debug!(
            url = %target,
            chars = raw.markdown.len(),
            media = raw.media.len(),
            "Extracted raw content"
        );
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> ExtractionConfig {
        ExtractionConfig {
            base_url: base.to_string(),
            timeout_secs: 5,
            ..ExtractionConfig::default()
        }
    }

    fn extractor(base: &str) -> ReaderExtractor {
        ReaderExtractor::new(reqwest::Client::new(), &config(base)).unwrap()
    }

    fn envelope(content: &str) -> serde_json::Value {
        serde_json::json!({
            "code": 200,
            "data": { "title": "Story", "url": "https://example.com/story", "content": content }
        })
    }

    #[tokio::test]
    async fn test_extract_success_with_media() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/https://example.com/story$"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                "# Story\n\n![Lead](/img/lead.jpg)\n\nBody text.",
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let raw = extractor(&mock_server.uri())
            .extract("https://example.com/story")
            .await
            .unwrap();
        assert_eq!(raw.title.as_deref(), Some("Story"));
        assert!(raw.markdown.contains("Body text."));
        assert_eq!(raw.media.len(), 1);
        assert_eq!(raw.media[0].url, "https://example.com/img/lead.jpg");
    }

    #[tokio::test]
    async fn test_bearer_key_sent_when_configured() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer reader-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope("ok")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut cfg = config(&mock_server.uri());
        cfg.api_key = Some(SecretString::from("reader-key"));
        let extractor = ReaderExtractor::new(reqwest::Client::new(), &cfg).unwrap();
        extractor.extract("https://example.com/story").await.unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for (status, check) in [
            (401u16, (|e: &ContentError| matches!(e, ContentError::Auth(401))) as fn(&ContentError) -> bool),
            (404, |e| matches!(e, ContentError::NotFound)),
            (429, |e| matches!(e, ContentError::RateLimited(429))),
            (402, |e| matches!(e, ContentError::RateLimited(402))),
            (500, |e| matches!(e, ContentError::HttpStatus(500))),
        ] {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&mock_server)
                .await;
            let err = extractor(&mock_server.uri())
                .extract("https://example.com/story")
                .await
                .unwrap_err();
            assert!(check(&err), "status {status} mapped to {err:?}");
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = extractor(&mock_server.uri())
            .extract("https://example.com/story")
            .await;
        assert!(matches!(result, Err(ContentError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# not json"))
            .mount(&mock_server)
            .await;

        let result = extractor(&mock_server.uri())
            .extract("https://example.com/story")
            .await;
        assert!(matches!(result, Err(ContentError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(envelope("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let mut cfg = config(&mock_server.uri());
        cfg.timeout_secs = 1;
        let extractor = ReaderExtractor::new(reqwest::Client::new(), &cfg).unwrap();
        let result = extractor.extract("https://example.com/story").await;
        assert!(matches!(result, Err(ContentError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_private_article_url_rejected() {
        let extractor = extractor("https://reader.example.com");
        for url in ["http://localhost/a", "http://192.168.1.1/a", "not-a-url"] {
            let result = extractor.extract(url).await;
            assert!(matches!(result, Err(ContentError::InvalidUrl(_))), "{url}");
        }
    }

    #[test]
    fn test_http_base_url_rejected() {
        let result = ReaderExtractor::new(reqwest::Client::new(), &config("http://evil.com"));
        assert!(matches!(result, Err(ContentError::InsecureBaseUrl)));
    }

    #[test]
    fn test_localhost_base_url_allowed() {
        assert!(ReaderExtractor::new(reqwest::Client::new(), &config("http://127.0.0.1:9")).is_ok());
    }
}
